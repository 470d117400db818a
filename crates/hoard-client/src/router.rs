use hoard_core::error::AppError;
use hoard_core::item::{FetchItem, ItemKind};
use hoard_core::traits::FetchBackend;

use crate::docker::DockerBackend;
use crate::http::HttpBackend;

/// Dispatches each item to the backend for its kind.
#[derive(Clone)]
pub struct KindRouter {
    http: HttpBackend,
    docker: Option<DockerBackend>,
}

impl KindRouter {
    pub fn new(http: HttpBackend) -> Self {
        Self { http, docker: None }
    }

    pub fn with_docker(mut self, docker: DockerBackend) -> Self {
        self.docker = Some(docker);
        self
    }

    pub fn has_docker(&self) -> bool {
        self.docker.is_some()
    }

    fn docker_for(&self, item: &FetchItem) -> Result<&DockerBackend, AppError> {
        self.docker.as_ref().ok_or_else(|| {
            AppError::ConfigError(format!(
                "item '{}' is a {} but no docker CLI is available",
                item.id, item.kind
            ))
        })
    }
}

impl FetchBackend for KindRouter {
    async fn probe(&self, item: &FetchItem) -> Result<(), AppError> {
        match item.kind {
            ItemKind::File => self.http.probe(item).await,
            ItemKind::Image | ItemKind::Model => self.docker_for(item)?.probe(item).await,
        }
    }

    async fn fetch(&self, item: &FetchItem) -> Result<u64, AppError> {
        match item.kind {
            ItemKind::File => self.http.fetch(item).await,
            ItemKind::Image | ItemKind::Model => self.docker_for(item)?.fetch(item).await,
        }
    }
}
