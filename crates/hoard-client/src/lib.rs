pub mod active;
pub mod cleanup;
pub mod disk;
pub mod docker;
pub mod http;
pub mod router;

pub use active::{ActiveDownloads, DownloadGuard};
pub use cleanup::WorkspaceCleanup;
pub use disk::SysinfoDiskProbe;
pub use docker::{DockerBackend, DockerCli};
pub use http::HttpBackend;
pub use router::KindRouter;
