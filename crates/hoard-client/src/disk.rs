use std::path::{Path, PathBuf};

use hoard_core::error::AppError;
use hoard_core::traits::{DiskProbe, DiskUsage};
use sysinfo::Disks;

/// Samples the filesystem that holds `path`, using sysinfo.
#[derive(Debug, Clone)]
pub struct SysinfoDiskProbe {
    path: PathBuf,
}

impl SysinfoDiskProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DiskProbe for SysinfoDiskProbe {
    fn sample(&self) -> Result<DiskUsage, AppError> {
        let target = existing_ancestor(&self.path)?;
        let disks = Disks::new_with_refreshed_list();
        let mounts = disks
            .list()
            .iter()
            .map(|d| (d.mount_point(), d.available_space(), d.total_space()));

        pick_mount(&target, mounts).ok_or_else(|| {
            AppError::Generic(format!("No mounted disk found for {}", target.display()))
        })
    }
}

/// The disk whose mount point is the longest prefix of `target`.
fn pick_mount<'a, I>(target: &Path, mounts: I) -> Option<DiskUsage>
where
    I: IntoIterator<Item = (&'a Path, u64, u64)>,
{
    mounts
        .into_iter()
        .filter(|(mount, _, _)| target.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.components().count())
        .map(|(_, available_bytes, total_bytes)| DiskUsage {
            available_bytes,
            total_bytes,
        })
}

/// Canonical form of the closest existing ancestor, since the download
/// directory may not have been created yet.
fn existing_ancestor(path: &Path) -> Result<PathBuf, AppError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    for candidate in absolute.ancestors() {
        if let Ok(canonical) = candidate.canonicalize() {
            return Ok(canonical);
        }
    }
    Err(AppError::Generic(format!(
        "No existing ancestor for {}",
        path.display()
    )))
}
