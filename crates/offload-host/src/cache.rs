use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use offload_common::protocol::error::{OffloadError, Result};
use offload_common::protocol::names::is_safe_name;

const ARTIFACT_DIR: &str = "artifacts";
const RESOURCE_DIR: &str = "resources";

/// On-disk cache of code artifacts and per-call resource files.
///
/// ```text
/// <root>/artifacts/<artifact name>
/// <root>/resources/<file name>
/// ```
///
/// Artifacts are keyed by short name only, so two applications sharing a
/// short name share a cache slot.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    /// Opens (and creates if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(ARTIFACT_DIR))?;
        fs::create_dir_all(root.join(RESOURCE_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join(ARTIFACT_DIR).join(checked(name)?))
    }

    pub fn resource_path(&self, file_name: &str) -> Result<PathBuf> {
        Ok(self.root.join(RESOURCE_DIR).join(checked(file_name)?))
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.artifact_path(name)?.is_file())
    }

    pub fn read_artifact(&self, name: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.artifact_path(name)?)?)
    }

    /// Stores an artifact, replacing any previous copy.
    pub fn store_artifact(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.artifact_path(name)?;
        write_replacing(&path, bytes)?;
        debug!("Cached artifact {} ({} bytes)", name, bytes.len());
        Ok(path)
    }

    pub fn store_resource(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.resource_path(file_name)?;
        write_replacing(&path, bytes)?;
        debug!("Stored resource {} ({} bytes)", file_name, bytes.len());
        Ok(path)
    }
}

fn checked(name: &str) -> Result<&str> {
    if is_safe_name(name) {
        Ok(name)
    } else {
        Err(OffloadError::InvalidRequest(format!("unsafe cache name '{}'", name)))
    }
}

/// Writes next to the target and renames, so readers never see a partial file.
fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_read_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();

        assert!(!cache.contains("App").unwrap());
        cache.store_artifact("App", b"offload.define()").unwrap();
        assert!(cache.contains("App").unwrap());
        assert_eq!(cache.read_artifact("App").unwrap(), b"offload.define()");
    }

    #[test]
    fn test_store_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();

        cache.store_artifact("App", b"v1").unwrap();
        cache.store_artifact("App", b"v2").unwrap();
        assert_eq!(cache.read_artifact("App").unwrap(), b"v2");
    }

    #[test]
    fn test_resources_live_apart_from_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();

        let path = cache.store_resource("input.txt", b"data").unwrap();
        assert!(path.starts_with(dir.path().join("resources")));
        assert!(!cache.contains("input.txt").unwrap());
    }

    #[test]
    fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();

        assert!(cache.store_artifact("../escape", b"x").is_err());
        assert!(cache.resource_path("..").is_err());
        assert!(cache.contains("a/b").is_err());
    }
}
