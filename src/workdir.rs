use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Run-scoped scratch directory for split files, count files, LTR finder
/// output and disk stores. Removed on [`WorkDir::close`] or drop.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    /// Create a unique `gum-XXXXXX` directory under `parent`
    pub fn create(parent: &Path) -> io::Result<Self> {
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix("gum-").tempdir_in(parent)?;
        debug!("Working directory: {}", dir.path().display());

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create (if needed) and return a nested directory
    pub fn subdir(&self, name: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Remove the directory and everything in it
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }

    /// Leave the directory on disk and return its path
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}
