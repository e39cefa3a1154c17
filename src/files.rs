//! Flat on-disk blob storage for uploaded and rendered PDFs. Names are
//! opaque references handed out by the callers; there is no directory
//! structure below the root.

use crate::Error;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub async fn store(&self, name: &str, contents: &[u8]) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(name), contents).await?;
        Ok(())
    }

    pub async fn retrieve(&self, name: &str) -> Result<Vec<u8>, Error> {
        match tokio::fs::read(self.path_for(name)).await {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound("file")),
            Err(err) => Err(err.into()),
        }
    }

    /// Removing a name that is already gone is not an error.
    pub async fn remove(&self, name: &str) -> Result<(), Error> {
        match tokio::fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn exists(&self, name: &str) -> bool {
        tokio::fs::metadata(self.path_for(name)).await.is_ok()
    }
}
