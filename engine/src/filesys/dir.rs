//! Directory operations

use std::path::{Component, Path, PathBuf};

use tokio::fs;

use crate::errors::EngineError;
use crate::filesys::file::File;

/// A directory that only hands out paths beneath itself
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory and its parents
    pub async fn create(&self) -> Result<(), EngineError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// File directly inside this directory; `name` is trusted
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Child directory named by a single path component
    pub fn child(&self, name: &str) -> Option<Dir> {
        let name = name.trim();
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !name.contains('\\') => {
                Some(Dir::new(self.path.join(name)))
            }
            _ => None,
        }
    }

    /// File at a relative path that stays beneath this directory
    pub fn nested_file(&self, relative: &str) -> Option<File> {
        let relative = relative.trim();
        let path = Path::new(relative);
        let contained = !relative.is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        contained.then(|| File::new(self.path.join(path)))
    }
}
