//! Runtime package directory layout
//!
//! Packages live under `<base>/script/runtime/<runtime>/<version>/`, with a
//! `manifest.json` and any scripts or artifacts it references as siblings.

use std::path::PathBuf;

use shipyard_models::RuntimeType;

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Package layout rooted at a base directory
#[derive(Debug, Clone)]
pub struct PackageLayout {
    /// Directory containing `script/`
    pub base_dir: PathBuf,
}

impl PackageLayout {
    /// Create a new package layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Root of all runtime packages
    pub fn runtime_root(&self) -> Dir {
        Dir::new(self.base_dir.join("script").join("runtime"))
    }

    /// Versioned package directory
    pub fn package_dir(&self, runtime: RuntimeType, version: &str) -> Result<Dir, EngineError> {
        self.runtime_root()
            .child(runtime.as_str())
            .and_then(|dir| dir.child(version))
            .ok_or_else(|| {
                EngineError::ValidationError(format!("invalid package version: {:?}", version.trim()))
            })
    }

    /// Manifest file of a package
    pub fn manifest_file(&self, runtime: RuntimeType, version: &str) -> Result<File, EngineError> {
        Ok(self.package_dir(runtime, version)?.file(MANIFEST_FILE))
    }

    /// A file declared by a manifest, relative to its package directory
    pub fn package_file(&self, package_dir: &Dir, relative: &str) -> Result<File, EngineError> {
        package_dir.nested_file(relative).ok_or_else(|| {
            EngineError::IntegrityError(format!(
                "package file reference escapes the package directory: {:?}",
                relative.trim()
            ))
        })
    }
}
