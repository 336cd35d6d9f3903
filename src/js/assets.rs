// Asset resolution - where guest script paths point on disk

use std::io;
use std::path::{Path, PathBuf};

/// Root directory that guest-visible script paths are relative to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRoot {
    root: PathBuf,
}

impl AssetRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Map a guest path onto the filesystem. Absolute paths are used as is.
    pub fn resolve(&self, script: impl AsRef<Path>) -> PathBuf {
        let script = script.as_ref();
        if script.is_absolute() {
            script.to_path_buf()
        } else {
            self.root.join(script)
        }
    }

    /// Whether `script` names an existing file
    pub fn exists(&self, script: impl AsRef<Path>) -> bool {
        self.resolve(script).is_file()
    }

    /// Read a script as UTF-8 text
    pub fn read(&self, script: impl AsRef<Path>) -> io::Result<String> {
        std::fs::read_to_string(self.resolve(script))
    }
}

impl Default for AssetRoot {
    fn default() -> Self {
        Self::new(".")
    }
}
