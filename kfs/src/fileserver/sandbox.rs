//! Root-confined file access for the user file server.

use std::fs::{File, Metadata};
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use thiserror::Error;
use tracing::error;

/// All failures collapse to this one error: peers of the child must not
/// be able to tell a missing file from an escaping path.
#[derive(Debug, Error)]
#[error("invalid path")]
pub struct InvalidPath;

/// A directory files are only ever opened below.
///
/// The root is canonicalized once at construction. Every open resolves
/// symlinks in the requested path and requires the canonical result to
/// still have the canonical root as a component-wise prefix.
#[derive(Debug)]
pub struct SandboxDir {
    root: PathBuf,
}

/// An opened file, with the canonical path it resolved to.
pub struct Opened {
    pub file: File,
    pub path: PathBuf,
    pub metadata: Metadata,
}

impl SandboxDir {
    /// Create a sandbox rooted at `path`. An empty path means the
    /// current directory.
    pub fn new(path: &str) -> std::io::Result<Self> {
        let path = if path.is_empty() { "." } else { path };
        let root = std::fs::canonicalize(path)?;

        Ok(Self { root })
    }

    /// Canonical root of the sandbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open `name`, a slash-separated request path, read-only.
    pub fn open(&self, name: &str) -> Result<Opened, InvalidPath> {
        if MAIN_SEPARATOR != '/' && name.contains(MAIN_SEPARATOR) {
            error!("invalid character in path: {:?}", name);
            return Err(InvalidPath);
        }

        let full = self.root.join(clean(name));

        let path = std::fs::canonicalize(&full).map_err(|err| {
            error!("canonicalize({}): {}", full.display(), err);
            InvalidPath
        })?;

        // Component-wise prefix check: /root must not admit /rootx/a.
        if !path.starts_with(&self.root) {
            error!(
                "{} is outside of allowed path {}: {}",
                name,
                self.root.display(),
                path.display()
            );
            return Err(InvalidPath);
        }

        let file = File::open(&path).map_err(|err| {
            error!("opening {}: {}", path.display(), err);
            InvalidPath
        })?;

        let metadata = file.metadata().map_err(|err| {
            error!("metadata for {}: {}", path.display(), err);
            InvalidPath
        })?;

        Ok(Opened {
            file,
            path,
            metadata,
        })
    }
}

/// Normalize a request path to a clean relative path: rooted at `/`,
/// with `.`, `..` and duplicate slashes collapsed, so `..` can never
/// climb above the root it is later joined to.
pub(crate) fn clean(name: &str) -> PathBuf {
    let mut parts: Vec<&str> = Vec::new();

    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().unwrap_or("")),
            Component::ParentDir => {
                parts.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }

    parts.iter().collect()
}
