//! Sketch files on disk.
//!
//! Every path is relative to the workspace root and may not leave it.

use std::path::{Component, Path, PathBuf};

use async_recursion::async_recursion;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Error;

/// A file or directory in the workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entry {
    /// A file.
    File {
        /// The file name.
        name: String,

        /// Relative to the workspace root.
        path: String,
    },

    /// A directory and everything below it.
    Directory {
        /// The directory name.
        name: String,

        /// Relative to the workspace root.
        path: String,

        /// Sorted by name.
        children: Vec<Entry>,
    },
}

impl Entry {
    /// The entry's name.
    pub fn name(&self) -> &str {
        match self {
            Entry::File { name, .. } | Entry::Directory { name, .. } => name,
        }
    }
}

/// A directory holding sketches.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

fn storage_error(what: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Storage(format!("Could not {what} {path:?}: {e}"))
}

impl Workspace {
    /// A workspace rooted here.
    /// The directory is created when first needed.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Where the workspace lives.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Turn a workspace path into a path on disk.
    ///
    /// Absolute paths are accepted if they point inside the workspace.
    fn resolve(&self, path: &str) -> Result<PathBuf, Error> {
        let requested = Path::new(path);

        let relative = if requested.is_absolute() {
            requested
                .strip_prefix(&self.root)
                .map_err(|_| Error::Storage(format!("`{path}` is outside the workspace")))?
        } else {
            requested
        };

        let mut resolved = self.root.clone();
        let mut depth = 0;

        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::Storage(format!(
                        "`{path}` is outside the workspace"
                    )));
                }
            }
        }

        if depth == 0 {
            return Err(Error::Storage(format!("`{path}` does not name a file")));
        }

        Ok(resolved)
    }

    /// Write a file, creating directories as needed.
    pub async fn save(&self, path: &str, content: &str) -> Result<(), Error> {
        let file = self.resolve(path)?;

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("create", parent, e))?;
        }

        tokio::fs::write(&file, content)
            .await
            .map_err(|e| storage_error("write", &file, e))?;

        info!(?file, bytes = content.len(), "Saved");
        Ok(())
    }

    /// Read a file.
    pub async fn read(&self, path: &str) -> Result<String, Error> {
        let file = self.resolve(path)?;

        let content = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| storage_error("read", &file, e))?;

        debug!(?file, bytes = content.len(), "Read");
        Ok(content)
    }

    /// Everything in the workspace.
    pub async fn list(&self) -> Result<Vec<Entry>, Error> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| storage_error("create", &self.root, e))?;

        list_dir(&self.root, Path::new("")).await
    }
}

#[async_recursion]
async fn list_dir(dir: &Path, relative: &Path) -> Result<Vec<Entry>, Error> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| storage_error("list", dir, e))?;

    let mut entries = vec![];

    while let Some(item) = reader
        .next_entry()
        .await
        .map_err(|e| storage_error("list", dir, e))?
    {
        let name = item.file_name().to_string_lossy().into_owned();
        let path = relative.join(&name);
        let file_type = item
            .file_type()
            .await
            .map_err(|e| storage_error("inspect", &item.path(), e))?;

        let entry = if file_type.is_dir() {
            Entry::Directory {
                children: list_dir(&item.path(), &path).await?,
                name,
                path: path.to_string_lossy().into_owned(),
            }
        } else {
            Entry::File {
                name,
                path: path.to_string_lossy().into_owned(),
            }
        };

        entries.push(entry);
    }

    entries.sort_by(|a, b| a.name().cmp(b.name()));

    Ok(entries)
}
