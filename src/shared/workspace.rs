use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("path '{0}' is outside the working directory")]
    Escape(String),

    #[error("file not found: {0}")]
    Missing(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub relative: String,
    pub modified: SystemTime,
}

/// File access scoped to the working directory.
///
/// Handlers only ever see this type, so anything they can do to the disk is
/// listed here: read, create, overwrite, append. There is no remove.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_err(&self.root, e))
    }

    /// Resolves a path relative to the root. Absolute paths are accepted only
    /// when they already point inside the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative.trim());
        let relative_part = if candidate.is_absolute() {
            candidate
                .strip_prefix(&self.root)
                .map_err(|_| WorkspaceError::Escape(relative.to_string()))?
        } else {
            candidate
        };

        let mut full = self.root.clone();
        for component in relative_part.components() {
            match component {
                Component::Normal(segment) => full.push(segment),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(WorkspaceError::Escape(relative.to_string()));
                }
            }
        }
        Ok(full)
    }

    /// Maps a client path such as `/data/notes.txt` onto the workspace when it
    /// sits under `prefix`. Returns `None` for anything else, including any
    /// path carrying a `..` component.
    pub fn resolve_public(&self, path: &str, prefix: &str) -> Option<PathBuf> {
        let rest = path.strip_prefix(prefix)?;
        if rest.is_empty() {
            return None;
        }
        if Path::new(rest)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        self.resolve(rest).ok()
    }

    /// Follows symlinks in `path` and returns the real location when it is
    /// still inside the root, `None` when it escapes.
    pub async fn confine(&self, path: &Path) -> std::io::Result<Option<PathBuf>> {
        let root = fs::canonicalize(&self.root).await?;
        let real = fs::canonicalize(path).await?;
        Ok(real.starts_with(&root).then_some(real))
    }

    pub async fn exists(&self, relative: &str) -> bool {
        match self.resolve(relative) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Resolves `relative` and fails with `Missing` when nothing is there.
    pub async fn require(&self, relative: &str) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(WorkspaceError::Missing(relative.to_string()));
        }
        Ok(path)
    }

    pub async fn read_to_string(&self, relative: &str) -> Result<String> {
        let path = self.require(relative).await?;
        fs::read_to_string(&path).await.map_err(|e| io_err(&path, e))
    }

    pub async fn read_bytes(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.require(relative).await?;
        fs::read(&path).await.map_err(|e| io_err(&path, e))
    }

    /// Creates or overwrites a file, creating parent directories as needed.
    pub async fn write(&self, relative: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        self.create_parent(&path).await?;
        fs::write(&path, contents.as_ref())
            .await
            .map_err(|e| io_err(&path, e))?;
        debug!(path = %path.display(), bytes = contents.as_ref().len(), "workspace write");
        Ok(path)
    }

    pub async fn append(&self, relative: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        self.create_parent(&path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_err(&path, e))?;
        file.write_all(contents.as_ref())
            .await
            .map_err(|e| io_err(&path, e))?;
        Ok(path)
    }

    pub async fn create_dir(&self, relative: &str) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        fs::create_dir_all(&path)
            .await
            .map_err(|e| io_err(&path, e))?;
        Ok(path)
    }

    /// Lists regular files directly under `dir` whose name ends with
    /// `extension`, with their modification times.
    pub async fn list_files(&self, dir: &str, extension: &str) -> Result<Vec<FileEntry>> {
        let path = self.require(dir).await?;
        let mut entries = fs::read_dir(&path).await.map_err(|e| io_err(&path, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&path, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(extension) {
                continue;
            }
            let metadata = entry.metadata().await.map_err(|e| io_err(&entry.path(), e))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().map_err(|e| io_err(&entry.path(), e))?;
            let relative = Path::new(dir).join(&name).to_string_lossy().to_string();
            files.push(FileEntry { relative, modified });
        }
        Ok(files)
    }

    async fn create_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        Ok(())
    }
}

fn io_err(path: &Path, source: std::io::Error) -> WorkspaceError {
    WorkspaceError::Io {
        path: path.display().to_string(),
        source,
    }
}
