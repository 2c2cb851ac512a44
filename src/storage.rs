// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Storage capability for manifest trees.
//!
//! Every component that touches manifest files does so through a [`Storage`]
//! implementation handed to it at construction. The binary uses
//! [`DiskStorage`], while tests hand out a [`MemoryStorage`] so that whole
//! GitOps repositories can be described in a few lines without touching the
//! real file system.
//!
//! A [`Workspace`] pairs a storage with the root directory of the repository
//! it represents. All manifest source paths are relative to that root.

use crate::path::clean;

use glob::Pattern;
use ignore::WalkBuilder;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};
use tracing::debug;

/// File name patterns considered to be manifest documents.
const MANIFEST_PATTERNS: [&str; 2] = ["*.yaml", "*.yml"];

/// Minimal file system surface needed to resolve and mutate manifest trees.
pub trait Storage {
    /// Read entire file content.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file content, creating missing parent directories.
    fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Remove a single file.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Create directory and all of its missing parents.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Check whether a file or directory exists at path.
    fn exists(&self, path: &Path) -> bool;

    /// List files directly inside a directory, sorted by name.
    ///
    /// A missing directory has no files.
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// List every file below a directory, sorted by path.
    ///
    /// A missing directory has no files.
    fn walk_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Storage backed by the real file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskStorage;

impl DiskStorage {
    /// Construct new disk storage.
    pub fn new() -> Self {
        Self
    }
}

impl Storage for DiskStorage {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => StorageError::NotFound {
                path: path.to_path_buf(),
            },
            _ => StorageError::Read {
                source: err,
                path: path.to_path_buf(),
            },
        })
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }

        fs::write(path, data).map_err(|err| StorageError::Write {
            source: err,
            path: path.to_path_buf(),
        })
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|err| StorageError::Remove {
            source: err,
            path: path.to_path_buf(),
        })
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        mkdirp::mkdirp(path)
            .map(|_| ())
            .map_err(|err| StorageError::CreateDir {
                source: err,
                path: path.to_path_buf(),
            })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StorageError::ReadDir {
                    source: err,
                    path: dir.to_path_buf(),
                })
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| StorageError::ReadDir {
                source: err,
                path: dir.to_path_buf(),
            })?;
            if entry.path().is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        Ok(files)
    }

    fn walk_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        // INVARIANT: Copy everything, so no gitignore or hidden file filtering.
        let walker = WalkBuilder::new(dir)
            .standard_filters(false)
            .follow_links(false)
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|err| StorageError::Walk {
                source: err,
                path: dir.to_path_buf(),
            })?;

            // Never descend into git internals of a cloned repository.
            if entry.path().components().any(|c| c.as_os_str() == ".git") {
                continue;
            }

            if entry.file_type().is_some_and(|kind| kind.is_file()) {
                files.push(entry.into_path());
            }
        }
        files.sort();

        Ok(files)
    }
}

/// Storage kept entirely in memory.
///
/// Paths are normalized with [`clean`] before use, so `apps/../root.yaml` and
/// `root.yaml` refer to the same entry. Directories are implied by the files
/// they contain, plus any created explicitly.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    dirs: Mutex<BTreeSet<PathBuf>>,
}

impl MemoryStorage {
    /// Construct new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct memory storage from a listing of path and content pairs.
    pub fn with_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: AsRef<Path>,
        C: AsRef<[u8]>,
    {
        let storage = Self::new();
        {
            let mut map = storage.files.lock().unwrap_or_else(PoisonError::into_inner);
            for (path, content) in files {
                map.insert(clean(path), content.as_ref().to_vec());
            }
        }

        storage
    }

    /// Snapshot of every stored file path.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn is_dir(&self, path: &Path) -> bool {
        let path = clean(path);
        if self
            .dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&path)
        {
            return true;
        }

        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .any(|file| file.starts_with(&path) && *file != path)
    }
}

impl Storage for MemoryStorage {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&clean(path))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                path: path.to_path_buf(),
            })
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(clean(path), data.to_vec());

        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&clean(path))
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound {
                path: path.to_path_buf(),
            })
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(clean(path));

        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&clean(path))
            || self.is_dir(path)
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let dir = clean(dir);
        Ok(self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|file| file.parent() == Some(dir.as_path()))
            .cloned()
            .collect())
    }

    fn walk_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let dir = clean(dir);
        Ok(self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|file| file.starts_with(&dir) && **file != dir)
            .cloned()
            .collect())
    }
}

/// Repository root paired with the storage that holds it.
#[derive(Debug)]
pub struct Workspace<S = DiskStorage>
where
    S: Storage,
{
    root: PathBuf,
    storage: S,
}

impl<S> Workspace<S>
where
    S: Storage,
{
    /// Construct new workspace rooted at target path.
    pub fn new(root: impl Into<PathBuf>, storage: S) -> Self {
        Self {
            root: root.into(),
            storage,
        }
    }

    /// Root directory of the workspace.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Storage holding the workspace content.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Resolve a repository relative path against the workspace root.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        clean(self.root.join(relative))
    }
}

impl Workspace<DiskStorage> {
    /// Construct new workspace over the real file system.
    pub fn on_disk(root: impl Into<PathBuf>) -> Self {
        Self::new(root, DiskStorage::new())
    }
}

/// Check if file name looks like a manifest document.
pub fn is_manifest_file(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|name| name.to_string_lossy()) else {
        return false;
    };

    MANIFEST_PATTERNS.iter().any(|pattern| {
        Pattern::new(pattern)
            .map(|pattern| pattern.matches(name.as_ref()))
            .unwrap_or(false)
    })
}

/// Replicate a directory tree from one storage into another.
///
/// Existing files at the destination are overwritten, existing directories
/// are reused. Source and destination may be the same storage.
pub fn copy_tree<A, B>(from: &A, src: &Path, to: &B, dst: &Path) -> Result<()>
where
    A: Storage + ?Sized,
    B: Storage + ?Sized,
{
    debug!("copy {} to {}", src.display(), dst.display());
    to.create_dir_all(dst)?;
    for file in from.walk_files(src)? {
        let relative = file
            .strip_prefix(src)
            .or_else(|_| file.strip_prefix(clean(src)))
            .map_err(|_| StorageError::OutsideTree {
                path: file.clone(),
                root: src.to_path_buf(),
            })?;
        let data = from.read(&file)?;
        to.write(&dst.join(relative), &data)?;
    }

    Ok(())
}

/// Storage error types.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Target path does not exist.
    #[error("no such file {:?}", path.display())]
    NotFound { path: PathBuf },

    /// File cannot be read from.
    #[error("failed to read from {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be written to.
    #[error("failed to write to {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory cannot be listed.
    #[error("failed to list directory {:?}", path.display())]
    ReadDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory tree cannot be walked.
    #[error("failed to walk directory {:?}", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },

    /// Walked file does not live under the tree being walked.
    #[error("{:?} is not inside {:?}", path.display(), root.display())]
    OutsideTree { path: PathBuf, root: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = StorageError> = std::result::Result<T, E>;
