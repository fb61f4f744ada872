//! On-board storage access.
//!
//! The session layer only needs to open files for reading and to enumerate
//! a directory. [`FileSystem`] captures exactly that; [`LocalFileSystem`]
//! maps device paths onto a directory of the host.

use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Directory holding the flight logs, relative to the storage root.
pub const FLIGHTS_DIR: &str = "flights";

/// File name extension of flight logs.
pub const FLIGHT_EXTENSION: &str = ".rec";

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name, without directory.
    pub name: String,
    /// Entry kind.
    pub kind: EntryKind,
    /// Size in bytes, saturated to `u32::MAX`.
    pub size: u32,
}

impl DirEntry {
    /// Whether this entry is a flight log file.
    #[must_use]
    pub fn is_flight_log(&self) -> bool {
        self.kind == EntryKind::File && is_flight_log(&self.name)
    }
}

/// Whether a file name carries the flight log extension.
///
/// A name consisting of the extension alone does not count.
#[must_use]
pub fn is_flight_log(name: &str) -> bool {
    name.len() > FLIGHT_EXTENSION.len() && name.ends_with(FLIGHT_EXTENSION)
}

/// Device path of the flight log with the given file name.
#[must_use]
pub fn flight_path(name: &str) -> PathBuf {
    Path::new(FLIGHTS_DIR).join(name)
}

/// Read-only file system primitives used by the session layer.
///
/// Handles are released when the returned values are dropped.
pub trait FileSystem {
    /// An open file.
    type File: Read;
    /// An open directory, yielding its entries.
    type Dir: Iterator<Item = io::Result<DirEntry>>;

    /// Open a file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    fn open(&self, path: &Path) -> io::Result<Self::File>;

    /// Open a directory for enumeration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory does not exist or cannot be read.
    fn open_dir(&self, path: &Path) -> io::Result<Self::Dir>;
}

/// A [`FileSystem`] rooted at a host directory.
///
/// Device paths are relative; absolute paths and `..` components are
/// rejected so nothing outside the root is reachable.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    /// Create a file system rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The host directory backing this file system.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root and its flight directory if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn ensure_layout(&self) -> Result<()> {
        let flights = self.root.join(FLIGHTS_DIR);
        if !flights.exists() {
            debug!("Creating flight directory {}", flights.display());
            fs::create_dir_all(&flights).map_err(|source| Error::DirectoryCreate {
                path: flights.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("path {} escapes the storage root", path.display()),
                    ))
                }
            }
        }
        Ok(resolved)
    }
}

impl FileSystem for LocalFileSystem {
    type File = fs::File;
    type Dir = LocalDir;

    fn open(&self, path: &Path) -> io::Result<Self::File> {
        fs::File::open(self.resolve(path)?)
    }

    fn open_dir(&self, path: &Path) -> io::Result<Self::Dir> {
        Ok(LocalDir {
            inner: fs::read_dir(self.resolve(path)?)?,
        })
    }
}

/// An open directory of a [`LocalFileSystem`].
#[derive(Debug)]
pub struct LocalDir {
    inner: fs::ReadDir,
}

impl Iterator for LocalDir {
    type Item = io::Result<DirEntry>;

    /// Entries whose names are not UTF-8 cannot be named on the link and
    /// are skipped.
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    debug!(name = ?raw, "Skipping entry with a non UTF-8 name");
                    continue;
                }
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => return Some(Err(e)),
            };
            return Some(Ok(DirEntry {
                name,
                kind: if metadata.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                size: u32::try_from(metadata.len()).unwrap_or(u32::MAX),
            }));
        }
    }
}

/// File system wrappers for tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Counts handles opened through it and how many are still alive.
    ///
    /// Files can be made to fail after a number of bytes, like a card that
    /// goes bad in the middle of a read.
    #[derive(Debug, Clone)]
    pub(crate) struct CountingFileSystem<F> {
        inner: F,
        opened: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
        read_limit: Option<usize>,
    }

    impl<F> CountingFileSystem<F> {
        pub(crate) fn new(inner: F) -> Self {
            Self {
                inner,
                opened: Arc::new(AtomicUsize::new(0)),
                live: Arc::new(AtomicUsize::new(0)),
                read_limit: None,
            }
        }

        /// Make every file opened from now on fail once `limit` bytes have
        /// been read from it.
        pub(crate) fn fail_reads_after(&mut self, limit: usize) {
            self.read_limit = Some(limit);
        }

        pub(crate) fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        pub(crate) fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        fn track<T>(&self, inner: T) -> Tracked<T> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            Tracked {
                inner,
                live: Arc::clone(&self.live),
                readable: self.read_limit,
            }
        }
    }

    #[derive(Debug)]
    pub(crate) struct Tracked<T> {
        inner: T,
        live: Arc<AtomicUsize>,
        readable: Option<usize>,
    }

    impl<T> Drop for Tracked<T> {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl<T: Read> Read for Tracked<T> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(readable) = self.readable else {
                return self.inner.read(buf);
            };
            if readable == 0 && !buf.is_empty() {
                return Err(io::Error::new(io::ErrorKind::Other, "read failed"));
            }
            let len = buf.len().min(readable);
            let read = self.inner.read(&mut buf[..len])?;
            self.readable = Some(readable - read);
            Ok(read)
        }
    }

    impl<T: Iterator> Iterator for Tracked<T> {
        type Item = T::Item;

        fn next(&mut self) -> Option<Self::Item> {
            self.inner.next()
        }
    }

    impl<F: FileSystem> FileSystem for CountingFileSystem<F> {
        type File = Tracked<F::File>;
        type Dir = Tracked<F::Dir>;

        fn open(&self, path: &Path) -> io::Result<Self::File> {
            self.inner.open(path).map(|file| self.track(file))
        }

        fn open_dir(&self, path: &Path) -> io::Result<Self::Dir> {
            self.inner.open_dir(path).map(|dir| self.track(dir))
        }
    }
}
