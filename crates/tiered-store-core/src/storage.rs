//! Filesystem layout and I/O helpers.
//!
//! This module centralizes all filesystem access for the crate. It maps a
//! store root directory to:
//!
//! - Optimized dataset files (for example, `<root>/optimized/sensor-a.parquet`).
//! - Versioned canonical dataset files and their `CURRENT` pointer (for
//!   example, `<root>/canonical/sensor-a/0000000003.json`).
//!
//! Writers that replace files in place go through a write-then-rename
//! sequence so concurrent readers never observe a partially written file.
//! Only the local filesystem is supported, but callers work with a
//! [`StorageLocation`] plus relative paths so another backend could be added
//! without touching them.

mod error;
pub mod layout;
pub mod optimized;

use std::{
    fs::{self, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use snafu::{Backtrace, prelude::*};
use tempfile::NamedTempFile;

pub use error::{BackendError, StorageError};
pub(crate) use error::{AlreadyExistsSnafu, NotFoundSnafu, OtherIoSnafu};
pub use optimized::OptimizedStore;

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Root location of a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    /// A store rooted at the given local filesystem path.
    Local(PathBuf),
}

impl StorageLocation {
    /// Creates a new `StorageLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        StorageLocation::Local(root.into())
    }

    /// Absolute path of `rel` under this location.
    pub fn resolve(&self, rel: &Path) -> PathBuf {
        match self {
            StorageLocation::Local(root) => root.join(rel),
        }
    }
}

fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

/// Suffix of in-flight temp files; never a valid dataset or version file name.
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

/// A streaming output sink that writes to a temp file and renames on finish.
///
/// Serializers stream bytes through the sink's [`Write`] impl. Every sink gets
/// its own uniquely named temp file next to the target, so concurrent writers
/// for the same path never share bytes: each one publishes a complete file and
/// the last rename wins. Nothing is visible at the final path until
/// [`OutputSink::finish`] succeeds; dropping an unfinished sink deletes its
/// temp file.
pub struct OutputSink {
    final_path: PathBuf,
    writer: BufWriter<NamedTempFile>,
}

impl OutputSink {
    /// Open a sink for `rel_path` under `location`, creating parent directories.
    pub fn open(location: &StorageLocation, rel_path: &Path) -> StorageResult<Self> {
        let final_path = location.resolve(rel_path);
        create_parent_dir(&final_path)?;

        let dir = final_path.parent().unwrap_or_else(|| Path::new("."));
        let prefix = match final_path.file_name() {
            Some(name) => format!(".{}.", name.to_string_lossy()),
            None => ".".to_string(),
        };
        let tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(TEMP_FILE_SUFFIX)
            .tempfile_in(dir)
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: dir.display().to_string(),
            })?;

        Ok(Self {
            final_path,
            writer: BufWriter::new(tmp),
        })
    }

    /// Final path the sink commits to.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Path of the temp file currently being written.
    pub fn temp_path(&self) -> &Path {
        self.writer.get_ref().path()
    }

    /// Flush, fsync, and rename into the final location.
    pub fn finish(self) -> StorageResult<()> {
        let tmp_path = self.temp_path().display().to_string();
        let tmp = self
            .writer
            .into_inner()
            .map_err(|e| BackendError::Local(e.into_error()))
            .context(OtherIoSnafu {
                path: tmp_path.clone(),
            })?;

        tmp.as_file()
            .sync_all()
            .map_err(BackendError::Local)
            .context(OtherIoSnafu { path: tmp_path })?;

        tmp.persist(&self.final_path)
            .map_err(|e| BackendError::Local(e.error))
            .context(OtherIoSnafu {
                path: self.final_path.display().to_string(),
            })?;
        Ok(())
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Write `contents` to `rel_path` inside `location` using an atomic write.
///
/// The payload goes to a temporary file next to the target, is synced, and is
/// then renamed into place.
pub fn write_atomic(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let mut sink = OutputSink::open(location, rel_path)?;
    sink.write_all(contents)
        .map_err(BackendError::Local)
        .context(OtherIoSnafu {
            path: sink.temp_path().display().to_string(),
        })?;
    sink.finish()
}

/// Create a *new* file at `rel_path` and write `contents`, failing with
/// [`StorageError::AlreadyExists`] if it exists.
///
/// Used for canonical version files where each version is written once.
pub fn write_new(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = location.resolve(rel_path);
    create_parent_dir(&abs)?;
    let path = abs.display().to_string();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&abs) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(BackendError::Local(e)).context(AlreadyExistsSnafu { path });
        }
        Err(e) => return Err(BackendError::Local(e)).context(OtherIoSnafu { path }),
    };

    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(BackendError::Local)
        .context(OtherIoSnafu { path })
}

/// Read the file at `rel_path` within `location` as a `String`.
///
/// A missing file is reported as [`StorageError::NotFound`].
pub fn read_to_string(location: &StorageLocation, rel_path: &Path) -> StorageResult<String> {
    let abs = location.resolve(rel_path);
    let path = abs.display().to_string();

    match fs::read_to_string(&abs) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(BackendError::Local(e)).context(NotFoundSnafu { path })
        }
        Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu { path }),
    }
}

/// Open an existing file for reading.
///
/// A missing file is reported as [`StorageError::NotFound`].
pub fn open_file(abs: &Path) -> StorageResult<fs::File> {
    let path = abs.display().to_string();
    match fs::File::open(abs) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(BackendError::Local(e)).context(NotFoundSnafu { path })
        }
        Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu { path }),
    }
}

/// Whether a regular file exists at `rel_path`.
///
/// A missing file is `Ok(false)`; any other metadata failure (for example a
/// path component that is not a directory) is an error.
pub fn file_exists(location: &StorageLocation, rel_path: &Path) -> StorageResult<bool> {
    let abs = location.resolve(rel_path);
    match fs::metadata(&abs) {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu {
            path: abs.display().to_string(),
        }),
    }
}

/// Remove the file at `rel_path`. Missing files are not an error.
pub fn remove_file(location: &StorageLocation, rel_path: &Path) -> StorageResult<()> {
    let abs = location.resolve(rel_path);
    match fs::remove_file(&abs) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::OtherIo {
            path: abs.display().to_string(),
            source: BackendError::Local(e),
            backtrace: Backtrace::capture(),
        }),
    }
}

/// List file names (not paths) directly under the directory `rel_dir`.
///
/// A missing directory yields an empty list.
pub fn list_file_names(location: &StorageLocation, rel_dir: &Path) -> StorageResult<Vec<String>> {
    let abs = location.resolve(rel_dir);
    let path = abs.display().to_string();

    let entries = match fs::read_dir(&abs) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BackendError::Local(e)).context(OtherIoSnafu { path }),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(BackendError::Local)
            .context(OtherIoSnafu { path: path.clone() })?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}
