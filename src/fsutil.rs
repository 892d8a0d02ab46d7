use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

/// Error that occurs when opening a file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to open file `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Error that occurs when reading a file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to read file `{path}`: {source}")]
pub struct FileReadError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Error that occurs when writing a file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to write file `{path}`: {source}")]
pub struct FileWriteError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl FileReadError {
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == io::ErrorKind::NotFound
    }
}

impl FileWriteError {
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == io::ErrorKind::NotFound
    }
}

/// Opens a file at the given path and wraps it in a [`BufReader`].
///
/// # Errors
///
/// Returns a [`FileOpenError`] if the file cannot be opened.
///
/// # Example
/// ```no_run
/// # use creo_isolation::fsutil;
/// let reader = fsutil::open_file_reader("/proc/self/mountinfo")?;
/// # Ok::<(), fsutil::FileOpenError>(())
/// ```
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileOpenError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FileOpenError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Reads a whole file and strips surrounding whitespace, the usual shape of sysfs and procfs
/// values.
///
/// # Errors
///
/// Returns a [`FileReadError`] if the file cannot be read.
pub fn read_trimmed(path: impl AsRef<Path>) -> Result<String, FileReadError> {
    let path = path.as_ref();
    std::fs::read_to_string(path)
        .map(|content| content.trim().to_owned())
        .map_err(|source| FileReadError {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes `contents` to an existing or new file, truncating it first.
///
/// # Errors
///
/// Returns a [`FileWriteError`] if the file cannot be written.
pub fn write_file(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<(), FileWriteError> {
    let path = path.as_ref();
    std::fs::write(path, contents).map_err(|source| FileWriteError {
        path: path.to_path_buf(),
        source,
    })
}

/// Reports whether `path` exists and is not a directory.
pub fn file_exists(path: impl AsRef<Path>) -> bool {
    std::fs::metadata(path).is_ok_and(|metadata| !metadata.is_dir())
}
