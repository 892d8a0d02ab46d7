use std::io::{BufRead, BufReader, Seek, SeekFrom};

/// Reads from a file, applies the given reader function, and rewinds the file cursor to the start.
///
/// Returns `Ok(None)` if the file is `None`.
pub fn read_and_rewind<T, R>(
    file: Option<&mut R>,
    reader: impl FnOnce(&mut R) -> std::io::Result<T>,
) -> std::io::Result<Option<T>>
where
    R: BufRead + Seek,
{
    let Some(f) = file else {
        return Ok(None);
    };
    let result = reader(f);
    // rewind even when parsing failed
    f.seek(SeekFrom::Start(0))?;
    result.map(Some)
}

/// Opens `path` for repeated reads, or `None` if it does not exist or cannot be opened.
#[inline]
pub fn open_file(path: impl AsRef<std::path::Path>) -> Option<BufReader<std::fs::File>> {
    Some(BufReader::new(std::fs::File::open(path).ok()?))
}
