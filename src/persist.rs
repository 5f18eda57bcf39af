//! Atomic file replacement shared by the cache, bookmark and library writers.

use crate::error::ReaderError;
use std::fs::File;
use std::io;
use std::path::Path;

/// Write `target` through a temp file in the same directory: `write` fills
/// the file, which is fsynced and then renamed over `target`. Readers see
/// the old content or the new, never a torn write.
pub(crate) fn write_atomic<F>(target: &Path, write: F) -> Result<(), ReaderError>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let persist_err = |source: io::Error| ReaderError::Persistence {
        path: target.to_path_buf(),
        source,
    };
    let dir = target.parent().unwrap_or_else(|| Path::new("."));

    std::fs::create_dir_all(dir).map_err(persist_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(persist_err)?;
    write(tmp.as_file_mut()).map_err(persist_err)?;
    tmp.as_file().sync_all().map_err(persist_err)?;
    tmp.persist(target).map_err(|e| persist_err(e.error))?;
    Ok(())
}
