use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Name of the exclusive lock file in the data directory.
pub const LOCK_FILE: &str = "LOCK";

/// Name of the manifest in the data directory.
pub const MANIFEST_FILE: &str = "MANIFEST";

pub const WAL_EXT: &str = "wal";
pub const SST_EXT: &str = "sst";

pub fn wal_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id:06}.{WAL_EXT}"))
}

pub fn sst_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id:06}.{SST_EXT}"))
}

/// List `NNNNNN.<ext>` files in `dir`, sorted by id. Anything else is ignored.
pub fn list_numbered(dir: &Path, ext: &str) -> io::Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().is_none_or(|e| e != ext) {
            continue;
        }
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(id) = id {
            files.push((id, path));
        }
    }
    files.sort_by_key(|(id, _)| *id);
    Ok(files)
}

/// Make directory entries (new, renamed or removed files) durable.
///
/// Without this a freshly created file may be missing from the directory
/// listing after a crash even though its contents were fsynced.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
