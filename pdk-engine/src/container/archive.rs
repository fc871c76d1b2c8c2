// Tar Archives
// In-memory POSIX tar packing and unpacking for container copy, preserving
// modes and timestamps.

use std::io::Cursor;
use std::path::Path;

/// Pack a single in-memory file into a tar stream.
pub fn pack_bytes(name: &str, mode: u32, data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_mtime(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    );
    header.set_cksum();
    builder.append_data(&mut header, name, data)?;
    builder.into_inner()
}

/// Pack a file or directory from disk into a tar stream rooted at `arc_name`.
/// File modes and modification times come from the filesystem.
pub fn pack_path(source: &Path, arc_name: &str) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    if source.is_dir() {
        builder.append_dir_all(arc_name, source)?;
    } else {
        builder.append_path_with_name(source, arc_name)?;
    }
    builder.into_inner()
}

/// Unpack a tar stream under `dest`, preserving modes and timestamps.
pub fn unpack(tar_bytes: &[u8], dest: &Path) -> std::io::Result<()> {
    let mut archive = tar::Archive::new(Cursor::new(tar_bytes));
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.unpack(dest)?;
    Ok(())
}
