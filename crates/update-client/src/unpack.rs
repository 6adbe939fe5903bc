//! Overlay unpack of a package archive into its destination.

use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use zip::ZipArchive;

use crate::UpdateError;

/// Stages `payload` in a fresh temporary file and unpacks it into `dest`.
///
/// Files at the same relative paths are replaced; files missing from the
/// archive are left alone. Entries that would land outside `dest` fail the
/// whole package. Blocking: call from a blocking worker.
pub(crate) fn overlay_unpack(payload: &[u8], dest: &Path) -> Result<(), UpdateError> {
    let mut staged = tempfile::Builder::new()
        .prefix("devlink-")
        .suffix(".zip")
        .tempfile()?;
    staged.write_all(payload)?;
    staged.flush()?;
    staged.seek(SeekFrom::Start(0))?;

    fs::create_dir_all(dest)?;

    let mut archive = ZipArchive::new(staged.as_file_mut())?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(UpdateError::Unpack(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("entry escapes destination: {}", entry.name()),
            )));
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out).map_err(UpdateError::Unpack)?;
    }

    tracing::debug!(
        dest = %dest.display(),
        entries = archive.len(),
        bytes = payload.len(),
        "package unpacked"
    );
    Ok(())
}

/// Zip archive of `files` as the transfer server would send it.
#[cfg(test)]
pub(crate) fn zip_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (path, content) in files {
        writer.start_file(path.to_string(), options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
