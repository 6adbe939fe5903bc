//! Packs a bundle directory into the zip payload of a file frame.

use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::Path;

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Builds a zip archive of everything under `dir`.
///
/// Entry names are relative to `dir` with `/` separators, so the client
/// unpacks them straight into its destination for the package. Entries are
/// written in name order.
pub fn pack_directory(dir: &Path) -> io::Result<Vec<u8>> {
    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("bundle directory not found: {}", dir.display()),
        ));
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    add_directory(&mut writer, dir, "", options)?;
    let bytes = writer.finish().map_err(io::Error::other)?.into_inner();

    tracing::debug!(dir = %dir.display(), bytes = bytes.len(), "packed bundle");
    Ok(bytes)
}

fn add_directory(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("non UTF-8 file name: {}", entry.path().display()),
            ));
        };
        let name = format!("{prefix}{file_name}");
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let nested = format!("{name}/");
            writer
                .add_directory(nested.clone(), options)
                .map_err(io::Error::other)?;
            add_directory(writer, &entry.path(), &nested, options)?;
        } else if file_type.is_file() {
            writer.start_file(name, options).map_err(io::Error::other)?;
            io::copy(&mut File::open(entry.path())?, writer)?;
        } else {
            tracing::debug!(path = %entry.path().display(), "skipping special file");
        }
    }
    Ok(())
}
