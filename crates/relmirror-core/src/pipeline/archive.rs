//! Archive detection and extraction
//!
//! Extraction is blocking and meant to run on `spawn_blocking`.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

use crate::Error;

/// Archive formats the pipeline unpacks for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Detect the archive format from an asset file name
    pub fn detect(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

/// Unpack `archive` into `dest`, creating `dest` if needed
///
/// Entries that would land outside `dest` are skipped. `cancel` is checked
/// before every entry; a cancelled extraction returns [`Error::Cancelled`]
/// and leaves whatever was already written.
pub fn extract(
    kind: ArchiveKind,
    archive: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    fs::create_dir_all(dest)?;
    match kind {
        ArchiveKind::Zip => extract_zip(archive, dest, cancel),
        ArchiveKind::TarGz => extract_tar_gz(archive, dest, cancel),
    }
}

fn check_cancelled(cancel: &CancellationToken, archive: &Path) -> Result<(), Error> {
    if cancel.is_cancelled() {
        return Err(Error::cancelled(format!(
            "extraction of {} cancelled",
            archive.display()
        )));
    }
    Ok(())
}

fn extract_tar_gz(archive: &Path, dest: &Path, cancel: &CancellationToken) -> Result<(), Error> {
    let tar_error = |e: io::Error| {
        Error::archive(format!(
            "Failed to extract tar.gz archive {}: {}",
            archive.display(),
            e
        ))
    };

    let decoder = GzDecoder::new(File::open(archive)?);
    let mut tar = tar::Archive::new(decoder);
    tar.set_overwrite(true);

    for entry in tar.entries().map_err(tar_error)? {
        check_cancelled(cancel, archive)?;
        let mut entry = entry.map_err(tar_error)?;
        if !entry.unpack_in(dest).map_err(tar_error)? {
            tracing::warn!(
                "Skipping unsafe tar entry '{}'",
                entry.path().map(|p| p.display().to_string()).unwrap_or_default()
            );
        }
    }

    Ok(())
}

fn extract_zip(archive: &Path, dest: &Path, cancel: &CancellationToken) -> Result<(), Error> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;

    for i in 0..zip.len() {
        check_cancelled(cancel, archive)?;
        let mut entry = zip.by_index(i)?;

        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("Skipping unsafe zip entry '{}'", entry.name());
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_detect() {
        assert_eq!(ArchiveKind::detect("tool.zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect("tool-linux.TAR.GZ"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect("tool.tgz"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect("tool.tar.xz"), None);
        assert_eq!(ArchiveKind::detect("tool.exe"), None);
    }

    #[test]
    fn test_extract_tar_gz() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("tool.tar.gz");

        let encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let body = b"\x7fELF-payload";
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, "tool/bin/tool", &body[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = dir.path().join("out");
        extract(ArchiveKind::TarGz, &archive, &dest, &CancellationToken::new()).unwrap();
        assert_eq!(fs::read(dest.join("tool/bin/tool")).unwrap(), body);
    }

    #[test]
    fn test_extract_zip() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("tool.zip");

        let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
        writer.add_directory("tool/", SimpleFileOptions::default()).unwrap();
        writer.start_file("tool/tool.exe", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"MZ\x90\x00").unwrap();
        writer.finish().unwrap();

        let dest = dir.path().join("out");
        extract(ArchiveKind::Zip, &archive, &dest, &CancellationToken::new()).unwrap();
        assert_eq!(fs::read(dest.join("tool/tool.exe")).unwrap(), b"MZ\x90\x00");
    }

    #[test]
    fn test_extract_corrupt_archive_fails() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();

        let err = extract(
            ArchiveKind::Zip,
            &archive,
            &dir.path().join("out"),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }

    #[test]
    fn test_cancelled_extraction_stops() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("tool.zip");

        let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
        writer.start_file("tool.exe", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"MZ\x90\x00").unwrap();
        writer.finish().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let dest = dir.path().join("out");
        let err = extract(ArchiveKind::Zip, &archive, &dest, &cancel).unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dest.join("tool.exe").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_symlink_entry_is_not_walked() {
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("host-binary"), b"\x7fELF-host").unwrap();

        let dir = tempdir().unwrap();
        let archive = dir.path().join("tool.tar.gz");
        let encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder
            .append_link(&mut header, "tool/lib", outside.path())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = dir.path().join("out");
        extract(ArchiveKind::TarGz, &archive, &dest, &CancellationToken::new()).unwrap();

        assert!(fs::symlink_metadata(dest.join("tool/lib")).is_ok());
        assert!(crate::inspect::find_executables(&dest).is_empty());
    }
}
