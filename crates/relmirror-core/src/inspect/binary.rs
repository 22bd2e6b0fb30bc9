//! Executable format detection by magic bytes

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Number of leading bytes examined
const MAGIC_LEN: usize = 4;

const MAGIC_PE: [u8; 2] = [0x4D, 0x5A];
const MAGIC_ELF: [u8; 4] = [0x7F, 0x45, 0x4C, 0x46];
const MAGIC_MACHO: [[u8; 4]; 4] = [
    [0xFE, 0xED, 0xFA, 0xCE],
    [0xFE, 0xED, 0xFA, 0xCF],
    [0xCE, 0xFA, 0xED, 0xFE],
    [0xCF, 0xFA, 0xED, 0xFE],
];

/// Executable container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    Unknown,
    /// Windows Portable Executable (MZ header)
    Pe,
    Elf,
    MachO,
}

impl BinaryKind {
    /// Classify a 4-byte header
    pub fn from_magic(magic: &[u8; MAGIC_LEN]) -> Self {
        if magic[..2] == MAGIC_PE {
            BinaryKind::Pe
        } else if *magic == MAGIC_ELF {
            BinaryKind::Elf
        } else if MAGIC_MACHO.iter().any(|m| m == magic) {
            BinaryKind::MachO
        } else {
            BinaryKind::Unknown
        }
    }

    /// Whether the format runs on Linux
    pub fn is_linux(self) -> bool {
        self == BinaryKind::Elf
    }
}

/// Classify a file by its first four bytes
///
/// Unreadable files and files shorter than four bytes are `Unknown`.
pub fn classify(path: &Path) -> BinaryKind {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!("Cannot open {} for inspection: {}", path.display(), e);
            return BinaryKind::Unknown;
        }
    };

    let mut magic = [0u8; MAGIC_LEN];
    match file.read_exact(&mut magic) {
        Ok(()) => BinaryKind::from_magic(&magic),
        Err(_) => BinaryKind::Unknown,
    }
}

/// A discovered executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub path: PathBuf,
    pub kind: BinaryKind,
}

/// Walk `root` and return every regular file that classifies as an executable
///
/// Symbolic links are never followed, so the walk stays inside `root` even
/// when an unpacked archive links to absolute paths. Unreadable entries are
/// skipped.
pub fn find_executables(root: &Path) -> Vec<Executable> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Cannot read entry under {}: {}", root.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let kind = classify(entry.path());
            (kind != BinaryKind::Unknown).then(|| Executable {
                path: entry.into_path(),
                kind,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(path: &Path, bytes: &[u8]) {
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_classify_magic() {
        let dir = tempdir().unwrap();

        let elf = dir.path().join("elf");
        write(&elf, &[0x7F, 0x45, 0x4C, 0x46, 0x02, 0x01]);
        assert_eq!(classify(&elf), BinaryKind::Elf);

        let pe = dir.path().join("pe.exe");
        write(&pe, &[0x4D, 0x5A, 0x90, 0x00]);
        assert_eq!(classify(&pe), BinaryKind::Pe);

        for (i, magic) in MAGIC_MACHO.iter().enumerate() {
            let macho = dir.path().join(format!("macho{}", i));
            write(&macho, magic);
            assert_eq!(classify(&macho), BinaryKind::MachO);
        }

        let text = dir.path().join("README");
        write(&text, b"hello world");
        assert_eq!(classify(&text), BinaryKind::Unknown);
    }

    #[test]
    fn test_classify_short_or_missing_file_is_unknown() {
        let dir = tempdir().unwrap();

        let short = dir.path().join("short");
        write(&short, &[0x4D, 0x5A]);
        assert_eq!(classify(&short), BinaryKind::Unknown);

        assert_eq!(classify(&dir.path().join("missing")), BinaryKind::Unknown);
    }

    #[test]
    fn test_find_executables_skips_text() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("bin").join("deep");
        fs::create_dir_all(&nested).unwrap();

        write(&dir.path().join("tool.exe"), &[0x4D, 0x5A, 0x00, 0x00]);
        write(&nested.join("tool"), &[0x7F, 0x45, 0x4C, 0x46]);
        write(&dir.path().join("bin").join("tool-mac"), &[0xCF, 0xFA, 0xED, 0xFE]);
        write(&dir.path().join("README.md"), b"# tool");
        write(&nested.join("LICENSE"), b"MIT License");

        let mut found: Vec<PathBuf> = find_executables(dir.path())
            .into_iter()
            .map(|e| e.path)
            .collect();
        found.sort();

        let mut expected = vec![
            dir.path().join("tool.exe"),
            nested.join("tool"),
            dir.path().join("bin").join("tool-mac"),
        ];
        expected.sort();

        assert_eq!(found, expected);
    }

    #[cfg(unix)]
    #[test]
    fn test_find_executables_survives_symlink_cycle() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        write(&sub.join("tool"), &[0x7F, 0x45, 0x4C, 0x46]);
        std::os::unix::fs::symlink(dir.path(), sub.join("loop")).unwrap();

        let found = find_executables(dir.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, BinaryKind::Elf);
    }

    #[cfg(unix)]
    #[test]
    fn test_find_executables_stays_inside_root() {
        let outside = tempdir().unwrap();
        write(&outside.path().join("host-binary"), &[0x7F, 0x45, 0x4C, 0x46]);

        let dir = tempdir().unwrap();
        let tool = dir.path().join("tool");
        fs::create_dir(&tool).unwrap();
        write(&tool.join("tool"), &[0x7F, 0x45, 0x4C, 0x46]);
        std::os::unix::fs::symlink(outside.path(), tool.join("lib")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("host-binary"),
            tool.join("linked-binary"),
        )
        .unwrap();

        let found: Vec<PathBuf> = find_executables(dir.path())
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(found, vec![tool.join("tool")]);
    }
}
