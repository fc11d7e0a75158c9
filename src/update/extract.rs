//! Archive extraction

use std::fs;
use std::io::Read;
use std::path::Path;

use super::UpdateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    Tar,
    SevenZ,
}

impl ArchiveFormat {
    /// Detect from the file name, falling back to the leading magic bytes
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".zip") {
            return Some(ArchiveFormat::Zip);
        }
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            return Some(ArchiveFormat::TarGz);
        }
        if name.ends_with(".tar") {
            return Some(ArchiveFormat::Tar);
        }
        if name.ends_with(".7z") {
            return Some(ArchiveFormat::SevenZ);
        }

        Self::sniff(path)
    }

    fn sniff(path: &Path) -> Option<Self> {
        let mut header = [0u8; 6];
        let mut file = fs::File::open(path).ok()?;
        let n = file.read(&mut header).ok()?;
        let header = &header[..n];

        if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
            Some(ArchiveFormat::Zip)
        } else if header.starts_with(&[0x1f, 0x8b]) {
            Some(ArchiveFormat::TarGz)
        } else if header.starts_with(&[b'7', b'z', 0xbc, 0xaf, 0x27, 0x1c]) {
            Some(ArchiveFormat::SevenZ)
        } else {
            None
        }
    }
}

/// Unpacks an archive into a directory
pub trait Extractor: Send + Sync {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<(), UpdateError>;
}

/// Extractor backed by zip/tar/flate2/sevenz-rust
#[cfg(feature = "archives")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveExtractor;

#[cfg(feature = "archives")]
impl Extractor for ArchiveExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<(), UpdateError> {
        let extraction_error = |reason: String| UpdateError::Extraction {
            archive: archive.display().to_string(),
            reason,
        };

        let format = ArchiveFormat::detect(archive)
            .ok_or_else(|| extraction_error("unrecognised archive format".to_string()))?;

        // Leftovers from an earlier attempt would be merged into the payload
        if dest.exists() {
            fs::remove_dir_all(dest).map_err(|e| extraction_error(e.to_string()))?;
        }
        fs::create_dir_all(dest).map_err(|e| extraction_error(e.to_string()))?;

        crate::logging::log_install(&format!(
            "Extracting {:?} ({:?}) to {:?}",
            archive, format, dest
        ));

        match format {
            ArchiveFormat::Zip => {
                let file = fs::File::open(archive).map_err(|e| extraction_error(e.to_string()))?;
                let mut zip =
                    zip::ZipArchive::new(file).map_err(|e| extraction_error(e.to_string()))?;
                zip.extract(dest).map_err(|e| extraction_error(e.to_string()))?;
            }
            ArchiveFormat::TarGz => {
                let file = fs::File::open(archive).map_err(|e| extraction_error(e.to_string()))?;
                let tar = flate2::read::GzDecoder::new(file);
                tar::Archive::new(tar)
                    .unpack(dest)
                    .map_err(|e| extraction_error(e.to_string()))?;
            }
            ArchiveFormat::Tar => {
                let file = fs::File::open(archive).map_err(|e| extraction_error(e.to_string()))?;
                tar::Archive::new(file)
                    .unpack(dest)
                    .map_err(|e| extraction_error(e.to_string()))?;
            }
            ArchiveFormat::SevenZ => {
                sevenz_rust::decompress_file(archive, dest)
                    .map_err(|e| extraction_error(e.to_string()))?;
            }
        }

        Ok(())
    }
}
