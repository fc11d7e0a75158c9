//! Auxiliary cache bundle install (voice cache and similar non-code archives)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::catalog::{find_named_asset, ReleaseManifest};
use super::locator::locate;
use super::{Downloader, Extractor, Transport, UpdateError, UpdateObserver};
use crate::logging::{log_install, log_warning};

/// Download the bundle named `asset_name` and unpack it into `cache_dir`,
/// replacing whatever was there. A single wrapper folder in the archive is
/// collapsed.
pub fn install_cache_bundle(
    manifest: &ReleaseManifest,
    asset_name: &str,
    cache_dir: &Path,
    transport: Arc<dyn Transport>,
    extractor: &dyn Extractor,
    observer: &dyn UpdateObserver,
) -> Result<PathBuf, UpdateError> {
    let asset = find_named_asset(manifest, asset_name).ok_or_else(|| {
        UpdateError::NoQualifyingAsset {
            name: asset_name.to_string(),
        }
    })?;

    let dir_name = cache_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| UpdateError::other("Cache bundle", "cache directory has no name"))?;
    let staging = cache_dir.with_file_name(format!("{}.partial", dir_name));
    let archive = cache_dir.with_file_name(&asset.name);

    let result = fetch_and_unpack(
        &asset.download_url,
        &archive,
        &staging,
        cache_dir,
        transport,
        extractor,
        observer,
    );

    let _ = fs::remove_file(&archive);
    if staging.exists() {
        let _ = fs::remove_dir_all(&staging);
    }

    match &result {
        Ok(_) => {
            log_install(&format!("Cache bundle installed to {:?}", cache_dir));
            observer.on_status("Cache download complete");
        }
        Err(e) => log_warning(&format!("Cache bundle install failed: {}", e)),
    }
    result.map(|_| cache_dir.to_path_buf())
}

fn fetch_and_unpack(
    url: &str,
    archive: &Path,
    staging: &Path,
    cache_dir: &Path,
    transport: Arc<dyn Transport>,
    extractor: &dyn Extractor,
    observer: &dyn UpdateObserver,
) -> Result<(), UpdateError> {
    observer.on_status("Downloading cache bundle...");
    Downloader::new(transport).download(url, archive, &mut |p| observer.on_progress(p))?;

    observer.on_status("Extracting cache bundle...");
    extractor.extract(archive, staging)?;

    let payload = locate(staging, &[]);

    if cache_dir.exists() {
        fs::remove_dir_all(cache_dir)
            .map_err(|e| UpdateError::other(format!("Clearing {:?}", cache_dir), e))?;
    }
    fs::rename(&payload, cache_dir)
        .map_err(|e| UpdateError::other(format!("Moving cache into {:?}", cache_dir), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::testing::{manifest_with, MemoryTransport, TreeExtractor};
    use crate::update::{ChannelObserver, ErrorKind};

    fn transport() -> Arc<dyn Transport> {
        Arc::new(
            MemoryTransport::new().with_file("memory://ProductTTSCache.zip", vec![0u8; 2048]),
        )
    }

    #[test]
    fn single_wrapper_is_collapsed() {
        let root = tempfile::tempdir().unwrap();
        let cache_dir = root.path().join("ProductTTSCache");
        fs::create_dir_all(&cache_dir).unwrap();
        fs::write(cache_dir.join("stale.bin"), "old").unwrap();

        let extractor = TreeExtractor::new(&[
            ("ProductTTSCache/voice_a.bin", "a"),
            ("ProductTTSCache/voices/voice_b.bin", "b"),
        ]);
        let (observer, _rx) = ChannelObserver::new();

        let installed = install_cache_bundle(
            &manifest_with(&["Product.zip", "ProductTTSCache.zip"]),
            "ProductTTSCache.zip",
            &cache_dir,
            transport(),
            &extractor,
            &observer,
        )
        .unwrap();

        assert_eq!(installed, cache_dir);
        assert_eq!(fs::read_to_string(cache_dir.join("voice_a.bin")).unwrap(), "a");
        assert!(cache_dir.join("voices").join("voice_b.bin").exists());
        assert!(!cache_dir.join("stale.bin").exists());
        assert!(!root.path().join("ProductTTSCache.zip").exists());
        assert!(!root.path().join("ProductTTSCache.partial").exists());
    }

    #[test]
    fn flat_archive_is_used_as_is() {
        let root = tempfile::tempdir().unwrap();
        let cache_dir = root.path().join("ProductTTSCache");
        let extractor = TreeExtractor::new(&[("a.bin", "a"), ("b.bin", "b")]);
        let (observer, _rx) = ChannelObserver::new();

        install_cache_bundle(
            &manifest_with(&["ProductTTSCache.zip"]),
            "ProductTTSCache.zip",
            &cache_dir,
            transport(),
            &extractor,
            &observer,
        )
        .unwrap();

        assert!(cache_dir.join("a.bin").exists());
        assert!(cache_dir.join("b.bin").exists());
    }

    #[test]
    fn missing_bundle_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let (observer, _rx) = ChannelObserver::new();

        let err = install_cache_bundle(
            &manifest_with(&["Product.zip"]),
            "ProductTTSCache.zip",
            &root.path().join("ProductTTSCache"),
            transport(),
            &TreeExtractor::new(&[]),
            &observer,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoQualifyingAsset);
    }

    #[test]
    fn corrupt_bundle_leaves_no_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let cache_dir = root.path().join("ProductTTSCache");
        let (observer, _rx) = ChannelObserver::new();

        let err = install_cache_bundle(
            &manifest_with(&["ProductTTSCache.zip"]),
            "ProductTTSCache.zip",
            &cache_dir,
            transport(),
            &TreeExtractor::corrupt(),
            &observer,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Extraction);
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
