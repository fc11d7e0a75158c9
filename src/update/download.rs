//! Streaming archive download with progress reporting

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind as IoErrorKind, Read, Write};
use std::path::Path;
use std::sync::Arc;

use super::UpdateError;
use crate::logging::{log_download, log_warning};

const CHUNK_SIZE: usize = 64 * 1024;
/// Progress step when the server sends no Content-Length
const UNKNOWN_SIZE_STEP: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_received: u64,
    pub bytes_total: Option<u64>,
    /// 0-100, only when the total is known
    pub percent: Option<u8>,
}

// ============================================================================
// Transport
// ============================================================================

/// An opened response body
pub struct TransportResponse {
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

/// Opens a byte stream for a URL
pub trait Transport: Send + Sync {
    fn open(&self, url: &str) -> Result<TransportResponse, UpdateError>;
}

#[cfg(feature = "network")]
pub struct UreqTransport {
    agent: ureq::Agent,
    user_agent: String,
}

#[cfg(feature = "network")]
impl UreqTransport {
    pub fn new(user_agent: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(std::time::Duration::from_secs(15))
            .timeout_read(std::time::Duration::from_secs(300))
            .build();
        Self {
            agent,
            user_agent: user_agent.into(),
        }
    }
}

#[cfg(feature = "network")]
impl Transport for UreqTransport {
    fn open(&self, url: &str) -> Result<TransportResponse, UpdateError> {
        let response = self
            .agent
            .get(url)
            .set("User-Agent", &self.user_agent)
            .call()
            .map_err(|e| UpdateError::Download {
                url: url.to_string(),
                offset: None,
                reason: e.to_string(),
            })?;

        let content_length = response
            .header("Content-Length")
            .and_then(|s| s.parse::<u64>().ok());

        Ok(TransportResponse {
            content_length,
            body: Box::new(response.into_reader()),
        })
    }
}

// ============================================================================
// Progress Throttle
// ============================================================================

/// Decides which byte counts are worth reporting
struct ProgressThrottle {
    total: Option<u64>,
    last_percent: Option<u8>,
    next_unknown_mark: u64,
}

impl ProgressThrottle {
    fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            last_percent: None,
            next_unknown_mark: UNKNOWN_SIZE_STEP,
        }
    }

    fn snapshot(&self, received: u64) -> DownloadProgress {
        let percent = self
            .total
            .map(|total| ((received.min(total) * 100) / total) as u8);
        DownloadProgress {
            bytes_received: received,
            bytes_total: self.total,
            percent,
        }
    }

    fn update(&mut self, received: u64) -> Option<DownloadProgress> {
        let progress = self.snapshot(received);
        match progress.percent {
            Some(p) => {
                if self.last_percent == Some(p) {
                    return None;
                }
                self.last_percent = Some(p);
                Some(progress)
            }
            None => {
                if received < self.next_unknown_mark {
                    return None;
                }
                while self.next_unknown_mark <= received {
                    self.next_unknown_mark += UNKNOWN_SIZE_STEP;
                }
                Some(progress)
            }
        }
    }

    /// Final report; skipped only if the last report already said 100%
    fn finish(&mut self, received: u64) -> Option<DownloadProgress> {
        let progress = self.snapshot(received);
        if progress.percent.is_some() && self.last_percent == progress.percent {
            return None;
        }
        Some(progress)
    }
}

// ============================================================================
// Downloader
// ============================================================================

pub struct Downloader {
    transport: Arc<dyn Transport>,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Stream `url` into `dest`, returning the number of bytes written.
    /// On any failure the partial file is removed.
    pub fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut dyn FnMut(DownloadProgress),
    ) -> Result<u64, UpdateError> {
        log_download(&format!("Downloading {} -> {:?}", url, dest));

        let result = self.stream_to_file(url, dest, on_progress);
        match &result {
            Ok(bytes) => log_download(&format!("Download complete: {} bytes", bytes)),
            Err(e) => {
                log_warning(&format!("Download failed: {}", e));
                if dest.exists() {
                    let _ = fs::remove_file(dest);
                }
            }
        }
        result
    }

    fn stream_to_file(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut dyn FnMut(DownloadProgress),
    ) -> Result<u64, UpdateError> {
        let download_error = |offset: Option<u64>, reason: String| UpdateError::Download {
            url: url.to_string(),
            offset,
            reason,
        };

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| download_error(None, format!("cannot create {:?}: {}", parent, e)))?;
        }

        let response = self.transport.open(url)?;
        let total = response.content_length;
        let mut reader = response.body;

        let file = File::create(dest)
            .map_err(|e| download_error(None, format!("cannot create {:?}: {}", dest, e)))?;
        let mut writer = BufWriter::new(file);

        let mut throttle = ProgressThrottle::new(total);
        let mut received: u64 = 0;
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err(download_error(Some(received), e.to_string())),
            };

            writer
                .write_all(&buffer[..n])
                .map_err(|e| download_error(Some(received), format!("write failed: {}", e)))?;
            received += n as u64;

            if let Some(progress) = throttle.update(received) {
                on_progress(progress);
            }
        }

        writer
            .flush()
            .map_err(|e| download_error(Some(received), format!("flush failed: {}", e)))?;

        if let Some(expected) = total {
            if received != expected {
                return Err(download_error(
                    Some(received),
                    format!("expected {} bytes, received {}", expected, received),
                ));
            }
        }

        if let Some(progress) = throttle.finish(received) {
            on_progress(progress);
        }

        Ok(received)
    }
}
