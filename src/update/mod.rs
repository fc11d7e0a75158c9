//! Self-update pipeline: release check, download, extraction, payload
//! discovery, swap planning and the installer handoff.

pub mod cache;
pub mod catalog;
pub mod download;
pub mod error;
pub mod extract;
pub mod locator;
pub mod orchestrator;
pub mod session;
pub mod swap;

use std::sync::mpsc::{self, Receiver, Sender};

pub use catalog::{
    find_named_asset, is_newer_version, select_variants, AssetDescriptor, ReleaseManifest,
    SelectionRules, UpdateVariant, VariantCatalog,
};
pub use download::{DownloadProgress, Downloader, Transport, TransportResponse};
pub use error::{ErrorKind, UpdateError};
pub use extract::{ArchiveFormat, Extractor};
pub use locator::{locate, PayloadChoice};
pub use orchestrator::{Handoff, InstallerOrchestrator, ProcessControl, SystemProcesses};
pub use session::{Capabilities, CheckOutcome, SessionHandle, SessionState, UpdateSession};
pub use swap::{take_swap_report, SwapPlan, SwapPlanner, SwapReport};

#[cfg(feature = "archives")]
pub use extract::ArchiveExtractor;
#[cfg(feature = "network")]
pub use download::UreqTransport;

// ============================================================================
// Observer
// ============================================================================

/// Receives session notifications. Called from worker threads, in order.
pub trait UpdateObserver: Send + Sync {
    fn on_status(&self, text: &str);
    fn on_progress(&self, progress: DownloadProgress);
    fn on_state_changed(&self, state: SessionState);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    Status(String),
    Progress(DownloadProgress),
    StateChanged(SessionState),
}

/// Forwards notifications to a channel so a UI thread can drain them
pub struct ChannelObserver {
    tx: Sender<UpdateEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<UpdateEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl UpdateObserver for ChannelObserver {
    fn on_status(&self, text: &str) {
        let _ = self.tx.send(UpdateEvent::Status(text.to_string()));
    }

    fn on_progress(&self, progress: DownloadProgress) {
        let _ = self.tx.send(UpdateEvent::Progress(progress));
    }

    fn on_state_changed(&self, state: SessionState) {
        let _ = self.tx.send(UpdateEvent::StateChanged(state));
    }
}

// ============================================================================
// Test doubles
// ============================================================================
