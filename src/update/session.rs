//! Update session state machine
//!
//! `UpdateSession` is an owned value: the application creates one, drives it
//! through check → select → download → install, and gets it back to `Idle`
//! after every attempt. `SessionHandle` runs the long operations on worker
//! threads and rejects overlapping requests instead of queueing them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use super::cache::install_cache_bundle;
use super::catalog::{is_newer_version, select_variants, ReleaseManifest, UpdateVariant, VariantCatalog};
use super::locator::locate;
use super::{
    DownloadProgress, Downloader, Extractor, InstallerOrchestrator, ProcessControl, SwapPlan,
    SwapPlanner, Transport, UpdateError, UpdateObserver,
};
use crate::config::UpdaterConfig;
use crate::github::ManifestSource;
use crate::logging::{log_action, log_error, log_info, log_warning};
use crate::utils::remove_path;

/// Working directories older than this are swept when a session starts
const STALE_SESSION_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const SESSION_DIR_PREFIX: &str = "session-";

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Checking,
    VariantsReady,
    Downloading,
    Extracting,
    LocatingPayload,
    ReadyToInstall,
    Installing,
    HandoffLaunched,
    Failed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Checking)
                | (Checking, VariantsReady)
                | (Checking, Idle)
                | (Checking, Failed)
                | (VariantsReady, Checking)
                | (VariantsReady, Downloading)
                | (VariantsReady, Idle)
                | (Downloading, Extracting)
                | (Downloading, Failed)
                | (Extracting, LocatingPayload)
                | (Extracting, Failed)
                | (LocatingPayload, ReadyToInstall)
                | (LocatingPayload, Failed)
                | (ReadyToInstall, Installing)
                | (ReadyToInstall, Idle)
                | (Installing, HandoffLaunched)
                | (Installing, Failed)
                | (Failed, Idle)
                | (Failed, Checking)
        )
    }

    /// States in which a new check or download may begin
    pub fn accepts_requests(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::VariantsReady | SessionState::Failed
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// External effects the session depends on
#[derive(Clone)]
pub struct Capabilities {
    pub manifest_source: Arc<dyn ManifestSource>,
    pub transport: Arc<dyn Transport>,
    pub extractor: Arc<dyn Extractor>,
    pub process: Arc<dyn ProcessControl>,
}

impl Capabilities {
    #[cfg(all(feature = "network", feature = "archives"))]
    pub fn system(config: &UpdaterConfig) -> Self {
        Self {
            manifest_source: Arc::new(crate::github::GithubReleases::from_config(config)),
            transport: Arc::new(super::UreqTransport::new(config.user_agent.clone())),
            extractor: Arc::new(super::ArchiveExtractor),
            process: Arc::new(super::SystemProcesses::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub current_version: String,
    pub latest_version: String,
    pub notes: String,
    pub is_update_available: bool,
    pub variant_count: usize,
}

// ============================================================================
// Session
// ============================================================================

pub struct UpdateSession {
    config: UpdaterConfig,
    caps: Capabilities,
    observer: Arc<dyn UpdateObserver>,
    current_version: String,
    state: Arc<Mutex<SessionState>>,
    manifest: Option<ReleaseManifest>,
    catalog: Option<VariantCatalog>,
    selected: Option<UpdateVariant>,
    progress: Option<DownloadProgress>,
    plan: Option<SwapPlan>,
    work_dir: Option<PathBuf>,
}

impl UpdateSession {
    pub fn new(config: UpdaterConfig, caps: Capabilities, observer: Arc<dyn UpdateObserver>) -> Self {
        sweep_stale_sessions(&config.temp_root(), STALE_SESSION_AGE);
        Self {
            config,
            caps,
            observer,
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            manifest: None,
            catalog: None,
            selected: None,
            progress: None,
            plan: None,
            work_dir: None,
        }
    }

    /// Version the release tag is compared against
    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current_version = version.into();
        self
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn manifest(&self) -> Option<&ReleaseManifest> {
        self.manifest.as_ref()
    }

    pub fn catalog(&self) -> Option<&VariantCatalog> {
        self.catalog.as_ref()
    }

    pub fn selected(&self) -> Option<&UpdateVariant> {
        self.selected.as_ref()
    }

    pub fn progress(&self) -> Option<DownloadProgress> {
        self.progress
    }

    pub fn plan(&self) -> Option<&SwapPlan> {
        self.plan.as_ref()
    }

    /// Per-attempt scratch directory, while one exists
    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    fn ensure_accepts_requests(&self) -> Result<(), UpdateError> {
        let state = self.state();
        if state.accepts_requests() {
            Ok(())
        } else {
            Err(UpdateError::SessionBusy { state })
        }
    }

    /// Fetch the latest release and build the variant catalog
    pub fn check(&mut self) -> Result<CheckOutcome, UpdateError> {
        self.ensure_accepts_requests()?;
        self.reset_attempt();
        self.transition(SessionState::Checking);
        self.status("Checking for updates...");

        let manifest = match self.caps.manifest_source.fetch_manifest() {
            Ok(m) => m,
            Err(e) => return Err(self.fail(e)),
        };

        let catalog = select_variants(&manifest, &self.config.selection_rules());
        let outcome = CheckOutcome {
            current_version: self.current_version.clone(),
            latest_version: manifest.version().to_string(),
            notes: manifest.notes.clone(),
            is_update_available: is_newer_version(manifest.version(), &self.current_version),
            variant_count: catalog.len(),
        };
        log_info(&format!(
            "Latest release {} ({} variants), running {}",
            outcome.latest_version, outcome.variant_count, outcome.current_version
        ));

        self.selected = catalog.default_variant().cloned();
        self.manifest = Some(manifest);

        if catalog.is_empty() {
            self.catalog = None;
            self.status("No installable variant found");
            self.transition(SessionState::Idle);
        } else {
            self.catalog = Some(catalog);
            self.status(&format!("Version {} available", outcome.latest_version));
            self.transition(SessionState::VariantsReady);
        }
        Ok(outcome)
    }

    /// Pick a variant by file name (case-insensitive)
    pub fn select(&mut self, file_name: &str) -> Result<&UpdateVariant, UpdateError> {
        let state = self.state();
        if state != SessionState::VariantsReady {
            return Err(UpdateError::SessionBusy { state });
        }
        let variant = self
            .catalog
            .as_ref()
            .and_then(|c| c.find(file_name))
            .cloned()
            .ok_or_else(|| UpdateError::NoQualifyingAsset {
                name: file_name.to_string(),
            })?;
        log_action(&format!("Selected {} ({})", variant.display_name, variant.file_name));
        Ok(&*self.selected.insert(variant))
    }

    /// Drop the current attempt without side effects
    pub fn abandon(&mut self) {
        let state = self.state();
        if state.can_transition_to(SessionState::Idle) {
            self.cleanup_work_dir();
            self.reset_attempt();
            self.transition(SessionState::Idle);
        }
    }

    /// Download, extract and locate the selected variant, then plan the swap
    pub fn download_selected(&mut self) -> Result<&SwapPlan, UpdateError> {
        self.ensure_accepts_requests()?;
        let state = self.state();
        if state != SessionState::VariantsReady {
            return Err(UpdateError::other("Download", "check for updates first"));
        }
        let variant = self
            .selected
            .clone()
            .ok_or_else(|| UpdateError::other("Download", "no variant selected"))?;

        self.transition(SessionState::Downloading);
        self.status(&format!("Downloading {}...", variant.display_name));

        let work_dir = match self.create_work_dir() {
            Ok(dir) => dir,
            Err(e) => return Err(self.fail(e)),
        };
        let archive = work_dir.join(&variant.file_name);
        let extract_dir = work_dir.join("extracted");

        let observer = self.observer.clone();
        let mut last_progress = None;
        let downloaded = Downloader::new(self.caps.transport.clone()).download(
            &variant.download_url,
            &archive,
            &mut |p| {
                last_progress = Some(p);
                observer.on_progress(p);
            },
        );
        self.progress = last_progress;
        if let Err(e) = downloaded {
            return Err(self.fail(e));
        }

        self.transition(SessionState::Extracting);
        self.status("Extracting update...");
        if let Err(e) = self.caps.extractor.extract(&archive, &extract_dir) {
            return Err(self.fail(e));
        }

        self.transition(SessionState::LocatingPayload);
        let payload = locate(&extract_dir, &self.config.payload_dirs);

        let planned = self.caps.process.current_executable().and_then(|exe| {
            SwapPlanner::new(
                self.config.executable_name.clone(),
                self.config.grace_delay(),
                self.config.swap_report_path(),
            )
            .build_plan(
                &exe,
                &payload,
                &[archive.clone(), extract_dir.clone(), work_dir.clone()],
            )
        });
        let plan = match planned {
            Ok(plan) => plan,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(SessionState::ReadyToInstall);
        self.status("Update ready to install");
        Ok(&*self.plan.insert(plan))
    }

    /// Start the installer and, once it is running, exit the application.
    /// On failure the application keeps running and the session returns to `Idle`.
    pub fn install(&mut self) -> Result<(), UpdateError> {
        let state = self.state();
        if state != SessionState::ReadyToInstall {
            return Err(UpdateError::SessionBusy { state });
        }
        let plan = self
            .plan
            .clone()
            .ok_or_else(|| UpdateError::other("Install", "no swap plan"))?;

        self.transition(SessionState::Installing);
        self.status("Installing update...");

        let orchestrator =
            InstallerOrchestrator::new(self.caps.process.clone(), self.config.temp_root());
        match orchestrator.launch(&plan) {
            Ok(handoff) => {
                self.transition(SessionState::HandoffLaunched);
                self.status("Restarting to finish the update");
                orchestrator.terminate_after(handoff);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Download the auxiliary cache bundle. Does not move the state machine.
    pub fn install_cache_bundle(&mut self) -> Result<PathBuf, UpdateError> {
        self.ensure_accepts_requests()?;

        let manifest = match self.manifest.clone() {
            Some(m) => Ok(m),
            None => self.caps.manifest_source.fetch_manifest(),
        };
        if let Ok(m) = &manifest {
            self.manifest = Some(m.clone());
        }

        let result = manifest.and_then(|manifest| {
            install_cache_bundle(
                &manifest,
                &self.config.cache_asset,
                &self.config.cache_dir(),
                self.caps.transport.clone(),
                self.caps.extractor.as_ref(),
                self.observer.as_ref(),
            )
        });
        if let Err(e) = &result {
            self.status(&format!("Cache download failed: {}", e));
        }
        result
    }

    // ------------------------------------------------------------------------

    fn status(&self, text: &str) {
        self.observer.on_status(text);
    }

    fn transition(&mut self, next: SessionState) {
        let mut state = self.state.lock();
        debug_assert!(
            state.can_transition_to(next),
            "illegal transition {} -> {}",
            *state,
            next
        );
        log_info(&format!("Update session: {} -> {}", *state, next));
        *state = next;
        drop(state);
        self.observer.on_state_changed(next);
    }

    /// Report, clean up, and return to `Idle` so the caller can retry
    fn fail(&mut self, err: UpdateError) -> UpdateError {
        log_error(&format!("Update failed: {}", err));
        self.status(&format!("Update failed: {}", err));
        self.cleanup_work_dir();
        self.reset_attempt();
        self.transition(SessionState::Failed);
        self.transition(SessionState::Idle);
        err
    }

    fn reset_attempt(&mut self) {
        self.catalog = None;
        self.selected = None;
        self.progress = None;
        self.plan = None;
    }

    fn create_work_dir(&mut self) -> Result<PathBuf, UpdateError> {
        let dir = self.config.temp_root().join(format!(
            "{}{}-{}-{:08x}",
            SESSION_DIR_PREFIX,
            std::process::id(),
            chrono::Local::now().format("%Y%m%d%H%M%S"),
            rand::random::<u32>()
        ));
        fs::create_dir_all(&dir)
            .map_err(|e| UpdateError::other(format!("Creating {:?}", dir), e))?;
        self.work_dir = Some(dir.clone());
        Ok(dir)
    }

    fn cleanup_work_dir(&mut self) {
        if let Some(dir) = self.work_dir.take() {
            remove_path(&dir);
        }
    }
}

/// Remove `session-*` directories left by crashed or killed runs
pub fn sweep_stale_sessions(temp_root: &Path, max_age: Duration) {
    let Ok(entries) = fs::read_dir(temp_root) else {
        return;
    };
    let now = SystemTime::now();

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(SESSION_DIR_PREFIX) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        let stale = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .is_some_and(|age| age >= max_age);
        if stale {
            log_warning(&format!("Removing stale update directory {:?}", entry.path()));
            let _ = fs::remove_dir_all(entry.path());
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Thread-safe front for an `UpdateSession`
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<UpdateSession>>,
    state: Arc<Mutex<SessionState>>,
    busy: Arc<AtomicBool>,
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SessionHandle {
    pub fn new(session: UpdateSession) -> Self {
        let state = session.state.clone();
        Self {
            session: Arc::new(Mutex::new(session)),
            state,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Readable while an operation is running
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn claim(&self) -> Result<BusyGuard, UpdateError> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| BusyGuard(self.busy.clone()))
            .map_err(|_| UpdateError::SessionBusy {
                state: self.state(),
            })
    }

    fn spawn<T, F>(&self, op: F) -> Result<JoinHandle<Result<T, UpdateError>>, UpdateError>
    where
        T: Send + 'static,
        F: FnOnce(&mut UpdateSession) -> Result<T, UpdateError> + Send + 'static,
    {
        let guard = self.claim()?;
        let session = self.session.clone();
        Ok(thread::spawn(move || {
            let _guard = guard;
            let mut session = session.lock();
            op(&mut session)
        }))
    }

    pub fn spawn_check(&self) -> Result<JoinHandle<Result<CheckOutcome, UpdateError>>, UpdateError> {
        self.spawn(|s| s.check())
    }

    pub fn spawn_download(&self) -> Result<JoinHandle<Result<SwapPlan, UpdateError>>, UpdateError> {
        self.spawn(|s| s.download_selected().cloned())
    }

    pub fn spawn_install(&self) -> Result<JoinHandle<Result<(), UpdateError>>, UpdateError> {
        self.spawn(|s| s.install())
    }

    pub fn spawn_cache(&self) -> Result<JoinHandle<Result<PathBuf, UpdateError>>, UpdateError> {
        self.spawn(|s| s.install_cache_bundle())
    }

    /// Run a short operation (selection, catalog reads) on the calling thread
    pub fn with_session<R>(&self, op: impl FnOnce(&mut UpdateSession) -> R) -> Result<R, UpdateError> {
        let _guard = self.claim()?;
        let mut session = self.session.lock();
        Ok(op(&mut session))
    }
}
