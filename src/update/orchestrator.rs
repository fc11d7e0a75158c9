//! Starts the installer as an independent process, then lets the app exit
//!
//! The only way to obtain a [`Handoff`] is a confirmed start of the installer,
//! and [`InstallerOrchestrator::terminate_after`] consumes one. The running
//! application therefore cannot be asked to exit unless a successor is live.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use super::{SwapPlan, UpdateError};
use crate::logging::{log_action, log_error, log_info};
use crate::scripts::{write_script, ScriptGenerator};

// ============================================================================
// Process Capability
// ============================================================================

pub trait ProcessControl: Send + Sync {
    fn current_executable(&self) -> Result<PathBuf, UpdateError>;

    /// Start `program` with its own lifetime; returns the pid once it is running
    fn start_detached(
        &self,
        program: &Path,
        args: &[OsString],
        working_dir: &Path,
    ) -> Result<u32, UpdateError>;

    fn exit_current(&self);
}

/// Real processes
pub struct SystemProcesses {
    /// How long a freshly started installer must survive to count as started
    confirm_window: Duration,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self {
            confirm_window: Duration::from_millis(250),
        }
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for SystemProcesses {
    fn current_executable(&self) -> Result<PathBuf, UpdateError> {
        std::env::current_exe().map_err(|e| UpdateError::other("Locating current executable", e))
    }

    fn start_detached(
        &self,
        program: &Path,
        args: &[OsString],
        working_dir: &Path,
    ) -> Result<u32, UpdateError> {
        use wait_timeout::ChildExt;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        let mut child = cmd.spawn().map_err(|e| UpdateError::Launch {
            reason: format!("{:?}: {}", program, e),
        })?;
        let pid = child.id();

        match child.wait_timeout(self.confirm_window) {
            Ok(None) => Ok(pid),
            Ok(Some(status)) if status.success() => Ok(pid),
            Ok(Some(status)) => Err(UpdateError::Launch {
                reason: format!("installer exited immediately with {:?}", status.code()),
            }),
            Err(e) => Err(UpdateError::Launch {
                reason: format!("could not confirm installer start: {}", e),
            }),
        }
    }

    fn exit_current(&self) {
        log_action("Exiting for update");
        std::process::exit(0);
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Proof that the installer process is running
#[derive(Debug)]
pub struct Handoff {
    pid: u32,
    script: PathBuf,
}

impl Handoff {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn script(&self) -> &Path {
        &self.script
    }
}

pub struct InstallerOrchestrator {
    process: Arc<dyn ProcessControl>,
    script_dir: PathBuf,
}

impl InstallerOrchestrator {
    pub fn new(process: Arc<dyn ProcessControl>, script_dir: PathBuf) -> Self {
        Self {
            process,
            script_dir,
        }
    }

    /// Write the installer script and start it. Nothing is terminated here.
    pub fn launch(&self, plan: &SwapPlan) -> Result<Handoff, UpdateError> {
        let current_exe = self.process.current_executable()?;
        plan.validate(&current_exe)?;

        let id = format!(
            "{}_{}",
            std::process::id(),
            chrono::Local::now().format("%Y%m%d_%H%M%S%3f")
        );
        let script = self.script_dir.join(ScriptGenerator::swap_script_name(&id));
        write_script(&script, &ScriptGenerator::generate_swap_script(plan)).map_err(|e| {
            UpdateError::Launch {
                reason: format!("cannot write {:?}: {}", script, e),
            }
        })?;

        let (program, args) = interpreter_for(&script);
        log_action(&format!("Starting installer {:?}", script));

        match self
            .process
            .start_detached(&program, &args, &plan.destination_dir)
        {
            Ok(pid) => {
                log_info(&format!("Installer running (pid {})", pid));
                Ok(Handoff { pid, script })
            }
            Err(e) => {
                log_error(&format!("Installer failed to start: {}", e));
                let _ = std::fs::remove_file(&script);
                Err(match e {
                    UpdateError::Launch { .. } => e,
                    other => UpdateError::Launch {
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Ask the running application to exit; only callable with a live handoff
    pub fn terminate_after(&self, handoff: Handoff) {
        log_info(&format!(
            "Handing off to installer pid {} ({:?})",
            handoff.pid, handoff.script
        ));
        self.process.exit_current();
    }
}

fn interpreter_for(script: &Path) -> (PathBuf, Vec<OsString>) {
    if cfg!(windows) {
        (
            PathBuf::from("cmd"),
            vec![OsString::from("/C"), script.as_os_str().to_os_string()],
        )
    } else {
        (
            PathBuf::from("/bin/sh"),
            vec![script.as_os_str().to_os_string()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::testing::FakeProcesses;
    use crate::update::SwapPlanner;
    use std::fs;

    fn setup(root: &Path) -> (PathBuf, SwapPlan) {
        let exe = root.join("install").join("Product.exe");
        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, "old").unwrap();
        let payload = root.join("work").join("payload");
        fs::create_dir_all(&payload).unwrap();
        fs::write(payload.join("Product.exe"), "new").unwrap();

        let plan = SwapPlanner::new("Product.exe", Duration::from_secs(0), root.join("report.txt"))
            .build_plan(&exe, &payload, &[root.join("work")])
            .unwrap();
        (exe, plan)
    }

    #[test]
    fn failed_start_never_terminates() {
        let root = tempfile::tempdir().unwrap();
        let (exe, plan) = setup(root.path());
        let processes = Arc::new(FakeProcesses::new(exe).failing_start());
        let orchestrator =
            InstallerOrchestrator::new(processes.clone(), root.path().join("scripts"));

        let err = orchestrator.launch(&plan).unwrap_err();
        assert_eq!(err.kind(), crate::update::ErrorKind::Launch);
        assert_eq!(processes.exit_count(), 0);
        // no orphaned script
        assert_eq!(fs::read_dir(root.path().join("scripts")).unwrap().count(), 0);
    }

    #[test]
    fn successful_start_then_terminate() {
        let root = tempfile::tempdir().unwrap();
        let (exe, plan) = setup(root.path());
        let processes = Arc::new(FakeProcesses::new(exe));
        let orchestrator =
            InstallerOrchestrator::new(processes.clone(), root.path().join("scripts"));

        let handoff = orchestrator.launch(&plan).unwrap();
        assert!(handoff.script().exists());
        assert_eq!(processes.started().len(), 1);
        assert_eq!(processes.started()[0].working_dir, plan.destination_dir);
        assert_eq!(processes.exit_count(), 0);

        orchestrator.terminate_after(handoff);
        assert_eq!(processes.exit_count(), 1);
    }

    #[test]
    fn plan_for_another_install_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let (_, plan) = setup(root.path());
        let elsewhere = root.path().join("other").join("Product.exe");
        fs::create_dir_all(elsewhere.parent().unwrap()).unwrap();
        fs::write(&elsewhere, "x").unwrap();

        let processes = Arc::new(FakeProcesses::new(elsewhere));
        let orchestrator =
            InstallerOrchestrator::new(processes.clone(), root.path().join("scripts"));

        let err = orchestrator.launch(&plan).unwrap_err();
        assert_eq!(err.kind(), crate::update::ErrorKind::InvalidPlan);
        assert!(processes.started().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn system_processes_reports_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let err = SystemProcesses::new()
            .start_detached(&dir.path().join("missing"), &[], dir.path())
            .unwrap_err();
        assert_eq!(err.kind(), crate::update::ErrorKind::Launch);
    }

    #[cfg(unix)]
    #[test]
    fn system_processes_rejects_instant_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = SystemProcesses::new()
            .start_detached(
                Path::new("/bin/sh"),
                &[OsString::from("-c"), OsString::from("exit 3")],
                dir.path(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("3"));
    }
}
