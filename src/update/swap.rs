//! Swap planning: what the external installer replaces, cleans up and relaunches

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use walkdir::WalkDir;

use super::UpdateError;
use crate::logging::{log_info, log_warning};
use crate::utils::dir_has_executable;

/// Everything the installer script needs. Built once per download and
/// consumed once by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPlan {
    /// File name of the application executable, used to terminate it by name
    pub target_process_name: String,
    pub source_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub temp_artifacts: BTreeSet<PathBuf>,
    pub relaunch_executable: PathBuf,
    pub grace_delay: Duration,
    /// Files that could not be overwritten are appended here
    pub report_path: PathBuf,
    /// Payload files relative to `source_dir`, sorted
    pub files: Vec<PathBuf>,
}

impl SwapPlan {
    /// Refuse to run against a destination that is missing or does not hold
    /// the running executable
    pub fn validate(&self, current_exe: &Path) -> Result<(), UpdateError> {
        let invalid = |reason: String| UpdateError::InvalidPlan { reason };

        if !self.destination_dir.is_dir() {
            return Err(invalid(format!(
                "destination {:?} does not exist or is not a directory",
                self.destination_dir
            )));
        }

        let destination = fs::canonicalize(&self.destination_dir)
            .map_err(|e| invalid(format!("cannot resolve {:?}: {}", self.destination_dir, e)))?;
        let exe = fs::canonicalize(current_exe)
            .map_err(|e| invalid(format!("cannot resolve {:?}: {}", current_exe, e)))?;
        let exe_dir = exe
            .parent()
            .ok_or_else(|| invalid(format!("{:?} has no parent directory", exe)))?;

        if !exe_dir.starts_with(&destination) {
            return Err(invalid(format!(
                "running executable {:?} is not inside {:?}",
                exe, destination
            )));
        }

        if !self.source_dir.is_dir() {
            return Err(invalid(format!("payload {:?} is gone", self.source_dir)));
        }

        Ok(())
    }
}

// ============================================================================
// Planner
// ============================================================================

pub struct SwapPlanner {
    executable_name: String,
    grace_delay: Duration,
    report_path: PathBuf,
}

impl SwapPlanner {
    /// `executable_name` is the application the installer terminates and
    /// relaunches; it lives next to the running executable.
    pub fn new(executable_name: impl Into<String>, grace_delay: Duration, report_path: PathBuf) -> Self {
        Self {
            executable_name: executable_name.into(),
            grace_delay,
            report_path,
        }
    }

    pub fn build_plan(
        &self,
        current_exe: &Path,
        payload_dir: &Path,
        temp_to_clean: &[PathBuf],
    ) -> Result<SwapPlan, UpdateError> {
        let destination_dir = current_exe
            .parent()
            .ok_or_else(|| UpdateError::InvalidPlan {
                reason: format!("{:?} has no parent directory", current_exe),
            })?
            .to_path_buf();
        let target_process_name = Path::new(&self.executable_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| UpdateError::InvalidPlan {
                reason: format!("{:?} is not an executable name", self.executable_name),
            })?;

        let missing = |expected: &str| UpdateError::PayloadNotFound {
            path: payload_dir.display().to_string(),
            expected: expected.to_string(),
        };

        if !payload_dir.is_dir() {
            return Err(missing("a directory"));
        }
        if !dir_has_executable(payload_dir) {
            return Err(missing("an executable"));
        }

        let files = payload_files(payload_dir);
        if files.is_empty() {
            return Err(missing("any files"));
        }

        // Metadata only; the install directory is left to the installer
        if fs::metadata(&destination_dir).is_ok_and(|m| m.permissions().readonly()) {
            log_warning(&format!(
                "Install directory {:?} is read-only; the installer may fail to replace files",
                destination_dir
            ));
        }

        log_info(&format!(
            "Swap plan: {} files from {:?} into {:?}",
            files.len(),
            payload_dir,
            destination_dir
        ));

        Ok(SwapPlan {
            relaunch_executable: destination_dir.join(&target_process_name),
            target_process_name,
            source_dir: payload_dir.to_path_buf(),
            destination_dir,
            temp_artifacts: temp_to_clean.iter().cloned().collect(),
            grace_delay: self.grace_delay,
            report_path: self.report_path.clone(),
            files,
        })
    }
}

fn payload_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

// ============================================================================
// Swap Report
// ============================================================================

/// Files the last installer run could not overwrite
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapReport {
    pub failed: Vec<PathBuf>,
}

/// Read and delete the report left by the previous installer run
pub fn take_swap_report(path: &Path) -> Option<SwapReport> {
    let content = fs::read_to_string(path).ok()?;
    let _ = fs::remove_file(path);

    let failed = content
        .lines()
        .map(|l| l.trim().trim_matches('"').trim())
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect();
    Some(SwapReport { failed })
}
