//! Spark Updater Logging System
//!
//! Provides structured logging with system information header

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex, OnceLock};

static LOGGER: OnceLock<Arc<Mutex<SparkLogger>>> = OnceLock::new();

// ============================================================================
// System Information Detection
// ============================================================================

#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub app_version: String,
    pub os: String,
    pub arch: String,
    pub kernel: String,
    pub data_dir: String,
    pub temp_dir: String,
}

impl SystemInfo {
    pub fn detect() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            kernel: detect_kernel(),
            data_dir: crate::spark_path!().display().to_string(),
            temp_dir: std::env::temp_dir().display().to_string(),
        }
    }

    pub fn to_log_header(&self) -> String {
        format!(
r#"================================================================================
Spark Updater Log - {}
================================================================================
Application:   Spark Updater v{}
System Info:
  OS:          {} ({})
  Kernel:      {}
  Data Dir:    {}
  Temp Dir:    {}
================================================================================
"#,
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.app_version,
            self.os,
            self.arch,
            self.kernel,
            self.data_dir,
            self.temp_dir
        )
    }
}

#[cfg(unix)]
fn detect_kernel() -> String {
    if let Ok(output) = Command::new("uname").arg("-r").output() {
        if output.status.success() {
            return String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
    }
    "Unknown".to_string()
}

#[cfg(windows)]
fn detect_kernel() -> String {
    // "Microsoft Windows [Version 10.0.19045.3803]"
    if let Ok(output) = Command::new("cmd").args(["/C", "ver"]).output() {
        if output.status.success() {
            let out = String::from_utf8_lossy(&output.stdout);
            if let Some(line) = out.lines().find(|l| !l.trim().is_empty()) {
                return line.trim().to_string();
            }
        }
    }
    "Unknown".to_string()
}

#[cfg(not(any(unix, windows)))]
fn detect_kernel() -> String {
    "Unknown".to_string()
}

// ============================================================================
// Log Levels
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Info,
    Action, // User-initiated requests (check, select, install)
    Download,
    Install,
    Warning,
    Error,
}

impl LogLevel {
    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Info => "[INFO]",
            LogLevel::Action => "[ACTION]",
            LogLevel::Download => "[DOWNLOAD]",
            LogLevel::Install => "[INSTALL]",
            LogLevel::Warning => "[WARNING]",
            LogLevel::Error => "[ERROR]",
        }
    }
}

// ============================================================================
// Spark Logger
// ============================================================================

pub struct SparkLogger {
    log_file: Option<File>,
    echo: bool,
}

impl SparkLogger {
    pub fn new() -> Self {
        Self::in_dir(&crate::spark_path!("logs"), true)
    }

    /// Log to a fresh file under `log_dir`, optionally echoing to stdout
    pub fn in_dir(log_dir: &Path, echo: bool) -> Self {
        let _ = fs::create_dir_all(log_dir);

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let log_path = log_dir.join(format!("spark_updater_{}.log", timestamp));

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok();

        let mut logger = Self { log_file, echo };

        let sys_info = SystemInfo::detect();
        let header = sys_info.to_log_header();
        logger.write_raw(&header);

        logger
    }

    /// Logger that discards everything
    pub fn detached() -> Self {
        Self {
            log_file: None,
            echo: false,
        }
    }

    fn write_raw(&mut self, msg: &str) {
        if let Some(ref mut file) = self.log_file {
            let _ = writeln!(file, "{}", msg);
            let _ = file.flush();
        }

        if self.echo {
            println!("{}", msg);
        }
    }

    pub fn log(&mut self, level: LogLevel, message: &str) {
        let timestamp = Local::now().format("%H:%M:%S");
        let formatted = format!("[{}] {} {}", timestamp, level.prefix(), message);
        self.write_raw(&formatted);
    }
}

impl Default for SparkLogger {
    fn default() -> Self {
        // Unit tests stay out of the user's data directory
        if cfg!(test) {
            Self::detached()
        } else {
            Self::new()
        }
    }
}

// ============================================================================
// Global Logger Access
// ============================================================================

/// Initialize the global logger (call once at startup)
pub fn init_logger() {
    LOGGER.get_or_init(|| Arc::new(Mutex::new(SparkLogger::new())));
}

fn logger() -> Arc<Mutex<SparkLogger>> {
    LOGGER
        .get_or_init(|| Arc::new(Mutex::new(SparkLogger::default())))
        .clone()
}

// ============================================================================
// Convenience Logging Functions
// ============================================================================

pub fn log_info(message: &str) {
    if let Ok(mut log) = logger().lock() {
        log.log(LogLevel::Info, message);
    }
}

pub fn log_action(message: &str) {
    if let Ok(mut log) = logger().lock() {
        log.log(LogLevel::Action, message);
    }
}

pub fn log_download(message: &str) {
    if let Ok(mut log) = logger().lock() {
        log.log(LogLevel::Download, message);
    }
}

pub fn log_install(message: &str) {
    if let Ok(mut log) = logger().lock() {
        log.log(LogLevel::Install, message);
    }
}

pub fn log_warning(message: &str) {
    if let Ok(mut log) = logger().lock() {
        log.log(LogLevel::Warning, message);
    }
}

pub fn log_error(message: &str) {
    if let Ok(mut log) = logger().lock() {
        log.log(LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_includes_version_and_platform() {
        let info = SystemInfo::detect();
        let header = info.to_log_header();
        assert!(header.contains(env!("CARGO_PKG_VERSION")));
        assert!(header.contains(std::env::consts::OS));
        assert!(header.contains(std::env::consts::ARCH));
    }

    #[test]
    fn global_logger_is_detached_in_tests() {
        log_info("not written anywhere");
        let log = logger();
        let log = log.lock().unwrap();
        assert!(log.log_file.is_none());
        assert!(!log.echo);
    }

    #[test]
    fn file_logger_writes_header_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = SparkLogger::in_dir(&dir.path().join("logs"), false);
        log.log(LogLevel::Warning, "disk nearly full");
        drop(log);

        let files: Vec<_> = fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let content = fs::read_to_string(&files[0]).unwrap();
        assert!(content.contains("Spark Updater Log"));
        assert!(content.contains("[WARNING] disk nearly full"));
    }

    #[test]
    fn level_prefixes_are_bracketed() {
        for level in [
            LogLevel::Info,
            LogLevel::Action,
            LogLevel::Download,
            LogLevel::Install,
            LogLevel::Warning,
            LogLevel::Error,
        ] {
            let prefix = level.prefix();
            assert!(prefix.starts_with('[') && prefix.ends_with(']'));
        }
    }
}
