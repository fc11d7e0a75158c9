//! Installer script generation for the file swap

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::update::SwapPlan;

pub struct ScriptGenerator;

impl ScriptGenerator {
    /// Script for the host platform
    pub fn generate_swap_script(plan: &SwapPlan) -> String {
        if cfg!(windows) {
            Self::generate_batch_swap_script(plan)
        } else {
            Self::generate_posix_swap_script(plan)
        }
    }

    /// File name for a swap script; `id` keeps concurrent runs apart
    pub fn swap_script_name(id: &str) -> String {
        if cfg!(windows) {
            format!("spark_swap_{}.bat", id)
        } else {
            format!("spark_swap_{}.sh", id)
        }
    }

    pub fn generate_posix_swap_script(plan: &SwapPlan) -> String {
        let mut s = String::new();
        s.push_str("#!/bin/sh\n");
        s.push_str("# Spark update installer\n\n");

        s.push_str(&format!(
            "pkill -KILL -x {} >/dev/null 2>&1 || true\n",
            sh_quote(process_match_name(&plan.target_process_name))
        ));
        s.push_str(&format!("sleep {}\n\n", plan.grace_delay.as_secs()));

        let report = sh_quote_path(&plan.report_path);
        if let Some(parent) = plan.report_path.parent() {
            s.push_str(&format!("mkdir -p {} 2>/dev/null\n", sh_quote_path(parent)));
        }
        s.push_str(&format!("rm -f {}\n", report));

        for dir in destination_dirs(plan) {
            s.push_str(&format!("mkdir -p {} 2>/dev/null\n", sh_quote_path(&dir)));
        }

        // Merge: files missing from the payload are left alone
        for rel in &plan.files {
            let dst = sh_quote_path(&plan.destination_dir.join(rel));
            s.push_str(&format!(
                "cp -f {} {} 2>/dev/null || echo {} >> {}\n",
                sh_quote_path(&plan.source_dir.join(rel)),
                dst,
                dst,
                report
            ));
        }
        s.push('\n');

        for temp in &plan.temp_artifacts {
            s.push_str(&format!("rm -rf -- {}\n", sh_quote_path(temp)));
        }

        s.push_str(&format!(
            "\ncd {} && {} >/dev/null 2>&1 &\n",
            sh_quote_path(&plan.destination_dir),
            sh_quote_path(&plan.relaunch_executable)
        ));
        s.push_str("rm -f -- \"$0\"\n");
        s
    }

    pub fn generate_batch_swap_script(plan: &SwapPlan) -> String {
        let mut s = String::new();
        s.push_str("@echo off\r\n");
        s.push_str("rem Spark update installer\r\n\r\n");

        s.push_str(&format!(
            "taskkill /f /im {} >nul 2>&1\r\n",
            bat_quote(&plan.target_process_name)
        ));
        // `timeout` refuses to run with redirected stdin
        s.push_str(&format!(
            "ping -n {} 127.0.0.1 >nul\r\n\r\n",
            plan.grace_delay.as_secs() + 1
        ));

        let report = bat_quote_path(&plan.report_path);
        if let Some(parent) = plan.report_path.parent() {
            let parent = bat_quote_path(parent);
            s.push_str(&format!("if not exist {} mkdir {}\r\n", parent, parent));
        }
        s.push_str(&format!("if exist {} del /f /q {}\r\n", report, report));

        for dir in destination_dirs(plan) {
            let dir = bat_quote_path(&dir);
            s.push_str(&format!("if not exist {} mkdir {}\r\n", dir, dir));
        }

        for rel in &plan.files {
            let dst = bat_quote_path(&plan.destination_dir.join(rel));
            s.push_str(&format!(
                "copy /y {} {} >nul 2>&1 || echo {}>>{}\r\n",
                bat_quote_path(&plan.source_dir.join(rel)),
                dst,
                dst,
                report
            ));
        }
        s.push_str("\r\n");

        for temp in &plan.temp_artifacts {
            let quoted = bat_quote_path(temp);
            let as_dir = bat_quote_path(&temp.join("*"));
            s.push_str(&format!(
                "if exist {} (rmdir /s /q {}) else (del /f /q {} 2>nul)\r\n",
                as_dir, quoted, quoted
            ));
        }

        s.push_str(&format!(
            "\r\ncd /d {}\r\nstart \"\" {}\r\n",
            bat_quote_path(&plan.destination_dir),
            bat_quote_path(&plan.relaunch_executable)
        ));
        s.push_str("(goto) 2>nul & del \"%~f0\"\r\n");
        s
    }
}

/// Destination subdirectories the payload needs, parents first
fn destination_dirs(plan: &SwapPlan) -> BTreeSet<PathBuf> {
    plan.files
        .iter()
        .filter_map(|rel| rel.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| plan.destination_dir.join(p))
        .collect()
}

fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn sh_quote_path(path: &Path) -> String {
    sh_quote(&path.to_string_lossy())
}

fn bat_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('%', "%%"))
}

fn bat_quote_path(path: &Path) -> String {
    bat_quote(&path.to_string_lossy())
}

/// Name `pkill -x` compares against. Linux truncates the process name to
/// 15 bytes, so longer executable names only match on their prefix.
fn process_match_name(name: &str) -> &str {
    const COMM_LEN: usize = 15;
    if name.len() <= COMM_LEN {
        return name;
    }
    let mut end = COMM_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Write a script and mark it executable
pub fn write_script(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn plan(root: &Path, files: &[&str]) -> SwapPlan {
        let destination_dir = root.join("install");
        SwapPlan {
            target_process_name: "Product.exe".to_string(),
            source_dir: root.join("work").join("payload"),
            relaunch_executable: destination_dir.join("Product.exe"),
            destination_dir,
            temp_artifacts: [root.join("work")].into_iter().collect(),
            grace_delay: Duration::from_secs(0),
            report_path: root.join("swap-report.txt"),
            files: files.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn posix_script_orders_kill_copy_cleanup_relaunch() {
        let script = ScriptGenerator::generate_posix_swap_script(&plan(
            Path::new("/tmp/spark"),
            &["Product.exe", "data/it's.json"],
        ));

        let kill = script.find("pkill -KILL -x 'Product.exe'").unwrap();
        let copy = script.find("cp -f").unwrap();
        let cleanup = script.find("rm -rf -- '/tmp/spark/work'").unwrap();
        let relaunch = script.find("'/tmp/spark/install/Product.exe' >/dev/null").unwrap();
        let self_delete = script.find("rm -f -- \"$0\"").unwrap();
        assert!(kill < copy && copy < cleanup && cleanup < relaunch && relaunch < self_delete);

        assert!(script.contains("mkdir -p '/tmp/spark/install/data'"));
        assert!(script.contains("it'\\''s.json"));
    }

    #[test]
    fn long_process_names_are_truncated_for_pkill() {
        let mut p = plan(Path::new("/tmp/spark"), &["SparkDesktopCompanion"]);
        p.target_process_name = "SparkDesktopCompanion".to_string();
        let script = ScriptGenerator::generate_posix_swap_script(&p);
        assert!(script.contains("pkill -KILL -x 'SparkDesktopCom' "));

        assert_eq!(process_match_name("Spark"), "Spark");
        assert_eq!(process_match_name("ééééééééé"), "ééééééé");
    }

    #[test]
    fn batch_script_escapes_percent_and_deletes_itself_last() {
        let mut p = plan(Path::new("C:/Users/me/100%"), &["Product.exe"]);
        p.grace_delay = Duration::from_secs(2);
        let script = ScriptGenerator::generate_batch_swap_script(&p);

        assert!(script.starts_with("@echo off\r\n"));
        assert!(script.contains("taskkill /f /im \"Product.exe\""));
        assert!(script.contains("ping -n 3 127.0.0.1"));
        assert!(script.contains("100%%"));
        assert!(script.contains("copy /y"));
        assert!(script.trim_end().ends_with("del \"%~f0\""));
    }

    #[cfg(unix)]
    #[test]
    fn posix_script_merges_and_reports_failures() {
        let root = tempfile::tempdir().unwrap();
        let p = plan(root.path(), &["Product.exe", "blocked/inner.txt", "data/themes.json"]);

        fs::create_dir_all(p.source_dir.join("blocked")).unwrap();
        fs::create_dir_all(p.source_dir.join("data")).unwrap();
        fs::write(p.source_dir.join("Product.exe"), "new").unwrap();
        fs::write(p.source_dir.join("blocked").join("inner.txt"), "inner").unwrap();
        fs::write(p.source_dir.join("data").join("themes.json"), "{}").unwrap();

        fs::create_dir_all(&p.destination_dir).unwrap();
        fs::write(p.destination_dir.join("Product.exe"), "old").unwrap();
        fs::write(p.destination_dir.join("user.cfg"), "keep me").unwrap();
        // a file where the payload needs a directory cannot be replaced
        fs::write(p.destination_dir.join("blocked"), "file").unwrap();

        let script_path = root.path().join(ScriptGenerator::swap_script_name("test"));
        write_script(&script_path, &ScriptGenerator::generate_posix_swap_script(&p)).unwrap();

        let status = std::process::Command::new("sh")
            .arg(&script_path)
            .status()
            .unwrap();
        assert!(status.success());

        assert_eq!(fs::read_to_string(p.destination_dir.join("Product.exe")).unwrap(), "new");
        assert_eq!(fs::read_to_string(p.destination_dir.join("user.cfg")).unwrap(), "keep me");
        assert_eq!(
            fs::read_to_string(p.destination_dir.join("data").join("themes.json")).unwrap(),
            "{}"
        );
        assert!(!root.path().join("work").exists());
        assert!(!script_path.exists());

        let report = crate::update::take_swap_report(&p.report_path).unwrap();
        assert_eq!(
            report.failed,
            vec![p.destination_dir.join("blocked").join("inner.txt")]
        );
    }
}
