//! Shared utility functions used across the application

use std::fs;
use std::path::Path;

/// ASCII case-insensitive `starts_with`
pub fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// ASCII case-insensitive `ends_with`
pub fn ends_with_ignore_case(s: &str, suffix: &str) -> bool {
    s.len()
        .checked_sub(suffix.len())
        .and_then(|start| s.get(start..))
        .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

/// Whether a file looks runnable: a `.exe`, or anything with an execute bit on Unix
pub fn is_executable_file(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    let has_exe_extension = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"));
    if has_exe_extension {
        return true;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Check if any immediate child of `dir` is an executable file
pub fn dir_has_executable(dir: &Path) -> bool {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .any(|entry| is_executable_file(&entry.path())),
        Err(_) => false,
    }
}

/// Best-effort removal of a file or directory tree
pub fn remove_path(path: &Path) {
    if path.is_dir() {
        let _ = fs::remove_dir_all(path);
    } else if path.exists() {
        let _ = fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_affixes() {
        assert!(starts_with_ignore_case("SparkRed.zip", "spark"));
        assert!(!starts_with_ignore_case("Spa", "spark"));
        assert!(ends_with_ignore_case("SparkRed.ZIP", ".zip"));
        assert!(!ends_with_ignore_case("zip", ".zip"));
        // multi-byte characters never split a slice
        assert!(!starts_with_ignore_case("é.zip", "e"));
        assert!(!ends_with_ignore_case("archivé", "e"));
    }

    #[test]
    fn exe_extension_counts_as_executable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.txt"), "docs").unwrap();
        assert!(!dir_has_executable(dir.path()));

        fs::write(dir.path().join("Spark.EXE"), "binary").unwrap();
        assert!(dir_has_executable(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn execute_bit_counts_as_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("spark");
        fs::write(&bin, "#!/bin/sh\n").unwrap();
        assert!(!is_executable_file(&bin));

        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_executable_file(&bin));
    }

    #[test]
    fn subdirectories_are_not_executables() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bin.exe")).unwrap();
        assert!(!dir_has_executable(dir.path()));
    }
}
