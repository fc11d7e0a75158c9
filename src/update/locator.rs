//! Finds the installable payload inside an extracted archive
//!
//! Release builds package their output inconsistently: files at the archive
//! root, inside a build-output folder, or inside a wrapper folder that holds
//! the build-output folder. The layout is probed once (two levels deep) and
//! handed to [`decide`], an ordered decision table that never fails; the worst
//! case is the extraction root itself, which the swap planner then rejects if
//! it lacks an executable.

use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::dir_has_executable;

// ============================================================================
// Tree Probe
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirProbe {
    pub name: String,
    pub has_executable: bool,
    pub subdirs: Vec<DirProbe>,
}

/// Shape of an extraction root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeProbe {
    /// Top-level entries of any kind
    pub entry_count: usize,
    pub dirs: Vec<DirProbe>,
}

impl TreeProbe {
    pub fn scan(root: &Path) -> Self {
        let entry_count = fs::read_dir(root)
            .map(|entries| entries.flatten().count())
            .unwrap_or(0);
        Self {
            entry_count,
            dirs: probe_dirs(root, 2),
        }
    }
}

fn probe_dirs(dir: &Path, depth: usize) -> Vec<DirProbe> {
    if depth == 0 {
        return Vec::new();
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut dirs: Vec<DirProbe> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| {
            let path = e.path();
            DirProbe {
                name: e.file_name().to_string_lossy().to_string(),
                has_executable: dir_has_executable(&path),
                subdirs: probe_dirs(&path, depth - 1),
            }
        })
        .collect();
    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    dirs
}

// ============================================================================
// Decision Table
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadChoice {
    /// `root/<well-known>`
    WellKnown(String),
    /// `root/<wrapper>/<well-known>`
    Nested { wrapper: String, subdir: String },
    /// The only top-level entry, a directory
    Collapsed(String),
    Root,
}

impl PayloadChoice {
    pub fn resolve(&self, root: &Path) -> PathBuf {
        match self {
            PayloadChoice::WellKnown(name) => root.join(name),
            PayloadChoice::Nested { wrapper, subdir } => root.join(wrapper).join(subdir),
            PayloadChoice::Collapsed(name) => root.join(name),
            PayloadChoice::Root => root.to_path_buf(),
        }
    }
}

fn find_dir<'a>(dirs: &'a [DirProbe], name: &str) -> Option<&'a DirProbe> {
    dirs.iter().find(|d| d.name.eq_ignore_ascii_case(name))
}

/// `well_known` is in priority order
pub fn decide(probe: &TreeProbe, well_known: &[String]) -> PayloadChoice {
    // 1. well-known folder at the root holding an executable
    for name in well_known {
        if let Some(dir) = find_dir(&probe.dirs, name) {
            if dir.has_executable {
                return PayloadChoice::WellKnown(dir.name.clone());
            }
        }
    }

    // 2. well-known folder one wrapper down; a runnable one beats a bare one
    let mut nested: Vec<(&DirProbe, &DirProbe)> = Vec::new();
    for name in well_known {
        for wrapper in &probe.dirs {
            if let Some(sub) = find_dir(&wrapper.subdirs, name) {
                nested.push((wrapper, sub));
            }
        }
    }
    let nested_pick = nested
        .iter()
        .find(|(_, sub)| sub.has_executable)
        .or_else(|| nested.first());
    if let Some((wrapper, sub)) = nested_pick {
        return PayloadChoice::Nested {
            wrapper: wrapper.name.clone(),
            subdir: sub.name.clone(),
        };
    }

    // 3. single wrapper directory
    if probe.entry_count == 1 && probe.dirs.len() == 1 {
        return PayloadChoice::Collapsed(probe.dirs[0].name.clone());
    }

    PayloadChoice::Root
}

/// Payload directory for an extraction root
pub fn locate(root: &Path, well_known: &[String]) -> PathBuf {
    let choice = decide(&TreeProbe::scan(root), well_known);
    crate::logging::log_info(&format!("Payload layout: {:?}", choice));
    choice.resolve(root)
}
