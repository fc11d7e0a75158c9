//! Spark Updater - self-update engine for the Spark desktop companion
//!
//! Library crate for the update pipeline, shared between the CLI and the app.
//! Note: the UI layer is not part of this crate; it consumes `UpdateObserver` events.

#[macro_use]
pub mod paths;

pub mod config;
pub mod github;
pub mod logging;
pub mod scripts;
pub mod update;
pub mod utils;
