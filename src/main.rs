//! Spark Updater CLI
//!
//! Checks GitHub for a newer Spark release, installs a chosen theme build, or
//! fetches the voice cache bundle.

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use clap::{Parser, Subcommand};

use spark_updater::config::UpdaterConfig;
use spark_updater::logging::{init_logger, log_info, log_warning};
use spark_updater::update::{
    take_swap_report, Capabilities, ChannelObserver, SessionHandle, UpdateError, UpdateEvent,
    UpdateSession,
};

#[derive(Parser)]
#[command(name = "spark-updater", version, about = "Update the Spark desktop companion")]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Installed Spark version to compare against
    #[arg(long)]
    current_version: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the latest release and its variants
    Check,

    /// Download and install an update
    Update {
        /// Variant file name (defaults to the canonical build)
        #[arg(long)]
        variant: Option<String>,

        /// Install without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Download the voice cache bundle
    Cache,
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logger();
    log_info("Spark updater starting up...");

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => UpdaterConfig::load_from(path),
        None => UpdaterConfig::load(),
    };

    if let Some(report) = take_swap_report(&config.swap_report_path()) {
        if !report.failed.is_empty() {
            println!("The last update could not replace these files:");
            for path in &report.failed {
                println!("  {}", path.display());
                log_warning(&format!("Not replaced by last update: {:?}", path));
            }
        }
    }

    let (observer, events) = ChannelObserver::new();
    let caps = Capabilities::system(&config);
    let mut session = UpdateSession::new(config, caps, Arc::new(observer));
    if let Some(version) = cli.current_version {
        session = session.with_current_version(version);
    }
    let handle = SessionHandle::new(session);

    match cli.command {
        Command::Check => run_check(&handle, &events),
        Command::Update { variant, yes } => run_update(&handle, &events, variant, yes),
        Command::Cache => {
            let dir = wait(handle.spawn_cache()?, &events)?;
            println!("Cache installed to {}", dir.display());
            Ok(())
        }
    }
}

fn run_check(handle: &SessionHandle, events: &Receiver<UpdateEvent>) -> Result<(), Box<dyn Error>> {
    let outcome = wait(handle.spawn_check()?, events)?;
    println!(
        "Installed: {}  Latest: {}{}",
        outcome.current_version,
        outcome.latest_version,
        if outcome.is_update_available { "  (update available)" } else { "" }
    );
    if !outcome.notes.trim().is_empty() {
        println!("\n{}\n", outcome.notes.trim());
    }
    print_variants(handle)?;
    Ok(())
}

fn run_update(
    handle: &SessionHandle,
    events: &Receiver<UpdateEvent>,
    variant: Option<String>,
    yes: bool,
) -> Result<(), Box<dyn Error>> {
    let outcome = wait(handle.spawn_check()?, events)?;
    if outcome.variant_count == 0 {
        return Ok(());
    }
    if !outcome.is_update_available && variant.is_none() {
        println!("Spark {} is up to date", outcome.current_version);
        return Ok(());
    }

    print_variants(handle)?;
    let chosen = match variant {
        Some(name) => handle.with_session(|s| s.select(&name).cloned())??,
        None => handle
            .with_session(|s| s.selected().cloned())?
            .ok_or_else(|| UpdateError::other("Update", "no default variant"))?,
    };

    if !yes && !confirm(&format!(
        "Install {} ({}) and restart Spark?",
        chosen.display_name, chosen.file_name
    ))? {
        handle.with_session(|s| s.abandon())?;
        println!("Cancelled");
        return Ok(());
    }

    let plan = wait(handle.spawn_download()?, events)?;
    println!(
        "Replacing {} files in {}",
        plan.files.len(),
        plan.destination_dir.display()
    );

    // Returns only if the installer could not be started
    wait(handle.spawn_install()?, events)?;
    Ok(())
}

fn print_variants(handle: &SessionHandle) -> Result<(), UpdateError> {
    let listing = handle.with_session(|s| {
        let default = s.catalog().and_then(|c| c.default_variant()).cloned();
        s.catalog()
            .map(|c| {
                c.variants()
                    .iter()
                    .map(|v| (v.clone(), Some(v) == default.as_ref()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    })?;

    for (variant, is_default) in listing {
        println!(
            "  {} {:<20} {}",
            if is_default { "*" } else { " " },
            variant.display_name,
            variant.file_name
        );
    }
    Ok(())
}

fn confirm(question: &str) -> io::Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Print events until the worker finishes, then return its result
fn wait<T>(
    worker: JoinHandle<Result<T, UpdateError>>,
    events: &Receiver<UpdateEvent>,
) -> Result<T, UpdateError> {
    let mut mid_line = false;
    loop {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => print_event(&event, &mut mid_line),
            Err(RecvTimeoutError::Timeout) => {
                if worker.is_finished() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    for event in events.try_iter() {
        print_event(&event, &mut mid_line);
    }
    if mid_line {
        println!();
    }

    worker
        .join()
        .map_err(|_| UpdateError::other("Update worker", "panicked"))?
}

fn print_event(event: &UpdateEvent, mid_line: &mut bool) {
    match event {
        UpdateEvent::Progress(p) => {
            match p.percent {
                Some(percent) => print!(
                    "\r  {:>3}%  {} / {} KB",
                    percent,
                    p.bytes_received / 1024,
                    p.bytes_total.unwrap_or(0) / 1024
                ),
                None => print!("\r  {} KB", p.bytes_received / 1024),
            }
            let _ = io::stdout().flush();
            *mid_line = true;
        }
        UpdateEvent::Status(text) => {
            if std::mem::take(mid_line) {
                println!();
            }
            println!("{}", text);
        }
        UpdateEvent::StateChanged(_) => {}
    }
}
