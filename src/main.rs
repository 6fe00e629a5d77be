use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use pixdedup::services::scanner::{ScanOptions, ScanPhase, ScanReport, ScanSession};
use pixdedup::services::state::StateSnapshot;

#[derive(Parser, Debug)]
#[command(name = "pixdedup", version, about = "Find and remove visually duplicate images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a directory and list duplicate groups
    Scan {
        /// Directory to scan
        #[arg(value_name = "DIR")]
        path: PathBuf,

        /// Similarity threshold in (0, 1]; 1.0 matches only identical hashes
        #[arg(long, default_value_t = 0.95)]
        threshold: f64,

        /// Perceptual hash size (N produces an N×N-bit fingerprint)
        #[arg(long, default_value_t = 8)]
        hash_size: u32,

        /// Do not descend into subdirectories
        #[arg(long)]
        no_recursive: bool,

        /// Emit the full group map as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan and delete redundant copies, keeping the best of each group
    Clean {
        /// Directory to clean
        #[arg(value_name = "DIR")]
        path: PathBuf,

        /// Similarity threshold in (0, 1]
        #[arg(long, default_value_t = 0.95)]
        threshold: f64,

        /// Perceptual hash size
        #[arg(long, default_value_t = 8)]
        hash_size: u32,

        /// Do not descend into subdirectories
        #[arg(long)]
        no_recursive: bool,

        /// Show what would be deleted without touching anything
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            path,
            threshold,
            hash_size,
            no_recursive,
            json,
        } => {
            let (session, report) = run_scan(path, threshold, hash_size, no_recursive)?;
            let snapshot = session.groups().snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_report(&report, &snapshot);
            }
            Ok(())
        }
        Commands::Clean {
            path,
            threshold,
            hash_size,
            no_recursive,
            dry_run,
            yes,
        } => {
            let (session, report) = run_scan(path, threshold, hash_size, no_recursive)?;
            let snapshot = session.groups().snapshot();
            print_report(&report, &snapshot);

            if snapshot.summary.total_groups == 0 {
                return Ok(());
            }

            let redundant = snapshot.summary.total_images - snapshot.summary.total_groups;
            if dry_run {
                println!(
                    "\nDry run: {} files would be deleted, freeing {}.",
                    redundant,
                    format_bytes(snapshot.summary.estimated_space_saved)
                );
                return Ok(());
            }

            if !yes {
                let prompt = format!(
                    "Delete {} redundant files ({} reclaimable)?",
                    redundant,
                    format_bytes(snapshot.summary.estimated_space_saved)
                );
                if !Confirm::new().with_prompt(prompt).default(false).interact()? {
                    println!("Aborted.");
                    return Ok(());
                }
            }

            let outcome = session.groups().delete_all();
            println!(
                "\nDeleted {} files, freed {}.",
                outcome.files_deleted,
                format_bytes(outcome.space_saved)
            );
            if !outcome.failures.is_empty() {
                eprintln!("{} groups had failures:", outcome.failures.len());
                for failure in &outcome.failures {
                    eprintln!("  {}: {}", failure.group_key, failure.reason);
                }
                bail!("some duplicates could not be deleted");
            }
            Ok(())
        }
    }
}

/// Run one scan with a live progress spinner, returning the session so the
/// caller can read the installed group state.
fn run_scan(
    path: PathBuf,
    threshold: f64,
    hash_size: u32,
    no_recursive: bool,
) -> Result<(ScanSession, ScanReport)> {
    let mut options = ScanOptions::new(&path);
    options.similarity_threshold = threshold;
    options.hash_size = hash_size;
    options.recursive = !no_recursive;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let session = ScanSession::new().with_progress_sender(tx);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("valid progress template"),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    let progress_bar = spinner.clone();
    let reporter = thread::spawn(move || {
        while let Some(progress) = rx.blocking_recv() {
            match progress.phase {
                ScanPhase::Discovery => {
                    progress_bar.set_message(format!(
                        "Discovering images… {} found",
                        progress.files_discovered
                    ));
                }
                ScanPhase::Hashing => {
                    progress_bar.set_message(format!(
                        "Hashing {}/{}",
                        progress.files_processed, progress.files_discovered
                    ));
                }
                ScanPhase::Grouping => {
                    progress_bar.set_message("Grouping similar images…");
                }
                ScanPhase::Complete => break,
            }
        }
    });

    let result = session
        .scan(&options)
        .with_context(|| format!("failed to scan {}", path.display()));
    let _ = reporter.join();
    spinner.finish_and_clear();

    let report = result?;
    Ok((session, report))
}

fn print_report(report: &ScanReport, snapshot: &StateSnapshot) {
    println!(
        "Scanned {} images, {} failed to decode.",
        report.files_processed,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  skipped {}: {}", failure.path.display(), failure.reason);
    }

    if snapshot.summary.total_groups == 0 {
        println!("No duplicate groups found.");
        return;
    }

    println!(
        "\n{} duplicate groups across {} images ({} reclaimable):",
        snapshot.summary.total_groups,
        snapshot.summary.total_images,
        format_bytes(snapshot.summary.estimated_space_saved)
    );

    for (key, group) in &snapshot.groups {
        println!("\n{} ({} images):", key, group.members.len());
        for member in &group.members {
            let marker = if member.is_representative { "keep" } else { "drop" };
            let score = member
                .quality_score
                .map(|s| format!("{s:.3}"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  [{}] {} (score {}, {})",
                marker,
                member.path.display(),
                score,
                format_bytes(member.file_size)
            );
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
