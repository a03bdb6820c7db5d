use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use choirsync::config::AppConfig;
use choirsync::features::{self, FeatureCache};
use choirsync::loader::load_track;
use choirsync::publish::{OffsetSet, Report};
use choirsync::scanner::scan_project;
use choirsync::strategy::{align, SyncStrategy};

#[derive(Parser)]
#[command(name = "choirsync", version, about = "Virtual-choir track aligner")]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum SyncMode {
    /// Mutual best fit over all pairs of clarity series (default)
    Clarity,
    /// Lead-in clap cue detection, no correlation
    Clap,
}

#[derive(Subcommand)]
enum Commands {
    /// Align all takes in a project directory and write the offsets
    Sync {
        /// Project folder containing the takes
        project: PathBuf,

        /// Sync strategy
        #[arg(long, value_enum, default_value = "clarity")]
        sync: SyncMode,

        /// Correlate everything against this track only (matched by
        /// file-name suffix); overrides --sync
        #[arg(long)]
        reference: Option<String>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Recompute descriptors even when a fresh cache entry exists
        #[arg(long)]
        no_cache: bool,
    },

    /// Show the offsets stored in a previously written .lof file
    Offsets {
        /// Path to the .lof file
        lof: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = AppConfig::load();

    match cli.command {
        Commands::Sync {
            project,
            sync,
            reference,
            jobs,
            no_cache,
        } => {
            let strategy = match (reference, sync) {
                (Some(name), _) => SyncStrategy::ReferenceTrack(name),
                (None, SyncMode::Clarity) => SyncStrategy::MutualBestFit,
                (None, SyncMode::Clap) => SyncStrategy::ClapDetect,
            };
            let workers = if jobs > 0 {
                jobs
            } else {
                config.resolve_workers()
            };
            run_sync(&project, strategy, &config, workers, no_cache)
        }
        Commands::Offsets { lof } => {
            let set = OffsetSet::read_lof(&lof)
                .with_context(|| format!("Failed to read {}", lof.display()))?;
            println!("{:<50} {:>10} {:>10}", "track", "offset(s)", "offset(ms)");
            for entry in set.entries() {
                println!(
                    "{:<50} {:>10.3} {:>10.1}",
                    entry.name,
                    entry.offset_secs,
                    entry.offset_ms()
                );
            }
            Ok(())
        }
    }
}

fn run_sync(
    project: &Path,
    strategy: SyncStrategy,
    config: &AppConfig,
    workers: usize,
    no_cache: bool,
) -> Result<()> {
    let takes = scan_project(project);
    if takes.is_empty() {
        anyhow::bail!("No audio or video takes found under {}", project.display());
    }
    println!(
        "Found {} takes ({} video) in {}",
        takes.len(),
        takes.iter().filter(|t| t.is_video).count(),
        project.display()
    );

    println!("Loading takes...");
    let mut tracks = Vec::with_capacity(takes.len());
    for take in &takes {
        let track = load_track(&take.name, &take.path, config.sample_rate)
            .with_context(|| format!("Failed to decode {}", take.path.display()))?;
        tracks.push(track);
    }

    let cache = if no_cache {
        None
    } else {
        match FeatureCache::open(project) {
            Ok(cache) => Some(cache),
            Err(e) => {
                log::warn!("Feature cache unavailable: {e}. Recomputing everything.");
                None
            }
        }
    };

    println!("Extracting descriptors ({workers} workers)...");
    let series = features::extract_all(&tracks, cache.as_ref(), config, workers);

    println!("Aligning ({})...", strategy.label());
    let alignment = align(&tracks, &series, &strategy, config, workers)?;
    if !alignment.diagnostics.converged {
        log::warn!(
            "solver did not converge within {} iterations; offsets are the last computed vector",
            config.solver.max_iterations
        );
    }

    let names: Vec<String> = tracks.iter().map(|t| t.name.clone()).collect();
    let offsets = OffsetSet::new(&names, &alignment.offsets);

    let results_dir = project.join("results");
    std::fs::create_dir_all(&results_dir)
        .with_context(|| format!("Failed to create {}", results_dir.display()))?;
    offsets.write_lof(&results_dir.join("audacity_import.lof"))?;

    let rms_hints: Vec<f64> = series.iter().map(|s| s.rms_hint()).collect();
    let report = Report::build(strategy.label(), &offsets, &alignment, &rms_hints);
    report.write(&results_dir.join("report.json"))?;

    println!(
        "\n{:<50} {:>10} {:>9} {:>6}",
        "track", "offset(s)", "dev(s)", "conf"
    );
    for (i, entry) in offsets.entries().iter().enumerate() {
        let flag = if alignment.diagnostics.suspect.contains(&i) {
            "  <- low confidence"
        } else {
            ""
        };
        println!(
            "{:<50} {:>10.3} {:>9.3} {:>6.2}{}",
            entry.name,
            entry.offset_secs,
            alignment.diagnostics.deviations.get(i).copied().unwrap_or(0.0),
            alignment.diagnostics.confidences.get(i).copied().unwrap_or(0.0),
            flag
        );
    }
    if alignment.diagnostics.iterations > 0 {
        println!(
            "\nSolver: {} iterations, {}",
            alignment.diagnostics.iterations,
            if alignment.diagnostics.converged {
                "converged"
            } else {
                "NOT converged"
            }
        );
    }
    println!("Results written to {}", results_dir.display());
    Ok(())
}
