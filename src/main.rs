//! `eit-force-sync` command line tool.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eit_force_sync::analysis::{project_dataset, FeatureScaling};
use eit_force_sync::config::Settings;
use eit_force_sync::dataset::{self, DatasetManifestBuilder, Normalization, SampleFormat};
use eit_force_sync::eit::convert::has_converted_frames;
use eit_force_sync::eit::{convert_directory, load_frames};
use eit_force_sync::isoforce::{clean_device_export, load_participant};
use eit_force_sync::logging;
use eit_force_sync::protocol::Protocol;
use eit_force_sync::report::ParticipantReport;
use eit_force_sync::schedule::{force_level_schedule, participant_layout, TrialProgress};
use eit_force_sync::sync::{synchronize, SyncMode};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "eit-force-sync")]
#[command(about = "Synchronize EIT frames with isokinetic torque recordings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: eit-sync.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert the raw EIT sessions of participants P01..PNN
    ConvertEit {
        /// Folder holding the participant folders
        #[arg(long)]
        base_dir: PathBuf,

        /// Number of participants (default from config)
        #[arg(long)]
        participants: Option<usize>,
    },

    /// Turn a dynamometer text export into a clean CSV
    CleanIsoforce {
        /// Tab-separated export with decimal commas
        input: PathBuf,
        /// Output CSV
        output: PathBuf,
    },

    /// Synchronize one participant and export its samples
    Sync {
        /// Participant folder
        participant_dir: PathBuf,

        /// Frame lookup strategy
        #[arg(long, value_enum)]
        mode: Option<SyncMode>,

        /// Dataset root (default from config)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Sample file format
        #[arg(long, value_enum)]
        format: Option<SampleFormat>,

        /// Refine device segments against the recorder before syncing
        #[arg(long)]
        refine: bool,
    },

    /// Data quality summary of a participant folder
    Report {
        /// Participant folder
        participant_dir: PathBuf,
    },

    /// Principal components of an exported dataset
    Pca {
        /// Dataset root
        #[arg(long)]
        dataset: PathBuf,

        /// Comma-separated participant folders, e.g. P01,P02
        #[arg(long, value_delimiter = ',', required = true)]
        participants: Vec<String>,

        /// Z-scoring applied when loading (default from config)
        #[arg(long, value_enum)]
        normalization: Option<Normalization>,

        /// Feature scaling before the fit (default from config)
        #[arg(long, value_enum)]
        scaling: Option<FeatureScaling>,

        #[arg(long)]
        components: Option<usize>,

        /// Projection CSV
        #[arg(long)]
        out: PathBuf,
    },

    /// Print a randomized force-level schedule
    Schedule {
        /// Seed for a reproducible order
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Create the raw data folders of a new participant and draw its schedule
    InitParticipant {
        /// Folder holding the participant folders
        #[arg(long)]
        base_dir: PathBuf,

        /// Participant folder name, e.g. P07
        participant: String,

        /// Seed for a reproducible order
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.json {
        settings.application.json_logs = true;
    }
    logging::init(&settings.application, cli.verbose);

    match cli.command {
        Commands::ConvertEit {
            base_dir,
            participants,
        } => {
            let count = participants.unwrap_or(settings.dataset.participant_count);
            convert_all(&settings, &base_dir, count)
        }
        Commands::CleanIsoforce { input, output } => {
            let rec = clean_device_export(&input, &output)
                .with_context(|| format!("Failed to clean {}", input.display()))?;
            info!("{} rows written", rec.len());
            Ok(())
        }
        Commands::Sync {
            participant_dir,
            mode,
            out,
            format,
            refine,
        } => {
            if let Some(mode) = mode {
                settings.sync.mode = mode;
            }
            if let Some(format) = format {
                settings.dataset.format = format;
            }
            if refine {
                settings.sync.refine_device_segments = true;
            }
            let out = out.unwrap_or_else(|| settings.dataset.output_dir.clone());
            run_sync(&settings, &participant_dir, &out)
        }
        Commands::Report { participant_dir } => report(&settings, &participant_dir),
        Commands::Pca {
            dataset,
            participants,
            normalization,
            scaling,
            components,
            out,
        } => {
            let analysis = &mut settings.analysis;
            if let Some(n) = normalization {
                analysis.normalization = n;
            }
            if let Some(s) = scaling {
                analysis.scaling = s;
            }
            if let Some(c) = components {
                analysis.components = c;
            }
            run_pca(&settings, &dataset, &participants, &out)
        }
        Commands::Schedule { seed } => {
            for (trial, level) in schedule(seed).iter().enumerate() {
                println!("{:2}  {}% MVC", trial + 1, level);
            }
            Ok(())
        }
        Commands::InitParticipant {
            base_dir,
            participant,
            seed,
        } => {
            let layout = participant_layout(&base_dir, &participant)
                .with_context(|| format!("Failed to create {participant}"))?;
            println!("EIT files:      {}", layout.eit_raw.display());
            println!("Torque files:   {}", layout.iso_raw.display());
            let mut progress = TrialProgress::new(schedule(seed));
            for _ in 0..progress.len() {
                println!("{progress}");
                progress.advance();
            }
            Ok(())
        }
        Commands::Config {
            command: ConfigCommands::Show,
        } => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

fn schedule(seed: Option<u64>) -> Vec<i64> {
    match seed {
        Some(seed) => force_level_schedule(&mut StdRng::seed_from_u64(seed)),
        None => force_level_schedule(&mut rand::thread_rng()),
    }
}

fn convert_all(settings: &Settings, base_dir: &Path, count: usize) -> Result<()> {
    for i in 1..=count {
        let participant = format!("P{i:02}");
        let dir = base_dir.join(&participant);
        if !dir.is_dir() {
            warn!("{} does not exist, skipping", dir.display());
            continue;
        }
        let protocol = Protocol::load(&dir)
            .with_context(|| format!("Failed to read protocol of {participant}"))?;
        match convert_directory(&dir, &protocol, &settings.eit, None) {
            Ok(summary) => info!("{}: {} frames", participant, summary.converted),
            Err(e) => warn!("{}: conversion failed: {}", participant, e),
        }
    }
    Ok(())
}

fn run_sync(settings: &Settings, dir: &Path, out: &Path) -> Result<()> {
    let recordings = load_participant(dir, settings)
        .with_context(|| format!("Failed to load {}", dir.display()))?;

    let frames_dir = dir.join(&settings.eit.processed_dir);
    if !has_converted_frames(&frames_dir) {
        info!("No converted EIT frames in {}, converting", frames_dir.display());
        convert_directory(dir, &recordings.protocol, &settings.eit, None)
            .context("EIT conversion failed")?;
    }

    let (device, recorder) = recordings.segment(settings)?;
    let eit = load_frames(&frames_dir)?;
    let mut result = synchronize(&eit, &device, &recorder, &recordings.protocol, &settings.sync)
        .context("Synchronization failed")?;
    if result.participant.is_empty() {
        result.participant = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
    }

    let target = out.join(&result.participant);
    let mut writer = settings.dataset.format.writer();
    let written = dataset::export(&result, writer.as_mut(), &target)
        .with_context(|| format!("Failed to export to {}", target.display()))?;

    let manifest = DatasetManifestBuilder::new()
        .participant(&result.participant)
        .leg(&recordings.protocol.participant.leg.to_string())
        .format(settings.dataset.format)
        .sync_result(&result)
        .parameter("max_offset_s", serde_json::json!(settings.sync.max_offset_s))
        .parameter(
            "refine_device_segments",
            serde_json::json!(settings.sync.refine_device_segments),
        )
        .parameter(
            "device_csv",
            serde_json::json!(recordings.device_csv.display().to_string()),
        )
        .notes(&recordings.protocol.notes)
        .build();
    manifest.validate().map_err(anyhow::Error::msg)?;
    manifest.write(&target)?;

    info!(
        "{}: {} segments synchronized, {} skipped, {} samples written to {}",
        result.participant,
        result.segments.len(),
        result.skipped.len(),
        written,
        target.display()
    );
    Ok(())
}

fn report(settings: &Settings, dir: &Path) -> Result<()> {
    let report = ParticipantReport::collect(dir, settings)
        .with_context(|| format!("Failed to load {}", dir.display()))?;
    print!("{report}");
    Ok(())
}

fn run_pca(settings: &Settings, root: &Path, participants: &[String], out: &Path) -> Result<()> {
    let projection = project_dataset(root, participants, &settings.analysis)
        .context("PCA of the dataset failed")?;
    projection
        .write_csv(out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    Ok(())
}
