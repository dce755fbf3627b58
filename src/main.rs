//! pcb-inspector CLI: manage reference samples and inspect boards against them.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use pcb_inspector::analyzer::VisionClient;
use pcb_inspector::capture::{self, crop_to_board, detect_board, ImageFileSource};
use pcb_inspector::compare::detect_components;
use pcb_inspector::config::user_config_path;
use pcb_inspector::samples::SampleUpdate;
use pcb_inspector::{
    BoardSide, InspectionHistory, InspectionRequest, Inspector, InspectorConfig, InspectorError,
    QaSample, SampleStore,
};

#[derive(Parser)]
#[command(name = "pcb-inspector")]
#[command(about = "Inspect PCB images against stored known-good reference samples")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config, then built-in defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage reference samples.
    #[command(subcommand)]
    Sample(SampleCommand),

    /// Inspect a board image against a reference sample.
    Inspect(InspectArgs),

    /// Locate the board in an image.
    DetectBoard {
        #[arg(long)]
        image: PathBuf,
    },

    /// List component-like blobs found in an image.
    Components {
        #[arg(long)]
        image: PathBuf,
    },

    /// Browse past inspections.
    #[command(subcommand)]
    History(HistoryCommand),

    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum SampleCommand {
    /// Create a sample from front and back images.
    Create {
        #[arg(long)]
        board: String,
        #[arg(long)]
        front: PathBuf,
        #[arg(long)]
        back: PathBuf,
        #[arg(long, default_value = "")]
        notes: String,
        /// Repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List samples, newest first.
    List {
        #[arg(long)]
        json: bool,
    },
    Show {
        sample_id: String,
    },
    /// Change the board name, notes or tags of a sample.
    Update {
        sample_id: String,
        #[arg(long)]
        board: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Replaces all tags. Repeatable.
        #[arg(long = "tag")]
        tags: Option<Vec<String>>,
    },
    Delete {
        sample_id: String,
    },
    /// Check that a sample's metadata and images are usable.
    Validate {
        sample_id: String,
    },
}

#[derive(Args)]
struct InspectArgs {
    /// Reference sample id.
    #[arg(long, conflicts_with = "board")]
    sample: Option<String>,

    /// Use the newest sample for this board name instead of an id.
    #[arg(long)]
    board: Option<String>,

    /// Candidate board image.
    #[arg(long)]
    image: PathBuf,

    #[arg(long, default_value = "front")]
    side: BoardSide,

    /// Ask the configured vision model to describe suspect regions.
    #[arg(long)]
    describe: bool,

    /// Equalize and denoise both the reference and the candidate before
    /// inspection.
    #[arg(long)]
    enhance: bool,

    /// Crop the candidate to the detected board first.
    #[arg(long)]
    crop_board: bool,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Do not record the result in the history database.
    #[arg(long)]
    no_record: bool,
}

#[derive(Subcommand)]
enum HistoryCommand {
    List {
        /// Only inspections of this sample.
        #[arg(long)]
        sample: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    Show {
        inspection_id: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the default config, or write it to the user config path.
    Init {
        #[arg(long)]
        write: bool,
    },
    /// Print the effective configuration.
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    pcb_inspector::init_tracing();
    let cli = Cli::parse();
    let config = InspectorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Sample(cmd) => run_sample(cmd, &config),
        Commands::Inspect(args) => run_inspect(args, config).await,
        Commands::DetectBoard { image } => run_detect_board(&image, &config),
        Commands::Components { image } => run_components(&image),
        Commands::History(cmd) => run_history(cmd, &config),
        Commands::Config(cmd) => run_config(cmd, &config),
    }
}

fn open_samples(config: &InspectorConfig) -> Result<SampleStore> {
    let root = config.samples_root()?;
    Ok(SampleStore::new(&root)?)
}

fn open_history(config: &InspectorConfig) -> Result<InspectionHistory> {
    let path = config.history_path()?;
    Ok(InspectionHistory::new(&path).map_err(InspectorError::History)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_sample(sample: &QaSample) {
    println!("{}", sample.sample_id);
    println!("  Board:    {}", sample.board_name);
    println!("  Created:  {}", sample.created_date.format("%Y-%m-%d %H:%M:%S"));
    if let Some(modified) = sample.last_modified {
        println!("  Modified: {}", modified.format("%Y-%m-%d %H:%M:%S"));
    }
    if !sample.tags.is_empty() {
        println!("  Tags:     {}", sample.tags.join(", "));
    }
    if !sample.notes.is_empty() {
        println!("  Notes:    {}", sample.notes);
    }
    println!("  Front:    {}", sample.image_paths.front.display());
    println!("  Back:     {}", sample.image_paths.back.display());
}

fn run_sample(cmd: SampleCommand, config: &InspectorConfig) -> Result<()> {
    let store = open_samples(config)?;
    match cmd {
        SampleCommand::Create {
            board,
            front,
            back,
            notes,
            tags,
        } => {
            let sample = store.create_sample(&board, &front, &back, &notes, &tags)?;
            println!("Created sample {}", sample.sample_id);
        }
        SampleCommand::List { json } => {
            let samples = store.list_samples()?;
            if json {
                return print_json(&samples);
            }
            if samples.is_empty() {
                println!("No samples stored in {}", store.root().display());
            }
            for s in &samples {
                println!(
                    "{}  {}  {}",
                    s.sample_id,
                    s.created_date.format("%Y-%m-%d %H:%M"),
                    s.board_name
                );
            }
        }
        SampleCommand::Show { sample_id } => {
            let sample = store
                .get_sample(&sample_id)?
                .with_context(|| format!("Sample not found: {}", sample_id))?;
            print_sample(&sample);
        }
        SampleCommand::Update {
            sample_id,
            board,
            notes,
            tags,
        } => {
            let update = SampleUpdate {
                board_name: board,
                notes,
                tags,
            };
            let sample = store.update_sample(&sample_id, update)?;
            print_sample(&sample);
        }
        SampleCommand::Delete { sample_id } => {
            if !store.delete_sample(&sample_id)? {
                bail!("Sample not found: {}", sample_id);
            }
            println!("Deleted sample {}", sample_id);
        }
        SampleCommand::Validate { sample_id } => {
            if store.validate_sample(&sample_id) {
                println!("Sample {} is valid", sample_id);
            } else {
                bail!("Sample {} is missing metadata or images", sample_id);
            }
        }
    }
    Ok(())
}

async fn run_inspect(args: InspectArgs, config: InspectorConfig) -> Result<()> {
    let store = open_samples(&config)?;
    let sample = match (&args.sample, &args.board) {
        (Some(id), _) => store
            .get_sample(id)?
            .with_context(|| format!("Sample not found: {}", id))?,
        (None, Some(board)) => store
            .find_by_board(board)?
            .with_context(|| format!("No sample stored for board '{}'", board))?,
        (None, None) => bail!("Pass --sample <id> or --board <name>"),
    };

    let reference = store.load_image(&sample.sample_id, args.side)?;
    let mut source = ImageFileSource::new(&args.image);
    let mut candidate = capture::capture_snapshot(&mut source, false, None)?;

    if args.crop_board {
        match detect_board(&candidate, &config.board_detection) {
            Some(region) => {
                info!(
                    "Board found at {:?} (confidence {:.2})",
                    region.bbox, region.confidence
                );
                candidate =
                    crop_to_board(&candidate, &region, config.board_detection.crop_margin);
            }
            None => warn!("No board detected, inspecting the full frame"),
        }
    }

    let mut request = InspectionRequest {
        sample_id: sample.sample_id.clone(),
        board_name: sample.board_name.clone(),
        side: args.side,
        reference,
        candidate,
        candidate_path: Some(args.image.clone()),
    };
    if args.enhance {
        request = request.enhanced();
    }

    let inspector = if args.describe {
        let client = VisionClient::from_config(&config.ai)
            .context("Vision model unavailable; run without --describe or configure an API key")?;
        Inspector::with_describer(config.clone(), client)
    } else {
        Inspector::new(config.clone())
    };
    let report = inspector.inspect(request).await?;

    if !args.no_record {
        let history = open_history(&config)?;
        let to_record = report.clone();
        tokio::task::spawn_blocking(move || history.record_inspection(&to_record))
            .await
            .context("History task failed")?
            .map_err(InspectorError::History)?;
    }

    if args.json {
        print_json(&report)
    } else {
        print!("{}", report.render_text());
        Ok(())
    }
}

fn run_detect_board(image: &Path, config: &InspectorConfig) -> Result<()> {
    let frame = capture::load_image(image)?;
    match detect_board(&frame, &config.board_detection) {
        Some(region) => {
            let b = region.bbox;
            println!(
                "Board at x={} y={} {}x{} (area {}, confidence {:.2})",
                b.x, b.y, b.width, b.height, region.area, region.confidence
            );
            Ok(())
        }
        None => bail!("No board detected in {}", image.display()),
    }
}

fn run_components(image: &Path) -> Result<()> {
    let frame = capture::load_image(image)?;
    let components = detect_components(&frame);
    if components.is_empty() {
        println!("No components detected");
    }
    for c in &components {
        println!(
            "#{:<3} {:<24} x={} y={} {}x{} aspect {:.2}",
            c.id,
            c.kind.as_str(),
            c.bbox.x,
            c.bbox.y,
            c.bbox.width,
            c.bbox.height,
            c.aspect_ratio
        );
    }
    Ok(())
}

fn run_history(cmd: HistoryCommand, config: &InspectorConfig) -> Result<()> {
    let history = open_history(config)?;
    match cmd {
        HistoryCommand::List {
            sample,
            limit,
            json,
        } => {
            let rows = history
                .list_inspections(sample.as_deref(), limit)
                .map_err(InspectorError::History)?;
            if json {
                return print_json(&rows);
            }
            if rows.is_empty() {
                println!("No inspections recorded");
            }
            for r in &rows {
                println!(
                    "{}  {:<9} {:.4}  {} ({})",
                    r.inspection_id,
                    r.verdict.as_str(),
                    r.similarity_score,
                    r.board_name,
                    r.side
                );
            }
        }
        HistoryCommand::Show {
            inspection_id,
            json,
        } => {
            let record = history
                .get_inspection(&inspection_id)
                .map_err(InspectorError::History)?;
            if json {
                return print_json(&record.report);
            }
            print!("{}", record.report.render_text());
        }
    }
    Ok(())
}

fn run_config(cmd: ConfigCommand, config: &InspectorConfig) -> Result<()> {
    match cmd {
        ConfigCommand::Init { write: false } => {
            print!("{}", InspectorConfig::default_toml());
        }
        ConfigCommand::Init { write: true } => {
            let path = user_config_path().context("No config directory on this platform")?;
            if path.exists() {
                bail!("Config already exists at {}", path.display());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, InspectorConfig::default_toml())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        ConfigCommand::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
    }
    Ok(())
}
