use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hummatch::config::AppConfig;
use hummatch::library::{self, midi};
use hummatch::matcher::{self, CancelToken, MatchError};
use hummatch::{Candidate, format_time};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "hummatch",
    version,
    about = "Find where a melody fragment occurs in a MIDI library"
)]
struct Cli {
    /// Directory of reference MIDI files (overrides config library_dir)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Config file (defaults to the XDG config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Chunking flags shared by every command that loads the library.
#[derive(clap::Args)]
struct SegmentArgs {
    /// Chunk length in seconds
    #[arg(long)]
    chunk_length: Option<f64>,

    /// Overlap between consecutive chunks in seconds
    #[arg(long)]
    overlap: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Match a query MIDI file against the library
    Search {
        /// Query MIDI file (a transcribed hum or played fragment)
        query: PathBuf,

        #[command(flatten)]
        segment: SegmentArgs,

        /// Number of distinct tracks to return
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Number of parallel workers (0 = one per core)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Semitone shifts to try, e.g. "-2,-1,0,1,2"
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        shifts: Option<Vec<i32>>,

        /// Disable duration weighting (plain DTW cost)
        #[arg(long)]
        no_weighting: bool,

        /// Exponent applied to summed note weights
        #[arg(long)]
        weight_exponent: Option<f64>,

        /// Reward per exactly matching note pair
        #[arg(long)]
        reward: Option<f64>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how the library splits into chunks
    Chunks {
        #[command(flatten)]
        segment: SegmentArgs,
    },

    /// Print the pitch sequence read from a MIDI file
    Notes {
        file: PathBuf,
    },

    /// Cut a reference track around a match so it can be auditioned
    Excerpt {
        /// Reference MIDI file
        file: PathBuf,

        /// Start time in seconds
        #[arg(long)]
        start: f64,

        /// Excerpt length in seconds
        #[arg(long, default_value = "20")]
        duration: f64,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    match cli.command {
        Commands::Search {
            query,
            segment,
            limit,
            jobs,
            shifts,
            no_weighting,
            weight_exponent,
            reward,
            json,
        } => {
            let library_dir = resolve_library(cli.library.as_deref(), &config)?;
            let library = load_library(&library_dir, &segment, &config)?;

            let query_seq = midi::load_pitch_sequence(&query)
                .with_context(|| format!("Failed to load query {}", query.display()))?;
            log::info!("Query: {} notes", query_seq.len());

            let mut match_config = config.match_config();
            match_config.show_progress = !json;
            if let Some(n) = limit {
                match_config.top_n = n;
            }
            if let Some(j) = jobs {
                match_config.workers = j;
            }
            if let Some(s) = shifts {
                match_config.semitone_range = s;
            }
            if no_weighting {
                match_config.scorer.use_duration_weighting = false;
            }
            if let Some(p) = weight_exponent {
                match_config.scorer.weight_exponent = p;
            }
            if let Some(r) = reward {
                match_config.scorer.reward_factor = r;
            }

            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || handler_token.cancel())
                .context("Failed to install Ctrl-C handler")?;

            let outcome = match matcher::search_with_cancel(
                &query_seq,
                &library.chunks,
                &match_config,
                &cancel,
            ) {
                Err(MatchError::Cancelled) => {
                    eprintln!("Search cancelled.");
                    return Ok(());
                }
                other => other.context("Search failed")?,
            };

            for failure in &outcome.failures {
                eprintln!(
                    "warning: chunk {} of \"{}\" was dropped: {}",
                    failure.chunk_index, failure.track_name, failure.message
                );
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.matches)?);
                return Ok(());
            }

            if outcome.matches.is_empty() {
                println!("No matches found.");
                return Ok(());
            }

            println!(
                "Top {} matches ({} chunks scored, {} empty):",
                outcome.matches.len(),
                outcome.chunks_scored,
                outcome.chunks_skipped
            );
            println!();
            print_match_table(&outcome.matches);
        }

        Commands::Chunks { segment } => {
            let library_dir = resolve_library(cli.library.as_deref(), &config)?;
            let library = load_library(&library_dir, &segment, &config)?;

            if library.is_empty() {
                println!("No chunks. Tracks may be shorter than one chunk.");
            }

            println!("{:<40} {:>7} {:>7} {:>8}", "Track", "Chunks", "Empty", "Notes");
            println!("{}", "-".repeat(65));
            for name in library.track_names() {
                let chunks: Vec<_> = library
                    .chunks
                    .iter()
                    .filter(|c| c.track_name == name)
                    .collect();
                let empty = chunks.iter().filter(|c| c.pitches.is_empty()).count();
                let notes: usize = chunks.iter().map(|c| c.pitches.len()).sum();
                println!(
                    "{:<40} {:>7} {:>7} {:>8}",
                    truncate(name, 40),
                    chunks.len(),
                    empty,
                    notes
                );
            }
            println!();
            println!(
                "{} tracks, {} chunks, {} files failed to load",
                library.tracks_loaded,
                library.chunks.len(),
                library.failures.len()
            );
        }

        Commands::Notes { file } => {
            let seq = midi::load_pitch_sequence(&file)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            println!("{} notes", seq.len());
            for note in seq.notes() {
                println!("{:>9.3}  {:>3}", note.onset, note.pitch);
            }
        }

        Commands::Excerpt {
            file,
            start,
            duration,
            out_dir,
        } => {
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;
            let name = library::track_name(&file);
            let dest = out_dir.join(midi::excerpt_file_name(&name, start));
            let copied = midi::write_excerpt(&file, &dest, start, duration)
                .context("Excerpt failed")?;
            println!(
                "Wrote {} events from {} ({}) to {}",
                copied,
                name,
                format_time(start),
                dest.display()
            );
        }
    }

    Ok(())
}

/// Resolve library directory: CLI > config.
fn resolve_library(cli: Option<&Path>, config: &AppConfig) -> Result<PathBuf> {
    match cli.map(Path::to_path_buf).or_else(|| config.library_dir.clone()) {
        Some(dir) => Ok(dir),
        None => anyhow::bail!(
            "No library directory. Pass --library or set library_dir in config."
        ),
    }
}

fn load_library(dir: &Path, args: &SegmentArgs, config: &AppConfig) -> Result<library::Library> {
    let mut segment_config = config.segment_config();
    segment_config.show_progress = true;
    if let Some(len) = args.chunk_length {
        segment_config.chunk_length = len;
    }
    if let Some(overlap) = args.overlap {
        segment_config.overlap = overlap;
    }

    let library = library::segment_library(dir, &segment_config)
        .with_context(|| format!("Failed to load library {}", dir.display()))?;
    for failure in &library.failures {
        eprintln!("warning: skipped {}: {}", failure.path.display(), failure.reason);
    }
    Ok(library)
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width - 3).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// Print ranked matches.
fn print_match_table(matches: &[Candidate]) {
    println!(
        "{:>3}  {:<40} {:>6} {:>10} {:>6} {:>7}",
        "#", "Track", "Start", "Distance", "Shift", "Transp"
    );
    println!("{}", "-".repeat(80));

    for (i, m) in matches.iter().enumerate() {
        println!(
            "{:>3}  {:<40} {:>6} {:>10.3} {:>+6} {:>+7}",
            i + 1,
            truncate(&m.track_name, 40),
            format_time(m.start_time),
            m.distance,
            m.semitone_shift,
            m.transposition(),
        );
    }

    println!();
    println!("Distance: lower = closer (negative = long notes matched exactly)");
    println!(
        "Shift = fine shift applied to the query; Transp = semitones from query key to track key"
    );
}
