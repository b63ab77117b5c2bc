use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use irrfind::index::{stats, BuildOptions, IndexBuilder, PatternIndex};
use irrfind::output::{self, Hit};
use irrfind::search::{EngineOptions, SearchEngine};
use irrfind::stream::{Catalog, StorageFormat};
use irrfind::utils::{format_count, format_duration, is_digit_string, text_to_digits, AppConfig};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "irrfind")]
#[command(about = "Find where digit strings first appear in mathematical constants")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate the first occurrence of one or more patterns
    Search {
        /// Digit file (.txt or .ycd)
        path: PathBuf,

        /// Patterns to look for
        #[arg(required = true)]
        patterns: Vec<String>,

        /// Treat patterns as words (a=00 ... z=25)
        #[arg(short, long)]
        text: bool,

        /// Skip the pattern index entirely
        #[arg(long)]
        no_cache: bool,

        /// Full-scan worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Digits of context shown on each side of a hit
        #[arg(short = 'C', long, default_value_t = 10)]
        context: usize,

        /// Print one JSON object per pattern
        #[arg(long)]
        json: bool,
    },
    /// Fill the pattern index from the digit files in a directory
    Build {
        /// Directory to scan (defaults to the configured digits_dir)
        dir: Option<PathBuf>,

        /// Leading digits of each file to index
        #[arg(long)]
        digits: Option<u64>,

        /// Longest substring to record
        #[arg(long)]
        max_len: Option<usize>,

        /// Files indexed concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Delete the existing index first
        #[arg(short, long)]
        force: bool,
    },
    /// Show what a digit file contains
    Identify {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show pattern index statistics
    Stats,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    let color = !cli.no_color;

    match cli.command {
        Commands::Search {
            path,
            patterns,
            text,
            no_cache,
            workers,
            context,
            json,
        } => {
            if let Some(w) = workers {
                config.scan_workers = w;
            }
            search(&config, path, &patterns, text, no_cache, context, json, color)?;
        }
        Commands::Build {
            dir,
            digits,
            max_len,
            workers,
            recursive,
            force,
        } => {
            if let Some(d) = digits {
                config.build_window = d;
            }
            if let Some(l) = max_len {
                config.build_max_length = l;
            }
            if let Some(w) = workers {
                config.build_workers = w;
            }
            let dir = dir.unwrap_or_else(|| config.digits_dir.clone());
            build(&config, dir, recursive, force)?;
        }
        Commands::Identify { paths } => {
            let catalog = Catalog::new(config.prefix_size);
            let mut out = output::stdout(color);
            for path in paths {
                match catalog.identify(&path) {
                    Ok(desc) => output::print_descriptor(&mut out, &desc)?,
                    Err(e) => output::print_failure(&mut out, &path, &e)?,
                }
            }
        }
        Commands::Stats => {
            let index = PatternIndex::open(&config.resolved_index_path()?)?;
            stats::show_stats(&index)?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn search(
    config: &AppConfig,
    path: PathBuf,
    patterns: &[String],
    text: bool,
    no_cache: bool,
    context: usize,
    json: bool,
    color: bool,
) -> Result<()> {
    let catalog = Arc::new(Catalog::new(config.prefix_size));
    let index = if no_cache {
        None
    } else {
        let index_path = config.resolved_index_path()?;
        Some(Arc::new(PatternIndex::open(&index_path).with_context(|| {
            format!("Failed to open pattern index at {}", index_path.display())
        })?))
    };
    let engine = SearchEngine::new(catalog, index, EngineOptions::from_config(config))?;
    let stream = engine.stream(&path)?;
    let desc = stream.descriptor();

    let mut out = output::stdout(color);
    if !json {
        output::print_stream_heading(&mut out, desc)?;
    }

    for raw in patterns {
        let pattern = if text { text_to_digits(raw) } else { raw.clone() };
        let plain = desc.format() == StorageFormat::PlainText;
        if plain && !is_digit_string(pattern.as_bytes(), desc.base()) {
            let reason = format!("{:?} is not a base-{} digit string", raw, desc.base());
            output::print_failure(&mut out, &path, &reason)?;
            continue;
        }

        let outcome = engine.locate_pattern(&stream, &pattern)?;

        if json {
            let namespace = desc.identity.namespace();
            output::print_hit_json(&mut out, &Hit::new(&namespace, &pattern, &outcome))?;
            continue;
        }

        let excerpt = match outcome.position() {
            Some(position) if context > 0 && plain => {
                Some(engine.context(&stream, position, pattern.len(), context)?)
            }
            _ => None,
        };
        output::print_hit(&mut out, &pattern, &outcome, excerpt.as_ref())?;
    }

    out.flush()?;
    Ok(())
}

fn build(config: &AppConfig, dir: PathBuf, recursive: bool, force: bool) -> Result<()> {
    let index_path = config.resolved_index_path()?;
    if force {
        PatternIndex::remove(&index_path).context("Failed to remove existing index")?;
    }
    let index = Arc::new(PatternIndex::open(&index_path)?);

    let catalog = Catalog::new(config.prefix_size);
    let descriptors = catalog
        .discover(&dir, recursive)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;

    println!("Indexing: {}", dir.display());
    if descriptors.is_empty() {
        println!("No digit files found.");
        return Ok(());
    }
    for desc in &descriptors {
        println!("  {}", desc);
    }

    let mut options = BuildOptions::from_config(config);
    options.show_progress = true;
    let report = IndexBuilder::new(index, options).build(descriptors)?;

    println!(
        "Indexed {} streams ({} skipped): {} patterns, {} new, in {}",
        report.streams_processed,
        report.streams_skipped,
        format_count(report.patterns_emitted as f64),
        format_count(report.rows_inserted as f64),
        format_duration(report.elapsed)
    );
    println!("Index stored at: {}", index_path.display());
    Ok(())
}
