use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gainstage::audio;
use gainstage::config::Config;
use gainstage::events::TracingSink;
use gainstage::format;
use gainstage::pipeline::{default_config, Pipeline};

#[derive(Parser)]
#[command(name = "gainstage", about = "Session-prep analysis and gain staging for multitrack audio")]
struct Cli {
    /// Directory of audio stems
    path: Option<String>,

    /// Output as JSON instead of table
    #[arg(long)]
    json: bool,

    /// Number of parallel workers (default: number of CPU cores, at most 8)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Write gain-staged copies of every track into this directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON file with configuration values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override one configuration value (key=value); repeatable
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Group definition such as "Drums=kick,snare,oh"; repeatable
    #[arg(long = "group", value_name = "SPEC")]
    groups: Vec<String>,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = default_config();
    if let Some(file) = &cli.config {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read config file: {}", file.display()))?;
        let loaded: Config = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file: {}", file.display()))?;
        for (key, value) in loaded.iter() {
            config.set(key.clone(), value.clone());
        }
    }
    for assignment in &cli.overrides {
        config.set_from_str(assignment)?;
    }
    if !cli.groups.is_empty() {
        let mut groups = config.list("group");
        groups.extend(cli.groups.iter().cloned());
        config.set("group", groups);
    }
    Ok(config)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = build_config(&cli)?;
    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let path_str = cli.path.as_deref().unwrap_or(".");
    let path = Path::new(path_str);
    if !path.is_dir() {
        anyhow::bail!("Path '{}' is not a directory", path_str);
    }

    // Configuration errors surface before any file is decoded.
    let mut pipeline = Pipeline::with_defaults(config.clone())?.with_event_sink(Arc::new(TracingSink));
    if let Some(jobs) = cli.jobs {
        pipeline = pipeline.with_max_workers(jobs);
    }

    let start = Instant::now();
    let mut session = audio::load_session(path, config, &TracingSink, cli.jobs)?;
    pipeline.analyze(&mut session);
    pipeline.plan(&mut session);
    if let Some(output) = &cli.output {
        pipeline.prepare(&mut session, output)?;
    }
    let elapsed = start.elapsed();

    let report = format::session_report(&session, &pipeline);
    if cli.json {
        println!("{}", format::format_json(&report));
    } else {
        println!("{}", format::format_table(&report));
    }

    eprintln!(
        "Processed {} tracks in {:.2}s",
        session.tracks.len(),
        elapsed.as_secs_f64()
    );

    Ok(())
}
