//! FactorLab CLI: fetch factor datasets and manage the download cache.
//!
//! Commands:
//! - `fetch`: download, normalize and print one model, a built-in composite or a merged collection
//! - `models`: list registered models, composites and their aliases
//! - `regions`: list the regions a model is published for
//! - `cache status` / `cache clear` / `cache remove`: inspect or prune the cache

use anyhow::{bail, Context as _, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use factorlab_core::data::{cache_key, DownloadProgress, SilentProgress, StderrProgress};
use factorlab_core::sources::{find_composite, STANDARD_COMPOSITES};
use factorlab_core::{
    CacheStore, CompositeBuilder, Dataset, DateRange, FactorLabConfig, Frequency, HttpClient,
    NormalizedTable, SourceRegistry,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "factorlab",
    about = "FactorLab CLI: cached academic factor datasets"
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory. Overrides the configuration.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Log more (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one model, or several merged on date, and print a preview.
    Fetch(FetchArgs),
    /// List registered models.
    Models,
    /// List the regions a model is available for.
    Regions {
        /// Model key or alias (e.g., ff3, carhart).
        model: String,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Args)]
struct FetchArgs {
    /// Model keys or aliases (e.g., ff3 q). Several are merged on date.
    #[arg(required = true)]
    models: Vec<String>,

    /// Frequency: d, w, m, q, y. Defaults to the configured frequency.
    #[arg(short, long)]
    frequency: Option<String>,

    /// First date to show (YYYY, YYYY-MM or YYYY-MM-DD).
    #[arg(long)]
    start: Option<String>,

    /// Last date to show (YYYY, YYYY-MM or YYYY-MM-DD).
    #[arg(long)]
    end: Option<String>,

    /// Region for region-aware models (e.g., us, europe, japan).
    #[arg(long)]
    region: Option<String>,

    /// Show only these factors, comma separated.
    #[arg(long, value_delimiter = ',')]
    extract: Vec<String>,

    /// Hide these factors, comma separated.
    #[arg(long, value_delimiter = ',')]
    drop: Vec<String>,

    /// Keep rows with missing values after merging several models.
    #[arg(long, default_value_t = false)]
    keep_nulls: bool,

    /// Decimal places for factor columns.
    #[arg(long)]
    precision: Option<u32>,

    /// Rows shown at each end of the preview.
    #[arg(long, default_value_t = factorlab_core::data::table::PREVIEW_ROWS)]
    rows: usize,

    /// Cache time-to-live in seconds.
    #[arg(long)]
    ttl: Option<u64>,

    /// Download progress display.
    #[arg(long, value_enum, default_value_t = ProgressMode::Bar)]
    progress: ProgressMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ProgressMode {
    /// Interactive progress bar.
    Bar,
    /// Single redrawn line, suitable for logs.
    Plain,
    None,
}

impl ProgressMode {
    fn sink(self) -> Arc<dyn DownloadProgress> {
        match self {
            ProgressMode::Bar => Arc::new(BarProgress::default()),
            ProgressMode::Plain => Arc::new(StderrProgress::new()),
            ProgressMode::None => Arc::new(SilentProgress),
        }
    }
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached downloads with size and expiry.
    Status,
    /// Remove every cached download.
    Clear,
    /// Remove the cached download of one URL.
    Remove {
        url: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => FactorLabConfig::from_file(path)?,
        None => FactorLabConfig::default(),
    };
    if let Some(dir) = cli.cache_dir {
        config.cache.dir = Some(dir);
    }
    debug!(cache_dir = %config.cache_dir().display(), "configuration loaded");

    match cli.command {
        Commands::Fetch(args) => run_fetch(&config, args),
        Commands::Models => run_models(),
        Commands::Regions { model } => run_regions(&model),
        Commands::Cache { action } => {
            let cache = CacheStore::new(config.cache_dir());
            match action {
                CacheAction::Status => run_cache_status(&cache),
                CacheAction::Clear => run_cache_clear(&cache),
                CacheAction::Remove { url } => run_cache_remove(&cache, &url),
            }
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "factorlab_core=info,factorlab=info",
        _ => "factorlab_core=debug,factorlab=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_fetch(config: &FactorLabConfig, args: FetchArgs) -> Result<()> {
    let registry = SourceRegistry::standard();
    let frequency = match &args.frequency {
        Some(f) => f.parse::<Frequency>()?,
        None => config.dataset.frequency,
    };
    let today = chrono::Local::now().date_naive();
    let range = DateRange::parse(args.start.as_deref(), args.end.as_deref(), today)?;
    let ttl = args
        .ttl
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.default_ttl());

    let mut http = HttpClient::new(
        config.http_config(),
        CacheStore::new(config.cache_dir()),
    )
    .with_progress(args.progress.sink());

    if let [model] = args.models.as_slice() {
        if let Some(entry) = find_composite(model) {
            if args.region.is_some() {
                bail!("{} is not published per region", entry.name);
            }
            let builder = entry.builder_with(&registry, frequency, |dataset| {
                let dataset = dataset.with_cache_ttl(ttl);
                Ok(match args.precision {
                    Some(precision) => dataset.with_precision(precision),
                    None => dataset,
                })
            })?;
            let table = build_composite(builder, &args, config, range, &mut http)?;
            print_table(&table, args.rows);
            return Ok(());
        }
    }

    let mut datasets = Vec::with_capacity(args.models.len());
    for model in &args.models {
        let mut dataset = Dataset::new(registry.create(model)?, frequency)?.with_cache_ttl(ttl);
        if let Some(region) = &args.region {
            if dataset.source().regions().is_some() {
                dataset = dataset.with_region(region)?;
            } else if args.models.len() == 1 {
                bail!("{model} is not published per region");
            } else {
                warn!(model = %model, "ignoring --region for a model without regions");
            }
        }
        if let Some(precision) = args.precision {
            dataset = dataset.with_precision(precision);
        }
        datasets.push(dataset);
    }

    let table = if datasets.len() == 1 {
        let mut dataset = datasets.remove(0).with_range(range);
        if !args.extract.is_empty() {
            dataset.extract(&args.extract)?;
        }
        if !args.drop.is_empty() {
            dataset.drop(&args.drop)?;
        }
        dataset.data(&mut http)?
    } else {
        let name = args.models.join("+");
        let builder = CompositeBuilder::collection(name, datasets, frequency)?;
        build_composite(builder, &args, config, range, &mut http)?
    };

    print_table(&table, args.rows);
    Ok(())
}

/// Apply the shared fetch options to a composite, build it and take its view.
fn build_composite(
    builder: CompositeBuilder,
    args: &FetchArgs,
    config: &FactorLabConfig,
    range: DateRange,
    http: &mut HttpClient,
) -> Result<NormalizedTable> {
    let keep_nulls = args.keep_nulls || !config.dataset.drop_nulls;
    let mut builder = builder.keep_nulls(keep_nulls).range(range);
    if let Some(precision) = args.precision {
        builder = builder.precision(precision);
    }
    let mut composite = builder.build(http)?;
    if !args.extract.is_empty() {
        composite.extract(&args.extract)?;
    }
    if !args.drop.is_empty() {
        composite.drop(&args.drop)?;
    }
    Ok(composite.data()?)
}

fn print_table(table: &NormalizedTable, rows: usize) {
    if table.is_empty() {
        println!("{table}");
        return;
    }
    println!("{}", table.preview(rows));
    if let Ok(Some((first, last))) = table.span() {
        println!("Period: {first} to {last}");
    }
}

fn run_models() -> Result<()> {
    let registry = SourceRegistry::standard();
    println!("{:<6} {:<36} Aliases", "Key", "Name");
    println!("{}", "-".repeat(70));
    for entry in registry.entries() {
        println!(
            "{:<6} {:<36} {}",
            entry.key,
            entry.name,
            entry.aliases.join(", ")
        );
    }
    println!();
    println!("Composites");
    for entry in STANDARD_COMPOSITES {
        let frequencies: Vec<&str> = entry.frequencies.iter().map(|f| f.code()).collect();
        println!(
            "{:<6} {:<36} {} [{}]",
            entry.key,
            entry.name,
            entry.aliases.join(", "),
            frequencies.join("/")
        );
    }
    Ok(())
}

fn run_regions(model: &str) -> Result<()> {
    let registry = SourceRegistry::standard();
    let entry = registry.resolve(model)?;
    let source = entry.create();
    let Some(regions) = source.regions() else {
        bail!("{} is not published per region", entry.name);
    };
    let default = regions.default_region();
    for region in regions.list_regions() {
        if region == default {
            println!("{region} (default)");
        } else {
            println!("{region}");
        }
    }
    Ok(())
}

fn run_cache_status(cache: &CacheStore) -> Result<()> {
    let entries = cache.entries();
    let total: u64 = entries.iter().map(|(_, meta)| meta.size).sum();
    let now = chrono::Utc::now().timestamp();

    println!("Cache: {}", cache.root().display());
    println!("Entries: {}", entries.len());
    println!("Total size: {}", format_size(total));
    if entries.is_empty() {
        return Ok(());
    }
    println!();
    println!("{:<10} {:>10} {:<20} URL", "State", "Size", "Expires");
    println!("{}", "-".repeat(78));
    for (key, meta) in &entries {
        let state = if meta.is_fresh(now) { "fresh" } else { "stale" };
        let expires = chrono::DateTime::from_timestamp(meta.expires_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        let label = meta.url.clone().unwrap_or_else(|| key.clone());
        println!(
            "{:<10} {:>10} {:<20} {}",
            state,
            format_size(meta.size),
            expires,
            label
        );
    }
    Ok(())
}

fn run_cache_clear(cache: &CacheStore) -> Result<()> {
    let removed = cache
        .clear()
        .with_context(|| format!("clearing {}", cache.root().display()))?;
    println!("Removed {removed} cached download(s).");
    Ok(())
}

fn run_cache_remove(cache: &CacheStore, url: &str) -> Result<()> {
    if cache.remove(&cache_key(url)) {
        println!("Removed: {url}");
    } else {
        println!("Not cached: {url}");
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

const BAR_TEMPLATE: &str =
    "{prefix:>24.cyan.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec})";

/// indicatif bars, one per in-flight download.
#[derive(Default)]
struct BarProgress {
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl BarProgress {
    fn short_label(label: &str) -> String {
        label.rsplit('/').next().unwrap_or(label).to_string()
    }
}

impl DownloadProgress for BarProgress {
    fn on_start(&self, label: &str, total: Option<u64>) {
        let bar = match total {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::new_spinner(),
        };
        let bar = match ProgressStyle::with_template(BAR_TEMPLATE) {
            Ok(style) => bar.with_style(style.progress_chars("█▓░")),
            Err(_) => bar,
        };
        bar.set_prefix(Self::short_label(label));
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(label.to_string(), bar);
        }
    }

    fn on_bytes(&self, label: &str, downloaded: u64, _total: Option<u64>) {
        if let Some(bar) = self.bars.lock().ok().and_then(|b| b.get(label).cloned()) {
            bar.set_position(downloaded);
        }
    }

    fn on_finish(&self, label: &str, _downloaded: u64) {
        if let Some(bar) = self.bars.lock().ok().and_then(|mut b| b.remove(label)) {
            bar.finish_and_clear();
        }
    }
}
