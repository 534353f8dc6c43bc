use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pyramid_cache::{
    CacheArrayLoader, CacheConfig, CacheHints, CacheStats, CellCache, CellGrid, CellLayout,
    LoadError, LoadingStrategy, ThreadGroup, VolatileCells,
};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pyramid-cli")]
#[command(about = "Pyramid cell cache CLI")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a synthetic render loop and print a JSON report.
    Simulate(SimulateArgs),
    /// Print the effective cache configuration as TOML.
    Config {
        /// Read the configuration from this file instead of the environment.
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
struct SimulateArgs {
    /// Number of frames to render.
    #[arg(long, default_value_t = 10)]
    frames: u64,

    /// Image size in voxels, as X,Y,Z.
    #[arg(long, value_delimiter = ',', default_values_t = [256u64, 256, 64])]
    image: Vec<u64>,

    /// Cell size in voxels, as X,Y,Z.
    #[arg(long, value_delimiter = ',', default_values_t = [32u32, 32, 32])]
    cell: Vec<u32>,

    /// Per-frame blocking I/O budget in milliseconds, one value per priority.
    #[arg(long = "budget-ms", value_delimiter = ',', default_values_t = [5u64])]
    budget_ms: Vec<u64>,

    /// Loading strategy: blocking, volatile, budgeted or dontload.
    #[arg(long, default_value_t = LoadingStrategy::Budgeted)]
    strategy: LoadingStrategy,

    /// Priority of every request, 0 is most urgent.
    #[arg(long, default_value_t = 0)]
    priority: usize,

    /// Enqueue each missing cell at most once per frame.
    #[arg(long)]
    update_once: bool,

    /// Simulated storage latency per cell read, in milliseconds.
    #[arg(long = "latency-ms", default_value_t = 2)]
    latency_ms: u64,

    /// Pause between frames, in milliseconds.
    #[arg(long = "frame-interval-ms", default_value_t = 16)]
    frame_interval_ms: u64,

    /// Number of fetcher threads; overrides the configuration.
    #[arg(long)]
    fetchers: Option<usize>,

    /// Cache configuration file; the environment is used otherwise.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// In-memory storage with a fixed read latency
#[derive(Debug)]
struct SyntheticLoader {
    latency: Duration,
}

impl CacheArrayLoader for SyntheticLoader {
    type Array = Vec<u16>;

    fn load_array(
        &self,
        timepoint: u32,
        setup: u32,
        level: u8,
        layout: &CellLayout,
    ) -> Result<Vec<u16>, LoadError> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        let [x, y, z] = layout.origin;
        let value = (x + y + z) as u16 ^ (timepoint as u16) ^ (setup as u16) ^ u16::from(level);
        Ok(vec![value; layout.num_elements() as usize])
    }

    fn empty_array(&self, layout: &CellLayout) -> Vec<u16> {
        vec![0; layout.num_elements() as usize]
    }

    fn bytes_per_element(&self) -> usize {
        2
    }
}

#[derive(Debug, Serialize)]
struct FrameReport {
    frame: u64,
    valid_cells: u64,
    render_ms: f64,
}

#[derive(Debug, Serialize)]
struct QueueReport {
    pending: usize,
    enqueued: u64,
    dequeued: u64,
}

#[derive(Debug, Serialize)]
struct GroupIoReport {
    group: String,
    io_bytes: u64,
    io_time_ms: f64,
    cumulative_io_time_ms: f64,
}

impl GroupIoReport {
    fn from_group(group: &ThreadGroup) -> Self {
        let stats = group.statistics();
        Self {
            group: group.name().to_owned(),
            io_bytes: stats.io_bytes(),
            io_time_ms: nanos_to_ms(stats.io_nano_time()),
            cumulative_io_time_ms: nanos_to_ms(stats.cumulative_io_nano_time()),
        }
    }
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    strategy: LoadingStrategy,
    priority: usize,
    cells_per_frame: u64,
    fetcher_threads: usize,
    frames: Vec<FrameReport>,
    hit_rate: f64,
    cache: CacheStats,
    queues: QueueReport,
    io: Vec<GroupIoReport>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    match cli.command {
        Commands::Simulate(args) => run_simulate(&args),
        Commands::Config { file } => run_config(file.as_deref()),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second `run` in the same process keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_config(file: Option<&Path>) -> Result<CacheConfig> {
    match file {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => CacheConfig::from_env().context("invalid cache configuration in environment"),
    }
}

fn run_config(file: Option<&Path>) -> Result<()> {
    let config = load_config(file)?;
    let toml = config.to_toml()?;
    print!("{toml}");
    Ok(())
}

fn run_simulate(args: &SimulateArgs) -> Result<()> {
    let image = dims::<u64, 3>("--image", &args.image)?;
    let cell = dims::<u32, 3>("--cell", &args.cell)?;
    if args.frames == 0 {
        anyhow::bail!("--frames must be >= 1");
    }

    let mut config = load_config(args.config.as_deref())?;
    if let Some(fetchers) = args.fetchers {
        config = config.with_fetcher_threads(fetchers);
    }
    if args.priority >= config.num_priorities {
        anyhow::bail!(
            "--priority {} is out of range, the cache has {} priorities",
            args.priority,
            config.num_priorities
        );
    }

    let loader = SyntheticLoader {
        latency: Duration::from_millis(args.latency_ms),
    };
    let cache = Arc::new(CellCache::new(loader, &config).context("failed to start the cache")?);
    let grid = CellGrid::new(image, cell);

    let mut view = VolatileCells::new(cache.clone(), 0, 0, 0, grid);
    view.set_hints(CacheHints::new(args.strategy, args.priority, args.update_once));

    let budget: Vec<Duration> = args.budget_ms.iter().copied().map(Duration::from_millis).collect();
    let interval = Duration::from_millis(args.frame_interval_ms);

    tracing::info!(
        cells = grid.num_cells(),
        strategy = %args.strategy,
        frames = args.frames,
        "starting simulation"
    );

    let mut frames = Vec::new();
    for _ in 0..args.frames {
        cache.prepare_next_frame();
        cache.reset_io_time_budget(&budget);

        let start = Instant::now();
        let mut valid_cells = 0;
        for index in 0..grid.num_cells() {
            let cell = view
                .get(index)
                .with_context(|| format!("failed to load cell {index}"))?;
            if cell.is_some_and(|cell| cell.is_valid()) {
                valid_cells += 1;
            }
        }
        frames.push(FrameReport {
            frame: cache.frame(),
            valid_cells,
            render_ms: start.elapsed().as_secs_f64() * 1e3,
        });

        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }

    let stats = cache.stats();
    let queues = cache.queue_stats();
    let report = SimulationReport {
        strategy: args.strategy,
        priority: args.priority,
        cells_per_frame: grid.num_cells(),
        fetcher_threads: cache.num_fetcher_threads(),
        frames,
        hit_rate: stats.hit_rate(),
        cache: stats,
        queues: QueueReport {
            pending: queues.pending(),
            enqueued: queues.enqueued,
            dequeued: queues.dequeued,
        },
        io: vec![
            GroupIoReport::from_group(cache.default_group()),
            GroupIoReport::from_group(cache.fetcher_group()),
        ],
    };

    let json = serde_json::to_string_pretty(&report)?;
    println!("{json}");

    drop(view);
    if let Ok(cache) = Arc::try_unwrap(cache) {
        cache.shutdown();
    }

    Ok(())
}

fn dims<T: Copy, const N: usize>(flag: &str, values: &[T]) -> Result<[T; N]> {
    values
        .try_into()
        .map_err(|_| anyhow::anyhow!("{flag} takes {N} comma-separated values, got {}", values.len()))
}

fn nanos_to_ms(nanos: u64) -> f64 {
    nanos as f64 / 1e6
}
