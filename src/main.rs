use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use console::style;
use socachesim::{config, trace::Trace, Error, Platform};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "cycle accurate simulation of a directory based coherent multiprocessor",
    long_about = None
)]
struct Options {
    /// Platform configuration (YAML or JSON)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,
    /// Per-processor programs (YAML or JSON)
    #[arg(short, long, value_name = "TRACE")]
    trace: PathBuf,
    #[arg(long = "max-cycles", default_value_t = 1_000_000)]
    max_cycles: u64,
    /// Seed of the forced store conditional failures
    #[arg(long, default_value_t = 1)]
    seed: u32,
    /// Write statistics as JSON
    #[arg(long, value_name = "PATH")]
    stats: Option<PathBuf>,
    /// Write statistics as CSV
    #[arg(long, value_name = "PATH")]
    csv: Option<PathBuf>,
    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,
    /// Only start logging after this cycle
    #[arg(long = "log-after-cycle", value_name = "CYCLE")]
    log_after_cycle: Option<u64>,
    /// Log spans of the cycle functions
    #[arg(long)]
    tracing: bool,
}

fn init_logging(options: &Options) {
    if options.tracing {
        use tracing_subscriber::fmt::format::FmtSpan;
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .try_init()
            .ok();
        return;
    }
    if options.log_after_cycle.is_some() {
        return;
    }
    let mut log_builder = env_logger::Builder::new();
    match options.debug {
        0 => log_builder.parse_default_env(),
        1 => log_builder.filter_level(log::LevelFilter::Info),
        2 => log_builder.filter_level(log::LevelFilter::Debug),
        _ => log_builder.filter_level(log::LevelFilter::Trace),
    };
    log_builder.init();
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let options = Options::parse();
    init_logging(&options);

    let start = std::time::Instant::now();
    let mut config = match options.config {
        Some(ref path) => config::Config::from_path(path)
            .wrap_err_with(|| format!("failed to load config {}", path.display()))?,
        None => config::Config::default(),
    };
    if options.log_after_cycle.is_some() {
        config.log_after_cycle = options.log_after_cycle;
    }
    let trace = Trace::from_path(&options.trace)
        .wrap_err_with(|| format!("failed to load trace {}", options.trace.display()))?;

    let mut platform = Platform::new(config, trace.programs, options.seed)?;
    let cycles = match platform.run(options.max_cycles) {
        Ok(cycles) => cycles,
        Err(Error::Deadlock {
            cycle,
            last_progress,
            state,
        }) => {
            eprintln!("{}", style("DEADLOCK").red().bold());
            eprintln!("{state}");
            eyre::bail!("no progress since cycle {last_progress} (now at cycle {cycle})");
        }
        Err(err) => return Err(err.into()),
    };

    let stats = platform.stats();
    let l1 = stats.l1.reduce();
    println!(
        "{} {cycles} cycles, {} retired in {:?}",
        style("done:").green().bold(),
        stats.sim.retired,
        start.elapsed()
    );
    if let Some(mean) = l1.mean_write_length() {
        println!("mean write burst: {mean:.2} words");
    }
    if let Some(rate) = stats.mem_cache.read_miss_rate() {
        println!("mem_cache read miss rate: {:.2}%", rate * 100.0);
    }

    if let Some(ref path) = options.stats {
        socachesim::save_stats_to_file(&stats, path)?;
    }
    if let Some(ref path) = options.csv {
        socachesim::save_stats_to_csv(&stats, path)?;
    }
    Ok(())
}
