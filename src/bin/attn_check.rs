//! attn-check - flash-attention equivalence harness
//!
//! ```text
//! attn-check                 fused graph on the primary backend, dump the result
//! attn-check comp            fused graph, accel vs CPU node by node
//! attn-check comp naive      unfused graph, accel vs CPU node by node
//! ```
//!
//! Exit status: 0 on success, 1 on a setup or runtime error, 2 when the
//! backend comparison fails.

use attncheck::backend::{BackendKind, CpuBackend, init_backend};
use attncheck::config::{GraphMode, HarnessConfig};
use attncheck::error::Result;
use attncheck::harness::report::{VERDICT_HEADER, format_dump, verdict};
use attncheck::harness::{
    AttentionModel, Outcome, compute_allocator, compute_graph, measure_compute_buffer,
};
use attncheck::runtime::tensor_to_float;
use clap::{Parser, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Check a fused attention kernel against the unfused graph and the CPU reference
#[derive(Parser)]
#[command(name = "attn-check")]
#[command(version, about, long_about = None)]
struct Cli {
    /// `comp` compares backends, `naive` builds the unfused graph
    #[arg(value_enum, value_name = "MODE")]
    modes: Vec<Mode>,

    /// JSON harness configuration; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Elements per head (d)
    #[arg(long)]
    head_dim: Option<usize>,

    /// Query length (B)
    #[arg(long)]
    n_queries: Option<usize>,

    /// Key/value length (S)
    #[arg(long)]
    n_kv: Option<usize>,

    /// Attention heads (H)
    #[arg(long)]
    n_heads: Option<usize>,

    /// Primary backend
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Worker threads for CPU backends
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Comp,
    Naive,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Accel,
    Cpu,
}

impl From<BackendArg> for BackendKind {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Accel => BackendKind::Accel,
            BackendArg::Cpu => BackendKind::Cpu,
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load_json(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(v) = cli.head_dim {
        config.shape.head_dim = v;
    }
    if let Some(v) = cli.n_queries {
        config.shape.n_queries = v;
    }
    if let Some(v) = cli.n_kv {
        config.shape.n_kv = v;
    }
    if let Some(v) = cli.n_heads {
        config.shape.n_heads = v;
    }
    if let Some(b) = cli.backend {
        config.backend = b.into();
    }
    if let Some(n) = cli.threads {
        config.n_threads = n;
    }
    if cli.modes.contains(&Mode::Comp) {
        config.compare = true;
    }
    if cli.modes.contains(&Mode::Naive) {
        config.graph = GraphMode::Naive;
    }
    config.validate()?;
    Ok(config)
}

/// `Ok(false)` means the comparison ran and failed
fn run(cli: &Cli) -> Result<bool> {
    let config = build_config(cli)?;
    tracing::info!(
        d = config.shape.head_dim,
        b = config.shape.n_queries,
        s = config.shape.n_kv,
        h = config.shape.n_heads,
        graph = ?config.graph,
        compare = config.compare,
        "attention fixture"
    );

    let backend = init_backend(config.backend)?;
    let mut model = AttentionModel::load(config.shape, backend)?;

    let size = measure_compute_buffer(&model, config.graph)?;
    println!(
        "compute buffer size: {:.2} MB",
        size as f64 / (1024.0 * 1024.0)
    );
    let mut allocator = compute_allocator(&model, size)?;
    let mut cpu = CpuBackend::with_threads(config.n_threads)?;

    if config.compare {
        print!("\n{VERDICT_HEADER}");
        // the header is visible while the comparison runs
        let _ = std::io::stdout().flush();
    }

    let start = Instant::now();
    match compute_graph(&mut model, &mut cpu, &mut allocator, &config)? {
        Outcome::Computed { ctx, result } => {
            println!(
                "computing time: {:.4} ms",
                start.elapsed().as_secs_f64() * 1000.0
            );
            let values = tensor_to_float(&ctx, result)?;
            println!("\nPerforming test ({}):", values.len());
            println!("{}", format_dump(&values, config.dump_limit));
            Ok(true)
        }
        Outcome::Compared { ok, failures } => {
            for f in &failures {
                print!("{f} ");
            }
            println!("{}", verdict(ok));
            Ok(ok)
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_logging();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(1)
        }
    }
}
