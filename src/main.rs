//! BLeak CLI: three subcommands mirroring the three controllers.

use std::io::Read as _;
use std::path::PathBuf;

use bleak::config::{self, ConfigurationFile};
use bleak::detect::{DiagnoseLeaksController, FindLeaksController};
use bleak::driver::NoopResolver;
use bleak::evaluate::EvaluateFixesController;
use bleak::mock::MockDriver;
use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read config from {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Detect(#[from] bleak::detect::DetectError),

    #[error(transparent)]
    Evaluate(#[from] bleak::evaluate::EvaluateError),

    #[error("failed to open output file {path}: {source}")]
    OutputIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Parser, Debug)]
#[command(name = "bleak")]
#[command(about = "Client-side memory-leak detection and diagnosis")]
struct Cli {
    /// JS config source file, or "-" to read from stdin.
    #[arg(long, value_name = "PATH")]
    config: String,

    /// Per-step wait cap, milliseconds. Overrides the config's own value when set.
    #[arg(long)]
    timeout: Option<u64>,

    /// Run the (mock) driver headless. No-op against the in-process mock driver;
    /// threaded through for parity with a real browser-backed driver.
    #[arg(long)]
    headless: bool,

    /// Directory for leaks.json / paths.json / CSV output.
    #[arg(long, value_name = "DIR", default_value = ".")]
    out: PathBuf,

    /// Emit JSON-formatted log lines instead of the default human-readable format.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the loop workload and report monotonically-growing heap-graph paths.
    FindLeaks,

    /// Find leaks, then attribute each one to a page-side stack trace.
    Diagnose,

    /// Sweep every `(metric, leaksFixed)` pair and report heap-size metrics as CSV.
    EvaluateFixes {
        /// Snapshot frequency: take a heap snapshot every N loop iterations.
        #[arg(long, default_value_t = 1)]
        iterations_per_snapshot: u32,

        /// Resume an interrupted sweep: "<metric>:<leaksFixed>".
        #[arg(long, value_name = "METRIC:N")]
        resume_at: Option<String>,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config_source(path: &str) -> Result<String, CliError> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|source| CliError::ConfigIo {
                path: "<stdin>".to_string(),
                source,
            })?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).map_err(|source| CliError::ConfigIo {
            path: path.to_string(),
            source,
        })
    }
}

fn load_config(cli: &Cli) -> Result<(ConfigurationFile, String), CliError> {
    let source = load_config_source(&cli.config)?;
    let mut parsed = bleak::config_eval::evaluate_config(&source)?;
    if let Some(timeout) = cli.timeout {
        parsed.timeout_ms = timeout;
    }
    Ok((parsed, source))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    if let Err(e) = run(cli).await {
        let mut chain: Vec<String> = vec![e.to_string()];
        let mut source = std::error::Error::source(&e);
        while let Some(s) = source {
            chain.push(s.to_string());
            source = s.source();
        }
        eprintln!("error: {}", chain.join("\ncaused by: "));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    std::fs::create_dir_all(&cli.out).ok();
    let (config, source) = load_config(&cli)?;

    match &cli.command {
        Command::FindLeaks => {
            let mut driver = MockDriver::new();
            let mut controller = FindLeaksController::new();
            let roots = controller
                .find_leak_paths(&mut driver, &config, &source)
                .await?;
            tracing::info!(count = roots.len(), "find-leaks complete");
            for root in &roots {
                println!("leak root {}: {:?}", root.id, root.paths);
            }
        }
        Command::Diagnose => {
            let mut driver = MockDriver::new();
            let mut find_controller = FindLeaksController::new();
            let roots = find_controller
                .find_leak_paths(&mut driver, &config, &source)
                .await?;

            let resolver = NoopResolver;
            let diagnose_controller = DiagnoseLeaksController::new(&resolver);
            let results = diagnose_controller
                .diagnose_leaks(&mut driver, &config, &source, roots, &cli.out)
                .await?;
            tracing::info!(count = results.leak_roots.len(), "diagnosis complete");
        }
        Command::EvaluateFixes {
            iterations_per_snapshot,
            resume_at,
        } => {
            let mut driver = MockDriver::new();
            let resume_point = resume_at
                .as_ref()
                .and_then(|s| s.split_once(':'))
                .map(|(metric, n)| bleak::evaluate::ResumePoint {
                    metric: metric.to_string(),
                    leaks_fixed: n.parse().unwrap_or(0),
                });

            let mut controller = if resume_point.is_some() {
                EvaluateFixesController::resuming()
            } else {
                EvaluateFixesController::new()
            };

            let csv_path = cli.out.join("fix-evaluation.csv");
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(resume_point.is_some())
                .write(true)
                .open(&csv_path)
                .map_err(|source| CliError::OutputIo {
                    path: csv_path.display().to_string(),
                    source,
                })?;
            let mut writer = csv::Writer::from_writer(file);

            controller
                .evaluate_leak_fixes(
                    &mut driver,
                    &config,
                    &source,
                    &mut writer,
                    config.iterations,
                    *iterations_per_snapshot,
                    resume_point,
                    None,
                )
                .await?;
            tracing::info!(path = %csv_path.display(), "fix evaluation complete");
        }
    }

    Ok(())
}
