use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use synthsync::config::AppConfig;
use synthsync::gateway::{Gateway, HttpGateway};
use synthsync::models::{AgentClass, TestStatus};
use synthsync::reconcile::{
    self, Reconciler, ResourceCache, RunMode, RunParams, RunStatus, StatusParams,
};
use synthsync::spec::{self, ExportOptions};
use synthsync::version::VERSION;

const EXIT_FATAL: u8 = 1;
const EXIT_PARTIAL_FAILURE: u8 = 2;

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile the remote service against a specification file
    Apply {
        /// Specification CSV file
        file: PathBuf,
        /// incremental, delete-matching or redeploy
        #[arg(short, long, default_value = "incremental")]
        mode: RunMode,
        /// Management tag, overriding the configured one
        #[arg(short, long)]
        tag: Option<String>,
        /// Agent capability class: private, global or any
        #[arg(long)]
        agent_class: Option<AgentClass>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write remote tests out as a specification file
    Export {
        /// Output CSV file
        #[arg(short, long, default_value = "exported_tests.csv")]
        output: PathBuf,
        #[arg(short, long)]
        tag: Option<String>,
        /// Export every test, not only those carrying the management tag
        #[arg(long)]
        all: bool,
        #[arg(long)]
        include_paused: bool,
    },
    /// Pause or resume managed tests
    Status {
        /// active or paused
        #[arg(short, long)]
        state: TestStatus,
        #[arg(short, long)]
        tag: Option<String>,
        /// Limit the change to these tests; may be repeated
        #[arg(short, long = "name")]
        names: Vec<String>,
    },
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "synthsync.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

fn remote(config: &AppConfig) -> Result<Arc<dyn Gateway>, Box<dyn Error + Send + Sync>> {
    let gateway = HttpGateway::new(config.gateway_config()?)?;
    Ok(Arc::new(gateway))
}

async fn run(
    command: Command,
    config: AppConfig,
) -> Result<ExitCode, Box<dyn Error + Send + Sync>> {
    match command {
        Command::Apply {
            file,
            mode,
            tag,
            agent_class,
            json,
        } => {
            // A malformed file aborts before any remote call.
            let rows = spec::read_path(&file)?;
            let params = RunParams {
                management_tag: tag.unwrap_or(config.management_tag.clone()),
                mode,
                agent_class: agent_class.unwrap_or(config.agent_class),
            };
            let reconciler = Reconciler::new(remote(&config)?, params);
            let report = reconciler.run(&rows).await?;

            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report);
            }
            Ok(match report.status() {
                RunStatus::Success => ExitCode::SUCCESS,
                RunStatus::PartialFailure => ExitCode::from(EXIT_PARTIAL_FAILURE),
            })
        }
        Command::Export {
            output,
            tag,
            all,
            include_paused,
        } => {
            let gateway = remote(&config)?;
            let cache = ResourceCache::load(gateway.as_ref(), config.agent_class).await?;
            let options = ExportOptions {
                management_tag: tag.unwrap_or(config.management_tag.clone()),
                only_managed: !all,
                include_paused,
            };
            let records = spec::export_records(&cache, &options);
            spec::write_path(&output, &records)?;
            println!("Exported {} tests to {}", records.len(), output.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { state, tag, names } => {
            let gateway = remote(&config)?;
            let cache = ResourceCache::load(gateway.as_ref(), config.agent_class).await?;
            let params = StatusParams {
                management_tag: tag.unwrap_or(config.management_tag.clone()),
                status: state,
                names: if names.is_empty() {
                    None
                } else {
                    Some(names.into_iter().collect::<BTreeSet<_>>())
                },
            };
            let report = reconcile::set_status(gateway.as_ref(), &cache, &params).await?;
            print!("{}", report);
            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_PARTIAL_FAILURE)
            })
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    init_logging(&config.log_dir);
    info!("Starting synthsync, version: {}", VERSION);

    match run(args.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Run aborted.");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
