use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stagewire::config::EngineConfig;
use stagewire::events::LoggingEventSink;
use stagewire::executor::Executor;
use stagewire::observability::{init_tracing, LogFormat};
use stagewire::pipeline::PipelineDefinition;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "stagewire")]
#[command(version, about = "Run stream-wired external-command pipelines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log one JSON object per line
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline definition
    ///
    /// Pipeline options follow `--`, e.g.
    ///     stagewire run chipseq.json --max-workers 8 -- --reads data/ --call_peaks=false
    #[command(verbatim_doc_comment)]
    Run {
        /// Pipeline definition (JSON)
        definition: PathBuf,

        /// Engine configuration file (JSON); flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Root for per-instance scratch directories
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Root for published outputs
        #[arg(long)]
        publish_dir: Option<PathBuf>,

        /// Maximum concurrently running instances
        #[arg(long)]
        max_workers: Option<usize>,

        /// Shell used to run stage commands
        #[arg(long)]
        shell: Option<String>,

        /// Remove the run's scratch directory after a successful run
        #[arg(long)]
        clean: bool,

        /// Pipeline options
        #[arg(last = true, value_name = "PARAMS")]
        params: Vec<String>,
    },
    /// Print the pruned graph in topological order
    Graph {
        /// Pipeline definition (JSON)
        definition: PathBuf,

        /// Pipeline options
        #[arg(last = true, value_name = "PARAMS")]
        params: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing(format).context("Failed to initialise logging")?;

    match cli.command {
        Commands::Run {
            definition,
            config,
            work_dir,
            publish_dir,
            max_workers,
            shell,
            clean,
            params,
        } => {
            let mut engine = match config {
                Some(path) => load_config(&path)?,
                None => EngineConfig::new(),
            };
            if let Some(dir) = work_dir {
                engine = engine.with_work_dir(dir);
            }
            if let Some(dir) = publish_dir {
                engine = engine.with_publish_dir(dir);
            }
            if let Some(n) = max_workers {
                engine = engine.with_max_workers(n);
            }
            if let Some(shell) = shell {
                engine = engine.with_shell(shell);
            }
            if clean {
                engine = engine.with_retain_work(false);
            }
            run(&definition, engine, &params).await
        }
        Commands::Graph { definition, params } => {
            let (pipeline, store) = load_definition(&definition, &params)?;
            let graph = pipeline
                .build(store)
                .with_context(|| format!("Invalid pipeline '{}'", pipeline.name))?;
            println!("{}", graph.describe());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(definition: &Path, config: EngineConfig, params: &[String]) -> Result<ExitCode> {
    let (pipeline, store) = load_definition(definition, params)?;
    let graph = pipeline
        .build(store)
        .with_context(|| format!("Invalid pipeline '{}'", pipeline.name))?;

    let executor =
        Executor::new(graph, config).with_event_sink(Arc::new(LoggingEventSink::debug()));
    let token = executor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel("interrupted");
        }
    });

    let summary = executor.run().await.context("Run failed to start")?;
    println!("{}", summary.to_json()?);

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn load_definition(
    path: &Path,
    params: &[String],
) -> Result<(PipelineDefinition, stagewire::params::ParameterStore)> {
    let pipeline = PipelineDefinition::load(path)
        .with_context(|| format!("Failed to load pipeline definition {}", path.display()))?;
    let store = pipeline
        .resolve_args(params)
        .with_context(|| format!("Invalid options for pipeline '{}'", pipeline.name))?;
    Ok((pipeline, store))
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read engine config {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse engine config {}", path.display()))
}
