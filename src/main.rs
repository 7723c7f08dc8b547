use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::{Map, Value};

use svcgraph::workflow::{FileWorkflowSource, ModuleRegistry, RunRequest, WorkflowEngine, WorkflowSource};
use svcgraph::workflow::GraphModel;
use svcgraph::EngineConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a workflow and print the run report as JSON
    Run {
        /// Path to the workflow file (YAML or JSON)
        #[arg(short, long)]
        file: String,

        /// First service of the range to run
        #[arg(long)]
        from: Option<String>,

        /// Last service of the range to run
        #[arg(long)]
        to: Option<String>,

        /// Request parameter as key=value; the value is parsed as JSON when possible
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Engine config file (YAML)
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Print the graphs derived from a workflow file
    Graph {
        /// Path to the workflow file (YAML or JSON)
        #[arg(short, long)]
        file: String,
    },
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Run {
            file,
            from,
            to,
            params,
            config,
        } => {
            let config = match config {
                Some(path) => EngineConfig::from_yaml_file(&path)
                    .with_context(|| format!("loading engine config {}", path))?,
                None => EngineConfig::default(),
            }
            .apply_env()?;

            let source = FileWorkflowSource::new(&file);
            let engine = WorkflowEngine::from_source(&source, ModuleRegistry::new(), config)
                .with_context(|| format!("loading workflow {}", file))?;

            let mut request = RunRequest::new(params.into_iter().collect::<Map<String, Value>>());
            request.from = from;
            request.to = to;

            let report = engine.run(request).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Graph { file } => {
            let def = FileWorkflowSource::new(&file)
                .load()
                .with_context(|| format!("loading workflow {}", file))?;
            let graph = GraphModel::build(&def)?;
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
    }

    Ok(())
}
