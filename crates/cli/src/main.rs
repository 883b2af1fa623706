use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use plinth_backend::MockBackend;
use plinth_engine::{Engine, EngineOptions, RunOutcome, StackBuilder};
use serde_json::{json, Value as Json};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "plinthctl", version, about = "Plinth CLI: build, preview and render stacks")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// More log output from plinth crates (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json, Yaml }

#[derive(Args, Debug)]
struct StackArgs {
    /// Stack to run
    #[arg(long = "stack", default_value = plinth_stacks::DEFAULT_STACK)]
    stack: String,

    /// YAML file overriding the stack's default values
    #[arg(long = "values")]
    values: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered stacks
    Stacks,
    /// Resolve a stack against the mock backend
    Up(StackArgs),
    /// Validate a stack and show what would be submitted
    Preview(StackArgs),
    /// Print resolved manifests
    Render(StackArgs),
}

/// `PLINTH_LOG` wins; otherwise each `-v` raises the plinth crates one level
/// above the default `info`.
fn log_filter(verbose: u8) -> tracing_subscriber::EnvFilter {
    if let Ok(env) = std::env::var("PLINTH_LOG") {
        if let Ok(filter) = tracing_subscriber::EnvFilter::from_str(&env) {
            return filter;
        }
    }
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let directives = format!("info,plinth_engine={level},plinth_backend={level},plinth_stacks={level},plinthctl={level}");
    tracing_subscriber::EnvFilter::new(directives)
}

fn init_tracing(verbose: u8) {
    // stdout carries manifests and JSON; logs go to stderr.
    tracing_subscriber::fmt().with_env_filter(log_filter(verbose)).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() -> Result<()> {
    let Ok(addr) = std::env::var("PLINTH_METRICS_ADDR") else { return Ok(()) };
    let sock: std::net::SocketAddr = addr.parse().with_context(|| format!("PLINTH_METRICS_ADDR={addr}: expected host:port"))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(sock)
        .install()
        .with_context(|| format!("installing Prometheus exporter on {sock}"))?;
    info!(addr = %sock, "Prometheus metrics exporter listening");
    Ok(())
}

fn load_stack(args: &StackArgs) -> Result<Box<dyn StackBuilder>> {
    let values = match &args.values {
        Some(path) => Some(std::fs::read_to_string(path).with_context(|| format!("reading values file {}", path.display()))?),
        None => None,
    };
    plinth_stacks::by_name(&args.stack, values.as_deref())
}

async fn run(args: &StackArgs, preview: bool) -> Result<RunOutcome> {
    let stack = load_stack(args)?;
    let options = EngineOptions { preview: preview || EngineOptions::from_env().preview };
    info!(stack = %stack.name(), preview = options.preview, "running stack");
    let engine = Engine::new(MockBackend::new()).with_options(options);
    match engine.run(&*stack).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            error!(stack = %args.stack, error = %e, "run failed");
            Err(e).with_context(|| format!("stack {}", args.stack))
        }
    }
}

fn summary(outcome: &RunOutcome) -> Json {
    let resources: Vec<Json> = outcome
        .resources
        .iter()
        .map(|r| {
            json!({
                "kind": r.kind().as_str(),
                "name": r.name(),
                "object": r.metadata_name(),
                "id": r.id,
            })
        })
        .collect();
    json!({
        "stack": outcome.stack,
        "preview": outcome.preview,
        "resources": resources,
        "outputs": outcome.outputs,
    })
}

fn print_structured(output: Output, value: &Json) -> Result<()> {
    match output {
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn print_outcome(output: Output, outcome: &RunOutcome) -> Result<()> {
    if output != Output::Human {
        return print_structured(output, &summary(outcome));
    }
    let mode = if outcome.preview { " (preview)" } else { "" };
    println!("stack {}{}", outcome.stack, mode);
    println!("{:<24} {:<20} {:<20} ID", "KIND", "NAME", "OBJECT");
    for r in &outcome.resources {
        println!(
            "{:<24} {:<20} {:<20} {}",
            r.kind().as_str(),
            r.name(),
            r.metadata_name().unwrap_or("-"),
            r.id.as_deref().unwrap_or("-")
        );
    }
    if !outcome.outputs.is_empty() {
        println!();
        println!("outputs:");
        for (name, value) in &outcome.outputs {
            let shown = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            println!("  {} = {}", name, shown);
        }
    }
    Ok(())
}

fn print_manifests(output: Output, outcome: &RunOutcome) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(&outcome.manifests().collect::<Vec<_>>())?),
        Output::Human | Output::Yaml => {
            for manifest in outcome.manifests() {
                println!("---");
                print!("{}", serde_yaml::to_string(manifest)?);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    init_metrics()?;

    match cli.command {
        Commands::Stacks => {
            let names = plinth_stacks::names();
            match cli.output {
                Output::Human => {
                    for name in names {
                        let marker = if *name == plinth_stacks::DEFAULT_STACK { " (default)" } else { "" };
                        println!("{}{}", name, marker);
                    }
                }
                other => print_structured(other, &json!(names))?,
            }
        }
        Commands::Up(args) => {
            let outcome = run(&args, false).await?;
            print_outcome(cli.output, &outcome)?;
        }
        Commands::Preview(args) => {
            let outcome = run(&args, true).await?;
            print_outcome(cli.output, &outcome)?;
        }
        Commands::Render(args) => {
            let outcome = run(&args, false).await?;
            print_manifests(cli.output, &outcome)?;
        }
    }
    Ok(())
}
