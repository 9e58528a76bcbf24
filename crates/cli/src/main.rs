use std::io::Read;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use metrics::counter;
use peerage_api::{InProcApi, PeerageApi, Record, ResourceType, Settings};
use peerage_core::PeerageError;
use peerage_kubehub::{Hub, KindRegistry, KubeTarget};
use peerage_persist::{ResourceState, SqliteStore, StateStore};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "peeragectl", version, about = "Establish peerings and offload namespaces across clusters")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubeconfig file; repeat to merge several (default: in-cluster, then $KUBECONFIG, then ~/.kube/config)
    #[arg(long = "kubeconfig", global = true)]
    kubeconfig: Vec<String>,

    /// Kubeconfig context to use
    #[arg(long = "context", global = true)]
    context: Option<String>,

    /// State file (default: $PEERAGE_DB_PATH or ~/.peerage/state.db)
    #[arg(long = "db", global = true)]
    db: Option<String>,

    /// Do not check that the cluster serves the peering kinds
    #[arg(long = "skip-discovery", global = true, action = ArgAction::SetTrue)]
    skip_discovery: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a resource from a YAML or JSON input file
    Create {
        #[arg(value_parser = parse_resource)]
        resource: ResourceType,
        /// Input file, or "-" for stdin
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Refresh and print the stored state of a resource
    Read {
        #[arg(value_parser = parse_resource)]
        resource: ResourceType,
        id: String,
    },
    /// Update a resource with new input
    Update {
        #[arg(value_parser = parse_resource)]
        resource: ResourceType,
        id: String,
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Tear a resource down and forget its state
    Delete {
        #[arg(value_parser = parse_resource)]
        resource: ResourceType,
        id: String,
    },
    /// List stored resource states
    State {
        #[arg(value_parser = parse_resource)]
        resource: Option<ResourceType>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Create { .. } => "create",
            Commands::Read { .. } => "read",
            Commands::Update { .. } => "update",
            Commands::Delete { .. } => "delete",
            Commands::State { .. } => "state",
        }
    }
}

fn parse_resource(s: &str) -> Result<ResourceType, PeerageError> { ResourceType::from_str(s) }

fn init_tracing() {
    let env = std::env::var("PEERAGE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("PEERAGE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid PEERAGE_METRICS_ADDR; expected host:port");
        }
    }
}

/// YAML is a superset of JSON, so one parser covers both.
fn read_input(file: &str) -> Result<serde_json::Value> {
    let text = if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading input from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading input file {}", file))?
    };
    let v: serde_json::Value = serde_yaml::from_str(&text).with_context(|| format!("parsing input {}", file))?;
    if !v.is_object() {
        return Err(anyhow!("input {} must be a mapping", file));
    }
    Ok(v)
}

fn open_state(cli: &Cli) -> Result<SqliteStore> {
    match &cli.db {
        Some(p) => SqliteStore::open(p),
        None => SqliteStore::open_default(),
    }
}

fn target(cli: &Cli) -> KubeTarget {
    let mut t = KubeTarget::from_env();
    if !cli.kubeconfig.is_empty() {
        t.kubeconfig_paths = cli.kubeconfig.iter().map(|p| peerage_kubehub::config::expand_home(p)).collect();
    }
    if let Some(ctx) = &cli.context {
        t = t.with_context(ctx.clone());
    }
    t
}

async fn connect(cli: &Cli, settings: &Settings) -> Result<InProcApi> {
    let verify = !(cli.skip_discovery || settings.skip_discovery);
    let hub = Hub::connect(&target(cli), KindRegistry::standard(), verify).await?;
    Ok(InProcApi::new(hub.stores(), settings))
}

fn stored(state: &dyn StateStore, resource: ResourceType, id: &str) -> Result<Record> {
    let row = state
        .get(resource.as_str(), id)?
        .ok_or_else(|| anyhow!("no stored state for {} {}; create it first", resource, id))?;
    Ok(Record { resource, id: row.id, state: row.state })
}

fn print_record(output: Output, verb: &str, rec: &Record) -> Result<()> {
    match output {
        Output::Human => {
            println!("{} {} {}", rec.resource, rec.id, verb);
            print!("{}", serde_yaml::to_string(&rec.state)?);
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(rec)?),
    }
    Ok(())
}

fn print_states(output: Output, rows: &[ResourceState]) -> Result<()> {
    match output {
        Output::Human => {
            println!("{:<10} {:<32} UPDATED", "RESOURCE", "ID");
            for r in rows {
                let updated = chrono::DateTime::from_timestamp(r.ts, 0).map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string());
                println!("{:<10} {:<32} {}", r.resource, r.id, updated);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(rows)?),
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    let settings = Settings::from_env()?;
    let state = open_state(cli)?;
    match &cli.command {
        Commands::Create { resource, file } => {
            let input = read_input(file)?;
            let api = connect(cli, &settings).await?;
            let rec = api.create(*resource, input).await?;
            if state.get(resource.as_str(), &rec.id)?.is_some() {
                warn!(resource = %resource, id = %rec.id, "overwriting existing stored state");
            }
            state.put(resource.as_str(), &rec.id, &rec.state)?;
            print_record(cli.output, "created", &rec)
        }
        Commands::Read { resource, id } => {
            let prior = stored(&state, *resource, id)?;
            let api = connect(cli, &settings).await?;
            let rec = api.read(&prior).await?;
            state.put(resource.as_str(), &rec.id, &rec.state)?;
            print_record(cli.output, "read", &rec)
        }
        Commands::Update { resource, id, file } => {
            let prior = stored(&state, *resource, id)?;
            let input = read_input(file)?;
            let api = connect(cli, &settings).await?;
            let rec = api.update(&prior, input).await?;
            if rec.id != prior.id {
                state.remove(resource.as_str(), &prior.id)?;
            }
            state.put(resource.as_str(), &rec.id, &rec.state)?;
            print_record(cli.output, "updated", &rec)
        }
        Commands::Delete { resource, id } => {
            let prior = stored(&state, *resource, id)?;
            let api = connect(cli, &settings).await?;
            api.delete(&prior).await?;
            state.remove(resource.as_str(), id)?;
            match cli.output {
                Output::Human => println!("{} {} deleted", resource, id),
                Output::Json => println!("{}", serde_json::json!({ "resource": resource, "id": id, "deleted": true })),
            }
            Ok(())
        }
        Commands::State { resource } => {
            let rows = state.list(resource.map(|r| r.as_str()))?;
            print_states(cli.output, &rows)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let command = cli.command.name();
    info!(command, "peeragectl invoked");
    let res = run(&cli).await;
    let result = if res.is_ok() { "ok" } else { "error" };
    counter!("cli_commands_total", 1, "command" => command, "result" => result);
    if let Err(e) = &res {
        error!(command, error = %e, "command failed");
    }
    res
}
