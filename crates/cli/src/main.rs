use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use fleet_core::NamespaceSet;
use fleet_kubehub::plan_namespaces;
use fleet_operator::crd::{PrometheusAgentSpec, PrometheusSpec};
use fleet_operator::reconciler::expected_shard_names;
use fleet_operator::{Config, Prometheus, PrometheusAgent};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "fleetctl", version, about = "Sharded Prometheus fleet operator")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespaces to watch, comma separated (overrides FLEET_ALLOW_NAMESPACES)
    #[arg(long = "allow", global = true)]
    allow: Option<String>,

    /// Namespaces to skip when watching all of them (overrides FLEET_DENY_NAMESPACES)
    #[arg(long = "deny", global = true)]
    deny: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers until interrupted
    Run {
        /// Workers per controller (overrides FLEET_WORKERS)
        #[arg(long = "workers")]
        workers: Option<usize>,
    },
    /// Show which namespaces would be watched and with which filters
    Plan,
    /// Print the StatefulSet names for a workload's shards
    Shards {
        /// Workload name
        name: String,
        /// Number of shards
        #[arg(long = "shards", default_value_t = 1)]
        shards: i32,
        /// Name shards for a PrometheusAgent instead of a Prometheus
        #[arg(long = "agent", action = ArgAction::SetTrue)]
        agent: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("FLEET_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FLEET_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid FLEET_METRICS_ADDR; expected host:port");
        }
    }
}

fn config_from(cli: &Cli) -> Config {
    let mut config = Config::from_env();
    if let Some(allow) = cli.allow.as_deref() {
        config.allow_namespaces = NamespaceSet::parse_list(allow);
    }
    if let Some(deny) = cli.deny.as_deref() {
        config.deny_namespaces = NamespaceSet::parse_list(deny);
    }
    config
}

fn shard_names(name: &str, shards: i32, agent: bool) -> Vec<String> {
    if agent {
        let spec = PrometheusAgentSpec { shards: Some(shards), ..Default::default() };
        expected_shard_names(&PrometheusAgent::new(name, spec))
    } else {
        let spec = PrometheusSpec { shards: Some(shards), ..Default::default() };
        expected_shard_names(&Prometheus::new(name, spec))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let mut config = config_from(&cli);

    match cli.command {
        Commands::Run { workers } => {
            if let Some(w) = workers {
                config.workers = w.max(1);
            }
            let client = kube::Client::try_default().await.context("building kubernetes client")?;
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if signal::ctrl_c().await.is_ok() {
                        info!("interrupt received; shutting down");
                    }
                    cancel.cancel();
                }
            });
            if let Err(e) = fleet_operator::run(client, config, cancel.clone()).await {
                error!(error = %e, "operator failed");
                cancel.cancel();
                return Err(e.into());
            }
        }
        Commands::Plan => {
            let plan = plan_namespaces(&config.allow_namespaces, &config.deny_namespaces, None)?;
            let opts = plan.list_options();
            match cli.output {
                Output::Human => {
                    if plan.is_all_namespaces() {
                        println!("namespaces: <all>");
                    } else {
                        println!("namespaces: {}", plan.namespaces.join(", "));
                    }
                    println!("deny:       {}", if plan.deny.is_empty() { "-".to_string() } else { plan.deny.to_string() });
                    println!("field sel:  {}", opts.field_selector.as_deref().unwrap_or("-"));
                }
                Output::Json => {
                    let doc = serde_json::json!({
                        "allNamespaces": plan.is_all_namespaces(),
                        "namespaces": plan.namespaces,
                        "deny": plan.deny.iter().collect::<Vec<_>>(),
                        "fieldSelector": opts.field_selector,
                    });
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                }
            }
        }
        Commands::Shards { name, shards, agent } => {
            let names = shard_names(&name, shards, agent);
            match cli.output {
                Output::Human => {
                    println!("SHARD  STATEFULSET");
                    for (i, n) in names.iter().enumerate() {
                        println!("{:<6} {}", i, n);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&names)?),
            }
        }
    }
    Ok(())
}
