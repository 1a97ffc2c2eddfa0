//! Serve a resource bundle from an in-process management plane, sync it
//! into a data-plane store over ADS and route sample connections.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use meridian_xds::prelude::*;
use meridian_xds::server::services::AggregatedDiscoveryService;
use meridian_xds::server::DiscoveryRequestStream;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::Request;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Resource bundle served by the management plane
    #[arg(short, long)]
    bundle: PathBuf,

    /// Node id the data plane identifies as
    #[arg(short, long, default_value = "xds-demo")]
    node: String,

    /// Maximum log level
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync every resource type and print the applied versions
    Sync,
    /// Sync listeners, then select a filter chain for one connection
    Route {
        /// Listener accepting the connection
        #[arg(short, long)]
        listener: String,
        /// Downstream address
        #[arg(long, default_value = "192.0.2.1:40000")]
        source: SocketAddr,
        /// Local address the connection arrived on
        #[arg(long)]
        destination: SocketAddr,
        /// TLS server name presented by the client
        #[arg(long)]
        sni: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    let bundle = ResourceBundle::load(&args.bundle)
        .await
        .with_context(|| format!("loading {}", args.bundle.display()))?;

    let upstream = Arc::new(ResourceVersionStore::new());
    for (type_url, resources) in bundle.all_resources()? {
        let (version, _) = upstream.apply_versioned(type_url.clone(), resources)?;
        info!(type_url = %type_url, version = %version, "serving resources");
    }
    let server = XdsServer::builder().store(Arc::clone(&upstream)).build()?;

    let types = match &args.command {
        Command::Sync => upstream.type_urls(),
        Command::Route { .. } => vec![TypeUrl::new(TypeUrl::LISTENER)],
    };
    let local = sync(&server, &args.node, &types).await?;

    match args.command {
        Command::Sync => {
            let versions: serde_json::Map<_, _> = local
                .type_urls()
                .into_iter()
                .map(|t| {
                    let version = local.version(t.as_str()).into_inner();
                    (t.to_string(), json!(version))
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&versions)?);
        }
        Command::Route {
            listener,
            source,
            destination,
            sni,
        } => {
            let mut conn = ConnectionMetadata::new(source, destination);
            if let Some(sni) = sni {
                conn = conn.with_server_name(sni);
            }
            let selection = ConnectionRouter::new(local).select(&listener, &conn);
            let output = match selection.selected() {
                Some(selected) => json!({
                    "outcome": selection.outcome(),
                    "listener": selected.listener,
                    "version": selected.version.as_str(),
                    "chain": selected.chain.name,
                    "index": selected.index,
                    "filters": selected.chain.filters.iter().map(|f| &f.name).collect::<Vec<_>>(),
                }),
                None => json!({ "outcome": selection.outcome() }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Subscribe to `types` over ADS until the local store matches the server.
async fn sync(
    server: &XdsServer,
    node: &str,
    types: &[TypeUrl],
) -> anyhow::Result<Arc<ResourceVersionStore>> {
    let local = Arc::new(ResourceVersionStore::new());
    let client = Arc::new(DiscoveryClient::new(
        &Node::new(node),
        Arc::clone(&local),
        Arc::clone(server.registry()),
    ));

    let (request_tx, request_rx) = mpsc::channel(16);
    let requests: DiscoveryRequestStream = Box::pin(ReceiverStream::new(request_rx).map(Ok));
    let responses = server
        .ads()
        .stream_aggregated_resources(Request::new(requests))
        .await?
        .into_inner();

    let subscriptions = types.iter().map(|t| (t.clone(), Vec::new())).collect();
    let runner = Arc::clone(&client);
    let stream = tokio::spawn(async move { runner.run(subscriptions, responses, request_tx).await });

    let upstream = server.store();
    let converged = async {
        while !types
            .iter()
            .all(|t| local.version(t.as_str()) == upstream.version(t.as_str()))
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    let synced = tokio::time::timeout(Duration::from_secs(5), converged).await;
    stream.abort();
    if synced.is_err() {
        bail!("data plane did not converge within 5s");
    }

    info!(node, types = types.len(), "data plane in sync");
    Ok(local)
}
