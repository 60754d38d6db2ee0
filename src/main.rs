use clap::Parser;
use cluster_fabric::config::NodeConfig;
use cluster_fabric::node::ClusterNode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = NodeConfig::parse();

    tracing::info!("Starting node on {}", config.bind);
    if !config.seeds.is_empty() {
        tracing::info!("Seed nodes: {:?}", config.seeds);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    let node = ClusterNode::bootstrap(&config).await?;
    tracing::info!("Node ID: {}", node.id());

    let listener = tokio::net::TcpListener::bind(config.http_addr()).await?;
    tracing::info!("Press Ctrl+C to shutdown");
    node.run(listener).await
}
