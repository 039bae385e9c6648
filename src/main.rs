mod args;
pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod validate;

use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = args::Args::new();
    args.run().await
}
