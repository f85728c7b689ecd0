use seqvault_core::error::Result;
use tracing_subscriber::EnvFilter;

mod application;
mod presentation;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    application::run()
}
