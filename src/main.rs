use dotenvy::dotenv;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

mod args;

/// Entry point of the application.
///
/// Initializes the environment, parses the command line arguments, and runs
/// the room server.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load environment variables from the `.env` file.
    dotenv().ok();

    // Configure the logging level based on the `RUST_LOG` environment
    // variable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = args::Args::new();

    if let Err(e) = args.run().await {
        error!("{e}");
    }

    Ok(())
}
