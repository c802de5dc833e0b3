use clap::Parser;
use pointdeck::room::server;

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Port to run the room server on. Falls back to APP_PORT, then 3001.
    #[arg(short, long)]
    pub port: Option<i32>,

    /// Address to accept connections on. Falls back to APP_HOST, then 0.0.0.0.
    #[arg(short, long)]
    pub listen_addr: Option<String>,
}

impl Args {
    pub fn new() -> Self {
        Self::parse()
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        server::start_server(self.port.as_ref(), self.listen_addr.as_ref()).await;
        Ok(())
    }
}
