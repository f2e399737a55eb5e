//! Buy Relay - Guarded Webhook Trade Dispatcher

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (PORT, WEBHOOK_DATA_DIR, RUST_LOG)
    dotenvy::dotenv().ok();

    let app = buy_relay::adapters::cli::init();
    buy_relay::adapters::cli::execute(app).await
}
