use std::sync::Arc;

use csvbot_core::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    csvbot_core::logging::init("csvbot")?;

    let cfg = Arc::new(Config::load()?);

    if let Err(e) = csvbot_telegram::router::run(cfg).await {
        tracing::error!("telegram bot failed: {e}");
        return Err(e);
    }

    Ok(())
}
