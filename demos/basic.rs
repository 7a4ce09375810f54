use std::sync::Arc;

use discord_webhook::{Dispatcher, DispatcherConfig, Message, RateLimiter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::var("DISCORD_WEBHOOK_URL")?;
    let dispatcher = Dispatcher::http(DispatcherConfig::default())
        .with_rate_limiter(Arc::new(RateLimiter::new()));

    for i in 0..20 {
        let message = Message::new(format!("This is a test message #{i}")).with_username("BotUser");
        dispatcher.send(&url, &message).await?;
    }

    Ok(())
}
