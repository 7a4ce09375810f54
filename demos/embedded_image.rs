use std::sync::Arc;

use discord_webhook::{Dispatcher, DispatcherConfig, Embed, Message, RateLimiter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::var("DISCORD_WEBHOOK_URL")?;
    let dispatcher = Dispatcher::http(DispatcherConfig::default())
        .with_rate_limiter(Arc::new(RateLimiter::new()));

    let embed = Embed::new()
        .with_title("Deploy finished")
        .with_description("Build artifacts are attached below.")
        .with_color(0x57F287)
        .with_image("https://upload.wikimedia.org/wikipedia/commons/4/47/PNG_transparency_demonstration_1.png");

    let message = Message::new("Here is an image:")
        .with_username("BotUser")
        .with_embed(embed);

    dispatcher.send(&url, &message).await?;
    Ok(())
}
