use discord_webhook::{Dispatcher, DispatcherConfig, Message};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::var("DISCORD_WEBHOOK_URL")?;
    let path = std::env::args()
        .nth(1)
        .ok_or("usage: upload_file <path>")?;

    let dispatcher = Dispatcher::http(DispatcherConfig::default());
    let message = Message::new("Uploaded file").with_username("BotUser");
    dispatcher.upload_file_with_message(&url, &path, &message).await?;

    Ok(())
}
