// ABOUTME: Long-running STOMP client example demonstrating subscription and reconnection handling
// ABOUTME: Shows how the facade keeps a subscription alive across broker restarts without caller involvement

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use stompman::client::{Client, ClientConfigBuilder};
use stompman::subscription::AckMode;
use stompman::transport::{ServerAddr, TcpTransport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let config = ClientConfigBuilder::new()
        .servers([ServerAddr::new("broker-a.internal", 61613), ServerAddr::new("broker-b.internal", 61613)])
        .credentials("guest", "guest")
        .heartbeat(5_000, 5_000)
        .connect_retry_attempts(10)
        .connect_retry_interval(Duration::from_secs(2))
        .from_env()
        .build();

    let on_error = Arc::new(|frame: stompman::Frame| {
        tracing::error!(?frame, "broker reported an error frame");
    });

    let client = Client::<TcpTransport>::connect_with_callbacks(config, Some(on_error), None).await?;

    client
        .subscribe("/topic/events", AckMode::Client, Vec::new(), None, |frame| async move {
            tracing::info!(body = %String::from_utf8_lossy(frame.body()), "received event");
            Ok(())
        })
        .await?;

    tokio::signal::ctrl_c().await?;
    client.disconnect().await?;
    Ok(())
}
