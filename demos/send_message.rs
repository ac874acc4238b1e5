// ABOUTME: Example application demonstrating sending a message using the STOMP client facade
// ABOUTME: Shows connecting against a candidate server list and a graceful disconnect

use std::error::Error;
use std::time::Duration;

use stompman::client::{Client, ClientConfigBuilder};
use stompman::transport::{ServerAddr, TcpTransport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let config = ClientConfigBuilder::new()
        .server(ServerAddr::new("localhost", 61613))
        .credentials("guest", "guest")
        .connect_timeout(Duration::from_secs(5))
        .from_env()
        .build();

    let client = Client::<TcpTransport>::connect(config).await?;

    client
        .send(
            "/queue/greetings",
            "Hello, World!",
            None,
            Some("text/plain"),
            true,
            Vec::new(),
        )
        .await?;

    client.disconnect().await?;
    Ok(())
}
