//! A reconnecting, resubscribing STOMP 1.2 client.
//!
//! [`client::Client`] is the entry point: connect it against an ordered
//! list of candidate brokers, subscribe to destinations with either an
//! auto-managed or manual ack policy, send messages (optionally inside a
//! transaction), and disconnect gracefully. Connection loss is handled
//! transparently - the connect-retry loop, heartbeat bookkeeping, and
//! resubscription after reconnect all live in [`connection`],
//! [`heartbeat`], and [`subscription`] respectively, below the facade.
//!
//! ```rust,no_run
//! use stompman::client::{Client, ClientConfig, ClientConfigBuilder};
//! use stompman::subscription::AckMode;
//! use stompman::transport::{ServerAddr, TcpTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfigBuilder::new()
//!         .server(ServerAddr::new("localhost", 61613))
//!         .credentials("guest", "guest")
//!         .build();
//!
//!     let client = Client::<TcpTransport>::connect(config).await?;
//!     client
//!         .subscribe("/queue/greetings", AckMode::Auto, Vec::new(), None, |frame| async move {
//!             println!("got {:?}", frame.body());
//!             Ok(())
//!         })
//!         .await?;
//!     client.send("/queue/greetings", "hello", None, None, true, Vec::new()).await?;
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod frame;
pub mod heartbeat;
pub mod listener;
pub mod subscription;
pub mod transaction;
pub mod transport;

pub mod client;

#[cfg(test)]
mod tests;

pub use client::{Client, ClientConfig, ClientConfigBuilder, StompError, StompResult};
pub use codec::{CodecError, FrameParser, StompCodec};
pub use frame::{Command, Frame, Headers};
pub use subscription::{AckMode, AckableMessageFrame, HandlerError, Subscription};
pub use transaction::Transaction;
pub use transport::{ConnectOptions, ServerAddr, SslMode, Transport, TransportError};
