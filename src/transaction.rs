//! Transaction handles: BEGIN on creation, COMMIT on a clean `end`, ABORT otherwise.

use crate::client::error::StompResult;
use crate::connection::ConnectionManager;
use crate::frame::{Command, Frame};
use crate::transport::Transport;
use std::sync::Arc;
use uuid::Uuid;

/// A transaction id scope. SEND frames issued through [`Self::send`] carry
/// the `transaction` header; call [`Self::commit`] or [`Self::abort`] to
/// close it. Dropping a transaction without calling either leaves it open
/// on the broker - callers are expected to always commit or abort.
pub struct Transaction<T: Transport> {
    id: String,
    manager: Arc<ConnectionManager<T>>,
}

impl<T: Transport> Transaction<T> {
    pub(crate) async fn begin(manager: Arc<ConnectionManager<T>>) -> StompResult<Self> {
        let id = Uuid::new_v4().to_string();
        let frame = Frame::new(Command::Begin).header("transaction", id.clone());
        manager.write_frame_reconnecting(&frame).await?;
        Ok(Self { id, manager })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn send(&self, destination: &str, body: impl Into<Vec<u8>>) -> StompResult<()> {
        let body = body.into();
        let frame = Frame::with_body(Command::Send, body.clone())
            .header("destination", destination.to_string())
            .header("content-length", body.len().to_string())
            .header("transaction", self.id.clone());
        self.manager.write_frame_reconnecting(&frame).await
    }

    pub async fn commit(self) -> StompResult<()> {
        let frame = Frame::new(Command::Commit).header("transaction", self.id.clone());
        self.manager.write_frame_reconnecting(&frame).await
    }

    pub async fn abort(self) -> StompResult<()> {
        let frame = Frame::new(Command::Abort).header("transaction", self.id.clone());
        self.manager.write_frame_reconnecting(&frame).await
    }
}
