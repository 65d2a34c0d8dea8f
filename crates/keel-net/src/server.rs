use async_trait::async_trait;
use keel_core::BoxError;

use crate::{Deadline, Listener};

/// A server driven by [`serve`](crate::serve).
///
/// `serve` blocks on the accept loop until the server stops; `shutdown` asks a
/// running accept loop to stop and must honor `deadline`.
#[async_trait]
pub trait Server: Send + Sync + 'static {
    async fn serve(&self, listener: Listener) -> Result<(), BoxError>;

    async fn shutdown(&self, deadline: Deadline) -> Result<(), BoxError>;
}
