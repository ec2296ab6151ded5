use log::{info, error};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::email::MailboxConnector;
use super::idle_loop::IngestLoop;

/// Runs an [`IngestLoop`] on its own task.
pub struct IngestWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl IngestWorker {
    pub fn start<C>(mut ingest: IngestLoop<C>) -> Self
    where
        C: MailboxConnector + 'static,
        C::Session: 'static,
    {
        let cancel = ingest.cancellation_token();
        let handle = tokio::spawn(async move { ingest.run().await });

        IngestWorker { cancel, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the loop and waits until its connection is torn down.
    pub async fn stop(self) {
        info!("Stopping booking ingestion worker");
        self.cancel.cancel();

        if let Err(e) = self.handle.await {
            error!("❌ Ingestion task ended abnormally: {}", e);
        }
    }
}
