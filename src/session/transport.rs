use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::live::{FrameSink, OutboundFrame};

/// Drains the outbound queue into the channel sink
pub(crate) struct TransportHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<u64>>,
}

impl TransportHandle {
    pub(crate) fn spawn(
        mut sink: Box<dyn FrameSink>,
        mut queue: mpsc::Receiver<OutboundFrame>,
        faults: mpsc::Sender<String>,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut sent = 0u64;

            loop {
                tokio::select! {
                    biased;

                    _ = &mut shutdown_rx => break,

                    frame = queue.recv() => {
                        let Some(frame) = frame else { break };
                        let sequence = frame.sequence;
                        if let Err(e) = sink.send(frame).await {
                            error!("Failed to send frame {}: {:#}", sequence, e);
                            let _ = faults.try_send(format!("{:#}", e));
                            break;
                        }
                        sent += 1;
                    }
                }
            }

            // Frames still queued at this point are discarded with the queue
            if let Err(e) = sink.close().await {
                warn!("Failed to close agent channel: {:#}", e);
            }
            debug!("Transport stopped after {} frames", sent);
            sent
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Stop sending and close the channel; returns frames sent
    pub(crate) async fn shutdown(mut self) -> u64 {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                warn!("Transport task failed: {}", e);
                0
            }),
            None => 0,
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
