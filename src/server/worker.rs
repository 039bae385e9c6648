use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::server::clients::send_to;
use crate::server::state::ServerState;

/// Simulated per-job processing time.
const PROCESS_DELAY: Duration = Duration::from_secs(2);

/// The single consumer of the upload queue. Runs until shutdown. Each
/// consumed job posts exactly one slot permit back, whatever the delivery
/// outcome, so the queue neither leaks nor double-frees slots.
pub async fn run(state: Arc<ServerState>) {
    loop {
        let transfer = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            transfer = state.uploads.take() => transfer,
        };

        sleep(PROCESS_DELAY).await;
        debug!(
            "Processing '{}' queued {:.1?} ago",
            transfer.filename,
            transfer.queued_at.elapsed()
        );

        match state.clients.find_by_name(&transfer.receiver).await {
            Some(receiver) => {
                send_to(
                    &receiver,
                    &format!(
                        "[FILE] Received '{}' from {} ({} bytes)\n",
                        transfer.filename, transfer.sender, transfer.size
                    ),
                )
                .await;
                state
                    .log
                    .record(&format!(
                        "[SEND FILE] '{}' sent from {} to {} (success)",
                        transfer.filename, transfer.sender, transfer.receiver
                    ))
                    .await;
            }
            None => {
                state
                    .log
                    .record(&format!(
                        "[SEND FILE] '{}' from {} to {} (failed - user offline)",
                        transfer.filename, transfer.sender, transfer.receiver
                    ))
                    .await;
            }
        }

        state.uploads.release_slot();
    }
}
