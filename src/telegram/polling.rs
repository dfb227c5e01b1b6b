//! Long-poll delivery: pull updates with `getUpdates` until cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{dispatch, BotApi, TelegramError};
use crate::comm::Relay;

/// Seconds each `getUpdates` call may wait server-side.
pub const LONG_POLL_SECS: u64 = 30;

/// Pause after a failed poll before trying again.
const ERROR_BACKOFF: Duration = Duration::from_secs(3);

/// Pull updates and dispatch each one until `cancel` fires.
///
/// Transient poll failures are logged and retried; only the initial
/// webhook removal is fatal.
pub async fn run(
    api: Arc<BotApi>,
    relay: Arc<Relay>,
    cancel: CancellationToken,
) -> Result<(), TelegramError> {
    api.delete_webhook().await?;
    info!("long polling started");

    let mut offset: Option<i64> = None;
    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            r = api.get_updates(offset, LONG_POLL_SECS) => r,
        };

        match polled {
            Ok(updates) => {
                for update in updates {
                    offset = Some(update.update_id + 1);
                    dispatch(relay.clone(), update);
                }
            }
            Err(e) => {
                warn!(error = %e, "getUpdates failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }
    }

    info!("long polling stopped");
    Ok(())
}
