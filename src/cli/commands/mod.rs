pub mod load_raw;
pub mod status;
pub mod transform;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Cancellation token wired to Ctrl-C; loaders observe it at batch
/// boundaries so an interrupted run is bookkept rather than torn down.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling at the next batch boundary");
            signal_token.cancel();
        }
    });
    token
}
