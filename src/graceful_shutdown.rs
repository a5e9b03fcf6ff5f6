//! Graceful shutdown

use tokio::signal;

use crate::changes::ChangeFeed;

/// Handler for graceful shutdown
///
/// Will listen to Ctrl+C or SIGTERM and initiate a shutdown. The change feed is closed as well,
/// otherwise connected change streams would keep the server alive.
pub async fn handler(change_feed: ChangeFeed) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Could not listen for CTRL+C: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                tracing::error!("Could not listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Terminate signal received, starting graceful shutdown");

    change_feed.close();
}
