// =============================================================================
// Tick Feed — websocket trade stream with reconnect
// =============================================================================
//
// The transport side of ingestion: connect, read text frames, hand them to
// the `TickIngestor`, reconnect after a fixed delay.  Connection lifecycle is
// forwarded to the engine as `ConnectionEvent`s.  Nothing here touches
// period state directly, so a dropped connection leaves the open period
// exactly as it was.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::market_data::TickIngestor;
use crate::types::ConnectionEvent;

/// Connect to `url` and feed every text frame into `ingestor`.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller can handle reconnection.
pub async fn run_tick_stream(url: &str, ingestor: &TickIngestor) -> Result<()> {
    info!(url = %url, "connecting to tick WebSocket");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to tick WebSocket")?;

    info!(url = %url, "tick WebSocket connected");
    ingestor.notify(ConnectionEvent::Connected {
        url: url.to_string(),
    });
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                ingestor.on_message(&text);
            }
            // Ping / Pong / Binary / Close -- tungstenite answers pings itself.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(url = %url, error = %e, "tick WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(url = %url, "tick WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Keep a tick stream alive until `shutdown` flips to `true`, reconnecting
/// after `reconnect_delay` whenever the connection drops.
pub async fn run_feed(
    url: String,
    ingestor: TickIngestor,
    reconnect_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            result = run_tick_stream(&url, &ingestor) => {
                match result {
                    Ok(()) => ingestor.notify(ConnectionEvent::Disconnected { url: url.clone() }),
                    Err(e) => {
                        error!(
                            url = %url,
                            error = %e,
                            delay_secs = reconnect_delay.as_secs(),
                            "tick stream error; reconnecting"
                        );
                        ingestor.notify(ConnectionEvent::Error {
                            url: url.clone(),
                            message: format!("{e:#}"),
                        });
                    }
                }
            }
            _ = shutdown.changed() => break,
        }

        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!(url = %url, "tick feed stopped");
}
