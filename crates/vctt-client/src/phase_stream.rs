use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::progress::PhaseEvent;

#[derive(Debug, Error)]
pub enum PhaseStreamError {
    #[error("phase stream url invalid: {0}")]
    InvalidUrl(String),
    #[error("phase stream connect failed: {0}")]
    Connect(String),
    #[error("phase stream receive failed: {0}")]
    Receive(String),
}

pub fn phase_url(ws_base: &Url, session_id: &str) -> Result<Url, PhaseStreamError> {
    if session_id.trim().is_empty() {
        return Err(PhaseStreamError::InvalidUrl(
            "session id must not be empty".to_string(),
        ));
    }

    let mut url = ws_base.clone();
    url.path_segments_mut()
        .map_err(|_| PhaseStreamError::InvalidUrl(format!("{ws_base} cannot be a base")))?
        .pop_if_empty()
        .extend(["ws", "phases", session_id]);
    Ok(url)
}

pub async fn run_phase_stream(
    ws_base: &Url,
    session_id: &str,
    sink: mpsc::Sender<PhaseEvent>,
) -> Result<u64, PhaseStreamError> {
    let url = phase_url(ws_base, session_id)?;
    let (mut ws, _) = connect_async(url.as_str())
        .await
        .map_err(|err| PhaseStreamError::Connect(err.to_string()))?;
    info!(session_id, "phase stream connected");

    let mut forwarded = 0_u64;
    while let Some(frame) = ws.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => return Err(PhaseStreamError::Receive(err.to_string())),
        };

        let event = match serde_json::from_str::<PhaseEvent>(&text) {
            Ok(event) => event,
            Err(err) => {
                warn!(session_id, "ignoring malformed phase frame: {err}");
                continue;
            }
        };
        if sink.send(event).await.is_err() {
            debug!(session_id, "phase sink closed");
            break;
        }
        forwarded += 1;
    }

    let _ = ws.close(None).await;
    info!(session_id, forwarded, "phase stream ended");
    Ok(forwarded)
}
