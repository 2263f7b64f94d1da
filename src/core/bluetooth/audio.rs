//! Raw audio-byte stream forwarding.
//! Subscribes to the audio-bytes characteristic and forwards every chunk to
//! the registered callback. Chunks are passed through unchanged, including
//! the device's 3-byte packet framing header.

use bluest::Characteristic;
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::sdk::{AudioBytesCallback, AudioSubscription, SdkError};

/// Starts the forwarding task for the given characteristic. Resolves once
/// the notification subscription is live, so a failed subscribe surfaces
/// here instead of dying silently inside the task.
pub(crate) async fn start_forwarding(
    characteristic: Characteristic,
    on_bytes: AudioBytesCallback,
) -> Result<AudioSubscription, SdkError> {
    let token = CancellationToken::new();
    let task_token = token.clone();
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

    let task = tokio::spawn(async move {
        let mut stream = match characteristic.notify().await {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                stream
            }
            Err(e) => {
                let _ = ready_tx.send(Err(SdkError::from(e)));
                return;
            }
        };
        info!("Listening for audio bytes...");
        loop {
            tokio::select! {
                result = stream.next() => {
                    match result {
                        Some(Ok(chunk)) => {
                            debug!("Received audio chunk: {} bytes", chunk.len());
                            on_bytes(chunk);
                        }
                        Some(Err(e)) => {
                            error!("Error in audio stream: {e}");
                            break;
                        }
                        None => {
                            info!("Audio stream ended");
                            break;
                        }
                    }
                }
                _ = task_token.cancelled() => break,
            }
        }
    });

    match ready_rx.await {
        Ok(Ok(())) => Ok(AudioSubscription::with_task(token, task)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(SdkError::Other(
            "audio stream task exited before subscribing".to_string(),
        )),
    }
}
