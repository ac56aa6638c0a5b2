//! Live container log subscription
//!
//! A pump task follows the engine's log stream, decodes it and forwards
//! [`LogEvent`]s until the source ends or the subscriber goes away.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::demux::{LogDemuxer, LogEvent};
use crate::engine::ContainerEngine;

/// Lines replayed before following when the caller gives no tail
pub const DEFAULT_FOLLOW_TAIL: usize = 200;

const EVENT_BUFFER: usize = 64;

/// Follow `container`, yielding `connected`, then `log` events, then exactly
/// one `end` or `error`. A container that is not running yields a single
/// `error`.
pub fn follow_events(
    engine: Arc<dyn ContainerEngine>,
    container: String,
    tail: usize,
) -> BoxStream<'static, LogEvent> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(pump(engine, container, tail, tx));

    futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((event, rx))
    })
    .boxed()
}

async fn pump(engine: Arc<dyn ContainerEngine>, container: String, tail: usize, tx: mpsc::Sender<LogEvent>) {
    match engine.inspect(&container).await {
        Ok(Some(state)) if state.running => {}
        Ok(Some(state)) => {
            let _ = tx
                .send(LogEvent::error(format!(
                    "Container {} is not running (status: {})",
                    container, state.status
                )))
                .await;
            return;
        }
        Ok(None) => {
            let _ = tx
                .send(LogEvent::error(format!("Container {} not found", container)))
                .await;
            return;
        }
        Err(e) => {
            let _ = tx.send(LogEvent::error(e.to_string())).await;
            return;
        }
    }

    if tx
        .send(LogEvent::Connected {
            container: container.clone(),
        })
        .await
        .is_err()
    {
        return;
    }

    let mut source = match engine.follow_logs(&container, tail).await {
        Ok(source) => source,
        Err(e) => {
            let _ = tx.send(LogEvent::error(e.to_string())).await;
            return;
        }
    };

    let mut demuxer = LogDemuxer::new();
    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!("Log subscriber for {} went away", container);
                return;
            }
            chunk = source.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for frame in demuxer.push(&bytes) {
                    if tx.send(LogEvent::log(frame.text)).await.is_err() {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!("Log stream of {} failed: {}", container, e);
                let _ = tx.send(LogEvent::error(e.to_string())).await;
                return;
            }
            None => {
                let _ = tx.send(LogEvent::end()).await;
                return;
            }
        }
    }
}
