//! The single write path of a `/ws` session.
//!
//! Push tasks and command replies share one [`Outbound`]; the async mutex
//! makes every frame a whole, uninterrupted write.

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

pub type BoxSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("couldn't serialize payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("couldn't send message to client: {0}")]
    Send(#[from] axum::Error),
}

#[derive(Clone)]
pub struct Outbound {
    sink: Arc<Mutex<BoxSink>>,
}

impl Outbound {
    pub fn new<S>(sink: S) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Self {
            sink: Arc::new(Mutex::new(Box::pin(sink))),
        }
    }

    /// Serializes first, so an encode failure never touches the socket.
    pub async fn send_json<T: Serialize>(&self, payload: &T) -> Result<(), OutboundError> {
        let text = serde_json::to_string(payload)?;
        self.sink.lock().await.send(Message::Text(text)).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), OutboundError> {
        self.sink.lock().await.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::StreamExt;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn concurrent_senders_never_interleave() {
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        let out = Outbound::new(tx.sink_map_err(axum::Error::new));

        let mut tasks = Vec::new();
        for id in 0..4u32 {
            let out = out.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..25u32 {
                    out.send_json(&(id, n)).await.unwrap();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        drop(out);

        let mut last: BTreeMap<u32, u32> = BTreeMap::new();
        let mut count = 0;
        while let Some(Message::Text(text)) = rx.next().await {
            let (id, n): (u32, u32) = serde_json::from_str(&text).unwrap();
            if let Some(prev) = last.insert(id, n) {
                assert!(n > prev, "frames from one sender arrived out of order");
            }
            count += 1;
        }
        assert_eq!(count, 100);
    }

    #[tokio::test]
    async fn send_after_close_reports_error() {
        let (tx, rx) = mpsc::unbounded::<Message>();
        drop(rx);
        let out = Outbound::new(tx.sink_map_err(axum::Error::new));
        assert!(matches!(
            out.send_json(&1).await,
            Err(OutboundError::Send(_))
        ));
    }
}
