//! Turn events for streamed answer generation.
//!
//! A streamed turn produces an ordered sequence of [`TurnEvent`]s on a
//! [`TurnStream`]: zero or more `Delta`s followed by exactly one terminal
//! event (`Completed` or `Failed`). The channel closes after the terminal
//! event, so `recv` returning `None` means the turn is over.

use std::time::Duration;

use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::models::ChatMessage;

/// One event in a streamed assistant turn.
///
/// Serialized with a `type` tag (`delta`, `completed`, `failed`) so the
/// variants map directly onto server-sent event payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// An incremental slice of the answer text, in arrival order.
    Delta { content: String },
    /// The persisted assistant message; always the final event on success.
    Completed { message: ChatMessage },
    /// Generation failed. `partial` carries the persisted partial answer
    /// when at least one delta had already arrived, `None` otherwise.
    Failed {
        error: String,
        partial: Option<ChatMessage>,
    },
}

impl TurnEvent {
    pub fn delta(content: impl Into<String>) -> Self {
        TurnEvent::Delta {
            content: content.into(),
        }
    }

    /// True for `Completed` and `Failed`, the two ways a turn ends.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Completed { .. } | TurnEvent::Failed { .. })
    }

    /// The delta text, if this is a `Delta` event.
    #[must_use]
    pub fn as_delta(&self) -> Option<&str> {
        match self {
            TurnEvent::Delta { content } => Some(content),
            _ => None,
        }
    }
}

/// Creates the channel pair for one streamed turn.
pub(crate) fn turn_channel() -> (flume::Sender<TurnEvent>, TurnStream) {
    let (tx, rx) = flume::unbounded();
    (tx, TurnStream { receiver: rx })
}

/// Consumer half of a streamed turn.
#[derive(Debug)]
pub struct TurnStream {
    receiver: flume::Receiver<TurnEvent>,
}

impl TurnStream {
    /// Waits for the next event. `None` once the producer is done and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<TurnEvent> {
        self.receiver.recv_async().await.ok()
    }

    /// Non-blocking poll for the next event.
    pub fn try_recv(&mut self) -> Result<TurnEvent, flume::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Waits for the next event with an upper bound. `None` on timeout or
    /// when the stream has ended.
    pub async fn next_timeout(&mut self, duration: Duration) -> Option<TurnEvent> {
        match timeout(duration, self.recv()).await {
            Ok(event) => event,
            Err(_) => None,
        }
    }

    /// Adapts the stream for `futures_util` combinators.
    pub fn into_async_stream(self) -> impl futures_util::stream::Stream<Item = TurnEvent> {
        stream::unfold(self, |mut turn| async move {
            turn.recv().await.map(|event| (event, turn))
        })
    }
}
