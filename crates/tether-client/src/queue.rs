//! Outbound queue and the per-send delivery future.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::errors::ClientError;

struct Pending {
    text: String,
    ack: oneshot::Sender<()>,
}

/// Strict FIFO of encoded envelopes waiting for an open transport.
#[derive(Default)]
pub struct OutboundQueue {
    items: VecDeque<Pending>,
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text`. The returned delivery resolves when it is flushed.
    pub fn push(&mut self, text: String) -> Delivery {
        let (ack, rx) = oneshot::channel();
        self.items.push_back(Pending { text, ack });
        Delivery::pending(rx)
    }

    /// Hand queued envelopes to `send` in order.
    ///
    /// `send` returns the text back on failure; flushing stops there and
    /// the failed envelope stays at the head. Returns the number flushed.
    pub fn flush<F>(&mut self, mut send: F) -> usize
    where
        F: FnMut(String) -> Result<(), String>,
    {
        let mut flushed = 0;
        while let Some(Pending { text, ack }) = self.items.pop_front() {
            match send(text) {
                Ok(()) => {
                    let _ = ack.send(());
                    flushed += 1;
                }
                Err(text) => {
                    self.items.push_front(Pending { text, ack });
                    break;
                }
            }
        }
        flushed
    }

    /// Drop everything. Pending deliveries resolve to [`ClientError::Closed`].
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }

    /// Number of queued envelopes.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Resolves once an envelope has been handed to the transport.
///
/// Never fails because the envelope had to wait in the queue; fails with
/// [`ClientError::Closed`] if the client closed first.
#[must_use = "dropping a Delivery does not cancel the send; await it or bind it to `_`"]
pub struct Delivery {
    state: DeliveryState,
}

enum DeliveryState {
    Done(Option<Result<(), ClientError>>),
    Pending(oneshot::Receiver<()>),
}

impl Delivery {
    /// Already handed over.
    pub fn sent() -> Self {
        Self {
            state: DeliveryState::Done(Some(Ok(()))),
        }
    }

    /// Failed before reaching the queue.
    pub fn failed(err: ClientError) -> Self {
        Self {
            state: DeliveryState::Done(Some(Err(err))),
        }
    }

    fn pending(rx: oneshot::Receiver<()>) -> Self {
        Self {
            state: DeliveryState::Pending(rx),
        }
    }
}

impl Future for Delivery {
    type Output = Result<(), ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            DeliveryState::Done(result) => {
                Poll::Ready(result.take().unwrap_or(Err(ClientError::Closed)))
            }
            DeliveryState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|ack| ack.map_err(|_| ClientError::Closed)),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            DeliveryState::Done(_) => "done",
            DeliveryState::Pending(_) => "pending",
        };
        f.debug_struct("Delivery").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn flush_preserves_order_and_resolves() {
        let mut queue = OutboundQueue::new();
        let d1 = queue.push("one".into());
        let d2 = queue.push("two".into());
        let d3 = queue.push("three".into());
        assert_eq!(queue.len(), 3);

        let mut wire = Vec::new();
        assert_eq!(
            queue.flush(|text| {
                wire.push(text);
                Ok(())
            }),
            3
        );
        assert_eq!(wire, vec!["one", "two", "three"]);
        assert!(queue.is_empty());
        d1.await.unwrap();
        d2.await.unwrap();
        d3.await.unwrap();
    }

    #[tokio::test]
    async fn failed_send_keeps_head() {
        let mut queue = OutboundQueue::new();
        let first = queue.push("a".into());
        let _second = queue.push("b".into());

        let mut calls = 0;
        let flushed = queue.flush(|text| {
            calls += 1;
            if calls == 1 { Ok(()) } else { Err(text) }
        });
        assert_eq!(flushed, 1);
        assert_eq!(queue.len(), 1);
        first.await.unwrap();

        let mut wire = Vec::new();
        let _ = queue.flush(|text| {
            wire.push(text);
            Ok(())
        });
        assert_eq!(wire, vec!["b"]);
    }

    #[tokio::test]
    async fn clear_rejects_pending() {
        let mut queue = OutboundQueue::new();
        let delivery = queue.push("lost".into());
        assert_eq!(queue.clear(), 1);
        assert_matches!(delivery.await, Err(ClientError::Closed));
    }

    #[tokio::test]
    async fn ready_variants() {
        Delivery::sent().await.unwrap();
        assert_matches!(
            Delivery::failed(ClientError::Closed).await,
            Err(ClientError::Closed)
        );
    }

    #[test]
    fn debug_shows_state() {
        let mut queue = OutboundQueue::new();
        let d = queue.push("x".into());
        assert!(format!("{d:?}").contains("pending"));
        assert!(format!("{:?}", Delivery::sent()).contains("done"));
    }
}
