//! Multicast result stream.
//!
//! # Guarantees
//!
//! - **Broadcast, not queued**: every live subscriber sees the same ordered
//!   sequence from the moment it subscribed
//! - **No history**: values published before a subscription are not
//!   delivered to it (the only exception is the explicit eager replay done by
//!   `Operation::subscribe`)
//! - **Non-blocking publish**: each subscriber has its own unbounded channel
//! - **Close once**: closing drops every sender, so subscribers observe the
//!   end of the stream; closing again is a no-op

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::result::ResultValue;

/// Explicit subscriber list behind an operation's results.
#[derive(Debug, Default)]
pub(crate) struct ResultStream {
    subscribers: Vec<mpsc::UnboundedSender<ResultValue>>,
    closed: bool,
}

impl ResultStream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attach a subscriber, optionally seeding its channel with `replay`.
    ///
    /// On a closed stream the subscription ends immediately.
    pub(crate) fn subscribe(&mut self, replay: Option<ResultValue>) -> ResultSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        if !self.closed {
            if let Some(value) = replay {
                let _ = sender.send(value);
            }
            self.subscribers.push(sender);
        }
        ResultSubscription { receiver }
    }

    /// Send `value` to every live subscriber. Returns how many received it.
    pub(crate) fn publish(&mut self, value: &ResultValue) -> usize {
        if self.closed {
            return 0;
        }
        self.subscribers
            .retain(|sender| sender.send(value.clone()).is_ok());
        self.subscribers.len()
    }

    /// Returns `false` if the stream was already closed.
    pub(crate) fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.subscribers.clear();
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of subscribers that have not cancelled or been dropped.
    pub(crate) fn subscriber_count(&mut self) -> usize {
        self.subscribers.retain(|sender| !sender.is_closed());
        self.subscribers.len()
    }
}

/// A cancellable subscription to an operation's results.
///
/// Implements [`futures::Stream`]; the stream ends when the operation closes
/// or the subscription is cancelled and drained.
#[derive(Debug)]
pub struct ResultSubscription {
    receiver: mpsc::UnboundedReceiver<ResultValue>,
}

impl ResultSubscription {
    /// Wait for the next result. `None` once the stream has ended.
    pub async fn next_result(&mut self) -> Option<ResultValue> {
        self.receiver.recv().await
    }

    /// Take the next already-delivered result without waiting.
    pub fn try_next(&mut self) -> Option<ResultValue> {
        self.receiver.try_recv().ok()
    }

    /// Stop receiving new results. Values already delivered can still be
    /// drained.
    pub fn cancel(&mut self) {
        self.receiver.close();
    }
}

impl Stream for ResultSubscription {
    type Item = ResultValue;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
