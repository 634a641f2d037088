//! Async view over a [`Stream`](crate::stream::Stream).
//!
//! The application's error reporter runs in async code; a [`Listener`]
//! lets it `.next().await` failures instead of registering a callback.

use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::stream::{Stream, Subscription};

/// Receives every value pushed to a stream after it was created.
///
/// Values are queued until polled. Dropping the listener unsubscribes.
pub struct Listener<T> {
    receiver: UnboundedReceiverStream<T>,
    subscription: Subscription,
}

impl<T: Clone + Send + Sync + 'static> Listener<T> {
    pub(crate) fn attach(stream: &Stream<T>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = stream.subscribe(move |value: &T| {
            // Ignore send errors (listener dropped mid-push)
            let _ = sender.send(value.clone());
        });
        Self {
            receiver: UnboundedReceiverStream::new(receiver),
            subscription,
        }
    }

    /// Stop receiving. Already-queued values can still be polled.
    pub fn close(&self) {
        self.subscription.unsubscribe();
    }
}

impl<T> tokio_stream::Stream for Listener<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.subscription.is_active() {
            // Drain what was queued, then end.
            return match self.receiver.as_mut().try_recv() {
                Ok(value) => Poll::Ready(Some(value)),
                Err(_) => Poll::Ready(None),
            };
        }
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}
