//! The inbound event queue.
//!
//! Transports push events through an [`EventSender`]; the dispatch loop is
//! the single consumer holding the [`EventReceiver`].
//!
//! The queue has two lanes:
//!
//! - the **external** lane carries transport events in strict FIFO order and
//!   is optionally bounded, so a flooding transport blocks in
//!   [`EventSender::enqueue`] instead of growing memory;
//! - the **notify** lane is unbounded and carries notifications the runtime
//!   raises about itself (room membership changes made by plugin code). It is
//!   drained ahead of the external lane so a handler raising a notification
//!   never waits on the loop that is waiting on it.
//!
//! [`EventSender::shutdown`] cancels both ends at once: blocked producers and
//! the consumer wake up with [`QueueError::Closed`].
//!
//! # Example
//!
//! ```rust,ignore
//! let (tx, mut rx) = event_queue(Some(16));
//! tx.enqueue(Event::stop()).await?;
//! assert!(rx.dequeue().await?.is_stop());
//! ```

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{QueueError, QueueResult};
use crate::event::Event;

enum ExternalTx {
    Bounded(mpsc::Sender<Event>),
    Unbounded(mpsc::UnboundedSender<Event>),
}

impl Clone for ExternalTx {
    fn clone(&self) -> Self {
        match self {
            ExternalTx::Bounded(tx) => ExternalTx::Bounded(tx.clone()),
            ExternalTx::Unbounded(tx) => ExternalTx::Unbounded(tx.clone()),
        }
    }
}

enum ExternalRx {
    Bounded(mpsc::Receiver<Event>),
    Unbounded(mpsc::UnboundedReceiver<Event>),
}

impl ExternalRx {
    async fn recv(&mut self) -> Option<Event> {
        match self {
            ExternalRx::Bounded(rx) => rx.recv().await,
            ExternalRx::Unbounded(rx) => rx.recv().await,
        }
    }

    fn close(&mut self) {
        match self {
            ExternalRx::Bounded(rx) => rx.close(),
            ExternalRx::Unbounded(rx) => rx.close(),
        }
    }
}

/// Creates a queue. `None` (or `Some(0)`) means unbounded.
pub fn event_queue(capacity: Option<usize>) -> (EventSender, EventReceiver) {
    let (external_tx, external_rx) = match capacity.filter(|c| *c > 0) {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (ExternalTx::Bounded(tx), ExternalRx::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (ExternalTx::Unbounded(tx), ExternalRx::Unbounded(rx))
        }
    };
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();

    (
        EventSender {
            external: external_tx,
            notify: notify_tx,
            shutdown: shutdown.clone(),
        },
        EventReceiver {
            external: external_rx,
            notify: notify_rx,
            shutdown,
        },
    )
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct EventSender {
    external: ExternalTx,
    notify: mpsc::UnboundedSender<Event>,
    shutdown: CancellationToken,
}

impl EventSender {
    /// Appends an event to the tail, waiting while the queue is at capacity.
    pub async fn enqueue(&self, event: impl Into<Event>) -> QueueResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }
        let event = event.into();
        match &self.external {
            ExternalTx::Bounded(tx) => tokio::select! {
                sent = tx.send(event) => sent.map_err(|_| QueueError::Closed),
                _ = self.shutdown.cancelled() => Err(QueueError::Closed),
            },
            ExternalTx::Unbounded(tx) => tx.send(event).map_err(|_| QueueError::Closed),
        }
    }

    /// Appends an event without waiting; fails with [`QueueError::Full`] at capacity.
    pub fn try_enqueue(&self, event: impl Into<Event>) -> QueueResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }
        match &self.external {
            ExternalTx::Bounded(tx) => tx.try_send(event.into()).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full,
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            }),
            ExternalTx::Unbounded(tx) => tx.send(event.into()).map_err(|_| QueueError::Closed),
        }
    }

    /// Raises a runtime notification on the unbounded lane.
    pub fn notify(&self, event: impl Into<Event>) -> QueueResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }
        self.notify
            .send(event.into())
            .map_err(|_| QueueError::Closed)
    }

    /// Shuts the queue down for producers and the consumer alike.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        if self.shutdown.is_cancelled() {
            return true;
        }
        match &self.external {
            ExternalTx::Bounded(tx) => tx.is_closed(),
            ExternalTx::Unbounded(tx) => tx.is_closed(),
        }
    }
}

/// Consumer handle, owned by the dispatch loop.
pub struct EventReceiver {
    external: ExternalRx,
    notify: mpsc::UnboundedReceiver<Event>,
    shutdown: CancellationToken,
}

impl EventReceiver {
    /// Waits for the next event.
    ///
    /// Fails with [`QueueError::Closed`] once the queue is shut down, or once
    /// every producer is gone and nothing is left to read.
    pub async fn dequeue(&mut self) -> QueueResult<Event> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(QueueError::Closed),
            Some(event) = self.notify.recv() => Ok(event),
            event = self.external.recv() => event.ok_or(QueueError::Closed),
        }
    }

    /// Stops intake: producers fail from now on, the consumer sees `Closed`.
    pub fn close(&mut self) {
        self.shutdown.cancel();
        self.external.close();
        self.notify.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identifier;
    use crate::message::Message;
    use std::time::Duration;

    fn msg(body: &str) -> Event {
        Message::direct(body, Identifier::new("alice"), Identifier::new("bot")).into()
    }

    fn body(event: Event) -> String {
        match event {
            Event::Message(m) => m.body,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = event_queue(None);
        for i in 0..5 {
            tx.enqueue(msg(&i.to_string())).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(body(rx.dequeue().await.unwrap()), i.to_string());
        }
    }

    #[tokio::test]
    async fn test_bounded_enqueue_applies_backpressure() {
        let (tx, mut rx) = event_queue(Some(1));
        tx.enqueue(msg("first")).await.unwrap();
        assert_eq!(tx.try_enqueue(msg("x")), Err(QueueError::Full));

        let producer = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.enqueue(msg("second")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(body(rx.dequeue().await.unwrap()), "first");
        tokio_test::assert_ok!(producer.await.unwrap());
        assert_eq!(body(rx.dequeue().await.unwrap()), "second");
    }

    #[tokio::test]
    async fn test_dequeue_after_shutdown_is_closed() {
        let (tx, mut rx) = event_queue(Some(4));
        tx.enqueue(msg("pending")).await.unwrap();
        tx.shutdown();
        assert_eq!(rx.dequeue().await.unwrap_err(), QueueError::Closed);
        assert_eq!(tx.enqueue(msg("late")).await, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_shutdown_wakes_blocked_producer() {
        let (tx, _rx) = event_queue(Some(1));
        tx.enqueue(msg("fill")).await.unwrap();
        let blocked = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.enqueue(msg("blocked")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.shutdown();
        tokio_test::assert_err!(blocked.await.unwrap());
    }

    #[tokio::test]
    async fn test_notify_lane_is_drained_first() {
        let (tx, mut rx) = event_queue(None);
        tx.enqueue(msg("external")).await.unwrap();
        tx.notify(Event::stop()).unwrap();
        assert!(rx.dequeue().await.unwrap().is_stop());
        assert_eq!(body(rx.dequeue().await.unwrap()), "external");
    }

    #[tokio::test]
    async fn test_dropping_producers_closes() {
        let (tx, mut rx) = event_queue(None);
        drop(tx);
        assert_eq!(rx.dequeue().await.unwrap_err(), QueueError::Closed);
    }
}
