//! Hands session events from the transport's worker context to the consumer.
//!
//! The session publishes while holding its lock, so publishing never blocks. The consumer drains
//! the [`EventReceiver`] on whatever task or thread it owns, either as a `Stream` or by polling
//! [`EventReceiver::try_next_event`].

use std::pin::Pin;
use std::task::{Context, Poll};
use futures::Stream;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::debug;

use crate::device::types::SessionEvent;

#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: UnboundedSender<SessionEvent>,
}

impl EventDispatcher {
    /// Creates a dispatcher and the single receiver that consumes its events in FIFO order.
    pub fn channel() -> (EventDispatcher, EventReceiver) {
        let (sender, receiver) = unbounded::<SessionEvent>();
        (EventDispatcher { sender }, EventReceiver { receiver })
    }

    pub fn publish(&self, event: SessionEvent) {
        if let Err(err) = self.sender.unbounded_send(event) {
            debug!("Dropping session event, the consumer is gone: {:?}", err.into_inner());
        }
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    receiver: UnboundedReceiver<SessionEvent>,
}

impl EventReceiver {
    /// Returns the next queued event without waiting, `None` if nothing is queued.
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        match self.receiver.try_next() {
            Ok(Some(event)) => Some(event),
            // closed or empty
            _ => None,
        }
    }

    /// Drains everything queued right now.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.try_next_event()).collect()
    }
}

impl Stream for EventReceiver {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use crate::error::ErrorKind;

    #[test]
    fn delivers_in_publish_order() {
        let (dispatcher, mut receiver) = EventDispatcher::channel();
        dispatcher.publish(SessionEvent::Connected);
        dispatcher.publish(SessionEvent::NotificationsEnabled(true));
        dispatcher.publish(SessionEvent::Disconnected);

        assert_eq!(receiver.drain(), vec![
            SessionEvent::Connected,
            SessionEvent::NotificationsEnabled(true),
            SessionEvent::Disconnected,
        ]);
        assert_eq!(receiver.try_next_event(), None);
    }

    #[test]
    fn publishing_without_a_consumer_is_harmless() {
        let (dispatcher, receiver) = EventDispatcher::channel();
        drop(receiver);
        dispatcher.publish(SessionEvent::Disconnected);
    }

    #[tokio::test]
    async fn crosses_into_another_task() {
        let (dispatcher, receiver) = EventDispatcher::channel();

        let producer = std::thread::spawn(move || {
            dispatcher.publish(SessionEvent::Connected);
            dispatcher.publish(SessionEvent::TransportError(ErrorKind::MalformedPayload));
        });
        producer.join().unwrap();

        // the dispatcher was moved into the thread and dropped there, so the stream ends
        let events: Vec<SessionEvent> = receiver.collect().await;
        assert_eq!(events, vec![
            SessionEvent::Connected,
            SessionEvent::TransportError(ErrorKind::MalformedPayload),
        ]);
    }
}
