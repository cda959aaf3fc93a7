//! Listener sets for layered event delivery.
//!
//! Each subscriber owns an unbounded queue and sees every event emitted after
//! it subscribed, in emission order. Dropping a [`Subscription`] is as good
//! as calling [`EventBus::unsubscribe`]: dead queues are pruned on the next emit.

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct EventBus<E> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<E>)>,
}

pub struct Subscription<E> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> Subscription<E> {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push((id, tx));
        Subscription { id, rx }
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
        self.subscribers.len() != before
    }

    pub fn emit(&mut self, event: E) {
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Subscription<E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next event; `None` once the bus dropped this subscriber.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Everything queued so far.
    pub fn drain(&mut self) -> Vec<E> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
