// Observer registry for terminal events
// Observers attach and detach freely; events raised while nobody is attached are
// held and replayed in order to the next observer

use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub struct Observers<E> {
    next_id: u64,
    subscribers: HashMap<ObserverId, mpsc::UnboundedSender<E>>,
    backlog: VecDeque<E>,
    max_backlog: usize,
}

impl<E: Clone> Observers<E> {
    pub fn new(max_backlog: usize) -> Self {
        Self {
            next_id: 1,
            subscribers: HashMap::new(),
            backlog: VecDeque::new(),
            max_backlog: max_backlog.max(1),
        }
    }

    /// Attach a new observer; it first receives anything queued while detached
    pub fn subscribe(&mut self) -> (ObserverId, mpsc::UnboundedReceiver<E>) {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();

        if !self.backlog.is_empty() {
            debug!("Replaying {} queued events to observer {:?}", self.backlog.len(), id);
        }
        for event in self.backlog.drain(..) {
            // rx is alive in this scope, the send cannot fail
            let _ = tx.send(event);
        }
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn publish(&mut self, event: E) {
        // observers that dropped their receiver count as detached
        self.subscribers.retain(|id, tx| {
            let alive = !tx.is_closed();
            if !alive {
                debug!("Removing closed observer {:?}", id);
            }
            alive
        });

        if self.subscribers.is_empty() {
            if self.backlog.len() >= self.max_backlog {
                warn!("Observer backlog full ({}), dropping oldest event", self.max_backlog);
                self.backlog.pop_front();
            }
            self.backlog.push_back(event);
            return;
        }

        for tx in self.subscribers.values() {
            let _ = tx.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Ok(v) = rx.try_recv() {
            out.push(v);
        }
        out
    }

    #[test]
    fn test_fan_out_to_all_observers() {
        let mut observers = Observers::new(8);
        let (_a, mut rx_a) = observers.subscribe();
        let (b, mut rx_b) = observers.subscribe();

        observers.publish(1);
        assert!(observers.unsubscribe(b));
        assert!(!observers.unsubscribe(b));
        observers.publish(2);

        assert_eq!(drain(&mut rx_a), vec![1, 2]);
        assert_eq!(drain(&mut rx_b), vec![1]);
    }

    #[test]
    fn test_backlog_replayed_on_attach() {
        let mut observers = Observers::new(8);
        observers.publish(1);
        observers.publish(2);
        assert_eq!(observers.backlog_len(), 2);

        let (_id, mut rx) = observers.subscribe();
        observers.publish(3);
        assert_eq!(drain(&mut rx), vec![1, 2, 3]);
        assert_eq!(observers.backlog_len(), 0);
    }

    #[test]
    fn test_dropped_receiver_counts_as_detached() {
        let mut observers = Observers::new(2);
        let (_id, rx) = observers.subscribe();
        drop(rx);

        observers.publish(1);
        observers.publish(2);
        observers.publish(3);
        assert!(observers.is_empty());
        assert_eq!(observers.backlog_len(), 2);

        let (_id, mut rx) = observers.subscribe();
        assert_eq!(drain(&mut rx), vec![2, 3]);
    }
}
