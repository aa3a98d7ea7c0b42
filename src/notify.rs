use std::fmt;
use std::sync::mpsc::{self, Receiver};

use serde::Serialize;

use crate::model::TaskId;
use crate::tree::Mutation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Inserted,
    Moved,
    Removed,
    Edited,
    /// Tasks re-pointed after a category, priority or status was deleted.
    Reassigned,
}

impl From<&Mutation> for ChangeKind {
    fn from(m: &Mutation) -> Self {
        match m {
            Mutation::Insert { .. } => Self::Inserted,
            Mutation::Move { .. } => Self::Moved,
            Mutation::Remove { .. } => Self::Removed,
            Mutation::Edit { .. } => Self::Edited,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    /// Strictly increasing in commit order.
    pub sequence: u64,
    pub kind: ChangeKind,
    pub affected: Vec<TaskId>,
}

pub trait Observer {
    fn on_change(&mut self, event: &ChangeEvent);
}

impl<F> Observer for F
where
    F: FnMut(&ChangeEvent),
{
    fn on_change(&mut self, event: &ChangeEvent) {
        self(event)
    }
}

/// An observer that forwards every event into a channel.
pub fn channel() -> (impl Observer, Receiver<ChangeEvent>) {
    let (tx, rx) = mpsc::channel();
    let observer = move |event: &ChangeEvent| {
        // Ignore send errors (receiver dropped)
        let _ = tx.send(event.clone());
    };
    (observer, rx)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous fan-out of change events, in subscription order.
#[derive(Default)]
pub struct Notifier {
    observers: Vec<(SubscriptionId, Box<dyn Observer>)>,
    next_subscription: u64,
    sequence: u64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: impl Observer + 'static) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    pub fn last_sequence(&self) -> u64 {
        self.sequence
    }

    /// Stamp and deliver one event. Returns it for callers that also want
    /// to log or inspect it.
    pub fn publish(&mut self, kind: ChangeKind, affected: Vec<TaskId>) -> ChangeEvent {
        self.sequence += 1;
        let event = ChangeEvent {
            sequence: self.sequence,
            kind,
            affected,
        };
        for (_, observer) in &mut self.observers {
            observer.on_change(&event);
        }
        event
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("observers", &self.observers.len())
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn events_arrive_in_order_with_rising_sequence() {
        let mut notifier = Notifier::new();
        let (observer, rx) = channel();
        notifier.subscribe(observer);

        notifier.publish(ChangeKind::Inserted, vec![TaskId(1)]);
        notifier.publish(ChangeKind::Moved, vec![TaskId(2), TaskId(1)]);

        let got: Vec<ChangeEvent> = rx.try_iter().collect();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].sequence, 1);
        assert_eq!(got[0].kind, ChangeKind::Inserted);
        assert_eq!(got[1].sequence, 2);
        assert_eq!(got[1].affected, vec![TaskId(2), TaskId(1)]);
    }

    #[test]
    fn observers_are_called_in_subscription_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut notifier = Notifier::new();
        for name in ["first", "second"] {
            let log = Rc::clone(&log);
            notifier.subscribe(move |e: &ChangeEvent| log.borrow_mut().push((name, e.sequence)));
        }
        notifier.publish(ChangeKind::Edited, vec![TaskId(5)]);
        assert_eq!(*log.borrow(), vec![("first", 1), ("second", 1)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut notifier = Notifier::new();
        let (observer, rx) = channel();
        let id = notifier.subscribe(observer);
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.publish(ChangeKind::Removed, vec![TaskId(1)]);
        assert!(rx.try_recv().is_err());
        assert_eq!(notifier.last_sequence(), 1);
    }

    #[test]
    fn dropped_receiver_is_harmless() {
        let mut notifier = Notifier::new();
        let (observer, rx) = channel();
        notifier.subscribe(observer);
        drop(rx);
        notifier.publish(ChangeKind::Inserted, vec![TaskId(1)]);
    }
}
