use crate::model::graph::ObjectGraph;
use crate::model::object::ObjectId;
use crate::results::ObserverError;
use log::{debug, error};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::{Rc, Weak};

pub type SubscriptionId = u64;

/// Identities touched by one saved batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeNotification {
    pub inserted: BTreeSet<ObjectId>,
    pub deleted: BTreeSet<ObjectId>,
    pub updated: BTreeSet<ObjectId>,
}

impl ChangeNotification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty() && self.updated.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.deleted.len() + self.updated.len()
    }

    /// First identity that appears in more than one set.
    pub fn overlap(&self) -> Option<&ObjectId> {
        self.inserted
            .iter()
            .find(|id| self.deleted.contains(*id) || self.updated.contains(*id))
            .or_else(|| self.deleted.iter().find(|id| self.updated.contains(*id)))
    }
}

/// Receives saved change batches.
pub trait ChangeObserver {
    /// Called once per published batch, after the store write.
    ///
    /// Returning an error does not stop delivery to other observers.
    fn objects_did_change(
        &mut self,
        graph: &ObjectGraph,
        notification: &ChangeNotification,
    ) -> Result<(), ObserverError>;
}

#[derive(Debug)]
pub enum BusError {
    /// Observer was already borrowed when the batch arrived.
    Reentrant(SubscriptionId),
    /// Observer rejected the batch.
    Observer {
        subscription: SubscriptionId,
        source: ObserverError,
    },
}

impl BusError {
    pub fn is_integrity_violation(&self) -> bool {
        match self {
            Self::Reentrant(_) => false,
            Self::Observer { source, .. } => source.is_integrity_violation(),
        }
    }
}

impl Display for BusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reentrant(id) => write!(f, "observer #{id} is already handling a batch"),
            Self::Observer {
                subscription,
                source,
            } => write!(f, "observer #{subscription} failed: {source}"),
        }
    }
}

impl Error for BusError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Reentrant(_) => None,
            Self::Observer { source, .. } => Some(source),
        }
    }
}

struct Subscriber {
    id: SubscriptionId,
    observer: Weak<RefCell<dyn ChangeObserver>>,
}

/// Fan-out of change batches to weakly held observers.
///
/// Dropping the last `Rc` of an observer unsubscribes it.
#[derive(Default)]
pub struct NotificationBus {
    subscribers: Vec<Subscriber>,
    next_id: SubscriptionId,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<T: ChangeObserver + 'static>(
        &mut self,
        observer: &Rc<RefCell<T>>,
    ) -> SubscriptionId {
        self.next_id += 1;
        let id = self.next_id;
        let weak = Rc::downgrade(observer);
        let weak: Weak<RefCell<dyn ChangeObserver>> = weak;
        self.subscribers.push(Subscriber { id, observer: weak });
        id
    }

    /// Returns `false` when `id` is not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|subscriber| subscriber.id != id);
        self.subscribers.len() != before
    }

    /// Subscribers whose observer is still alive.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|subscriber| subscriber.observer.strong_count() > 0)
            .count()
    }

    /// Delivers `notification` to every live observer.
    ///
    /// Returns the number of observers that accepted the batch. Empty
    /// batches are not delivered.
    ///
    /// # Errors
    /// - First failure among all observers; the rest still receive the batch.
    pub fn publish(
        &mut self,
        graph: &ObjectGraph,
        notification: &ChangeNotification,
    ) -> Result<usize, BusError> {
        if notification.is_empty() {
            return Ok(0);
        }
        self.subscribers
            .retain(|subscriber| subscriber.observer.strong_count() > 0);

        let mut delivered = 0;
        let mut first_error = None;
        for subscriber in &self.subscribers {
            let Some(observer) = subscriber.observer.upgrade() else {
                continue;
            };
            let Ok(mut guard) = observer.try_borrow_mut() else {
                error!(
                    "event=notify_publish module=notify status=error subscription={} reason=reentrant",
                    subscriber.id
                );
                first_error.get_or_insert(BusError::Reentrant(subscriber.id));
                continue;
            };
            match guard.objects_did_change(graph, notification) {
                Ok(()) => delivered += 1,
                Err(source) => {
                    error!(
                        "event=notify_publish module=notify status=error subscription={} error={}",
                        subscriber.id, source
                    );
                    first_error.get_or_insert(BusError::Observer {
                        subscription: subscriber.id,
                        source,
                    });
                }
            }
        }

        debug!(
            "event=notify_publish module=notify status=ok inserted={} deleted={} updated={} delivered={}",
            notification.inserted.len(),
            notification.deleted.len(),
            notification.updated.len(),
            delivered
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(delivered),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BusError, ChangeNotification, ChangeObserver, NotificationBus};
    use crate::model::graph::ObjectGraph;
    use crate::model::object::ObjectId;
    use crate::model::schema::{EntityDescriptor, Schema};
    use crate::results::ObserverError;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    #[derive(Default)]
    struct Counter {
        batches: usize,
        fail_with: Option<ObjectId>,
    }

    impl ChangeObserver for Counter {
        fn objects_did_change(
            &mut self,
            _graph: &ObjectGraph,
            _notification: &ChangeNotification,
        ) -> Result<(), ObserverError> {
            self.batches += 1;
            match &self.fail_with {
                Some(id) => Err(ObserverError::MissingObject(id.clone())),
                None => Ok(()),
            }
        }
    }

    fn graph() -> ObjectGraph {
        let schema = Schema::new(vec![EntityDescriptor::new("Book").attribute("title")]).unwrap();
        ObjectGraph::new(Arc::new(schema))
    }

    fn batch() -> ChangeNotification {
        let mut notification = ChangeNotification::new();
        notification.inserted.insert(ObjectId::new("Book", 1));
        notification
    }

    #[test]
    fn publish_reaches_every_live_observer() {
        let mut bus = NotificationBus::new();
        let first = Rc::new(RefCell::new(Counter::default()));
        let second = Rc::new(RefCell::new(Counter::default()));
        bus.subscribe(&first);
        bus.subscribe(&second);

        assert_eq!(bus.publish(&graph(), &batch()).unwrap(), 2);
        assert_eq!(first.borrow().batches, 1);
        assert_eq!(second.borrow().batches, 1);
    }

    #[test]
    fn dropped_observer_is_unsubscribed() {
        let mut bus = NotificationBus::new();
        let kept = Rc::new(RefCell::new(Counter::default()));
        bus.subscribe(&kept);
        {
            let dropped = Rc::new(RefCell::new(Counter::default()));
            bus.subscribe(&dropped);
            assert_eq!(bus.subscriber_count(), 2);
        }
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.publish(&graph(), &batch()).unwrap(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut bus = NotificationBus::new();
        let observer = Rc::new(RefCell::new(Counter::default()));
        let id = bus.subscribe(&observer);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.publish(&graph(), &batch()).unwrap(), 0);
        assert_eq!(observer.borrow().batches, 0);
    }

    #[test]
    fn empty_batch_is_not_delivered() {
        let mut bus = NotificationBus::new();
        let observer = Rc::new(RefCell::new(Counter::default()));
        bus.subscribe(&observer);
        assert_eq!(bus.publish(&graph(), &ChangeNotification::new()).unwrap(), 0);
        assert_eq!(observer.borrow().batches, 0);
    }

    #[test]
    fn failing_observer_does_not_starve_later_ones() {
        let mut bus = NotificationBus::new();
        let failing = Rc::new(RefCell::new(Counter {
            batches: 0,
            fail_with: Some(ObjectId::new("Book", 9)),
        }));
        let healthy = Rc::new(RefCell::new(Counter::default()));
        let failing_id = bus.subscribe(&failing);
        bus.subscribe(&healthy);

        let err = bus.publish(&graph(), &batch()).unwrap_err();
        assert!(matches!(err, BusError::Observer { subscription, .. } if subscription == failing_id));
        assert!(err.is_integrity_violation());
        assert_eq!(healthy.borrow().batches, 1);
    }

    #[test]
    fn borrowed_observer_is_reported_as_reentrant() {
        let mut bus = NotificationBus::new();
        let observer = Rc::new(RefCell::new(Counter::default()));
        let id = bus.subscribe(&observer);

        let _held = observer.borrow_mut();
        let err = bus.publish(&graph(), &batch()).unwrap_err();
        assert!(matches!(err, BusError::Reentrant(reported) if reported == id));
    }

    #[test]
    fn overlap_finds_shared_identity() {
        let mut notification = batch();
        assert!(notification.overlap().is_none());
        notification.updated.insert(ObjectId::new("Book", 1));
        assert_eq!(notification.overlap(), Some(&ObjectId::new("Book", 1)));
    }
}
