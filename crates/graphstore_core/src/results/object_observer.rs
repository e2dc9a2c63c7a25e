use crate::model::graph::ObjectGraph;
use crate::model::object::ObjectId;
use crate::notify::{ChangeNotification, ChangeObserver};
use crate::results::{ObserverError, ResultWrapper};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

type ObjectCallback<R> = Box<dyn FnMut(&R)>;
type BatchHook = Box<dyn FnMut(&BTreeSet<ObjectId>)>;

/// Per-object callbacks driven by saved change batches.
///
/// Every update to an observed identity re-wraps the live object and hands
/// it to that identity's callbacks in registration order. Callbacks of a
/// deleted identity are dropped with it.
pub struct ObjectObserver<R: ResultWrapper> {
    callbacks: BTreeMap<ObjectId, Vec<ObjectCallback<R>>>,
    did_insert: Option<BatchHook>,
    did_delete: Option<BatchHook>,
    did_update: Option<BatchHook>,
}

impl<R: ResultWrapper> Default for ObjectObserver<R> {
    fn default() -> Self {
        Self {
            callbacks: BTreeMap::new(),
            did_insert: None,
            did_delete: None,
            did_update: None,
        }
    }
}

impl<R: ResultWrapper> ObjectObserver<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, id: &ObjectId, callback: impl FnMut(&R) + 'static) {
        self.callbacks
            .entry(id.clone())
            .or_default()
            .push(Box::new(callback));
    }

    /// Drops every callback of `id`, returning how many were registered.
    pub fn forget(&mut self, id: &ObjectId) -> usize {
        self.callbacks.remove(id).map_or(0, |callbacks| callbacks.len())
    }

    pub fn is_observing(&self, id: &ObjectId) -> bool {
        self.callbacks.contains_key(id)
    }

    /// Runs once per batch that inserted at least one object.
    pub fn on_insert(&mut self, hook: impl FnMut(&BTreeSet<ObjectId>) + 'static) {
        self.did_insert = Some(Box::new(hook));
    }

    /// Runs once per batch that deleted at least one object.
    pub fn on_delete(&mut self, hook: impl FnMut(&BTreeSet<ObjectId>) + 'static) {
        self.did_delete = Some(Box::new(hook));
    }

    /// Runs once per batch that updated at least one object.
    pub fn on_update(&mut self, hook: impl FnMut(&BTreeSet<ObjectId>) + 'static) {
        self.did_update = Some(Box::new(hook));
    }
}

impl<R: ResultWrapper> ChangeObserver for ObjectObserver<R> {
    /// # Errors
    /// - `MissingObject` when an observed, updated identity is not live.
    /// - `Wrap` when the live object cannot be wrapped.
    ///
    /// Failing identities are skipped; the others still get their callbacks.
    fn objects_did_change(
        &mut self,
        graph: &ObjectGraph,
        notification: &ChangeNotification,
    ) -> Result<(), ObserverError> {
        run_hook(&mut self.did_insert, &notification.inserted);
        run_hook(&mut self.did_delete, &notification.deleted);
        run_hook(&mut self.did_update, &notification.updated);
        for id in &notification.deleted {
            self.callbacks.remove(id);
        }

        let mut delivered = 0;
        let mut first_error = None;
        for id in &notification.updated {
            let Some(callbacks) = self.callbacks.get_mut(id) else {
                continue;
            };
            let wrapped = graph
                .object(id)
                .ok_or_else(|| ObserverError::MissingObject(id.clone()))
                .and_then(|object| R::from_persisted_object(object).map_err(ObserverError::from));
            match wrapped {
                Ok(wrapped) => {
                    for callback in callbacks.iter_mut() {
                        callback(&wrapped);
                    }
                    delivered += callbacks.len();
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        debug!(
            "event=object_observe module=results status={} observed={} delivered={}",
            if first_error.is_some() { "error" } else { "ok" },
            self.callbacks.len(),
            delivered
        );
        first_error.map_or(Ok(()), Err)
    }
}

fn run_hook(hook: &mut Option<BatchHook>, ids: &BTreeSet<ObjectId>) {
    if ids.is_empty() {
        return;
    }
    if let Some(hook) = hook {
        hook(ids);
    }
}

#[cfg(test)]
mod tests {
    use super::ObjectObserver;
    use crate::model::graph::ObjectGraph;
    use crate::model::object::{ManagedObject, ObjectId, PropertyValue, ResolvedProperties, Value};
    use crate::model::schema::{EntityDescriptor, Schema};
    use crate::notify::{ChangeNotification, ChangeObserver};
    use crate::results::{ObserverError, ResultWrapper, WrapperError};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Title {
        id: ObjectId,
        title: String,
    }

    impl ResultWrapper for Title {
        fn from_persisted_object(object: &ManagedObject) -> Result<Self, WrapperError> {
            let title = object
                .text("title")
                .ok_or_else(|| WrapperError::new(object.id(), "missing title"))?;
            Ok(Self {
                id: object.id().clone(),
                title: title.to_string(),
            })
        }

        fn object_id(&self) -> &ObjectId {
            &self.id
        }
    }

    fn graph(books: &[(u64, Option<&str>)]) -> ObjectGraph {
        let schema = Schema::new(vec![EntityDescriptor::new("Book").attribute("title")]).unwrap();
        let mut graph = ObjectGraph::new(Arc::new(schema));
        for (reference_id, title) in books {
            let mut properties = ResolvedProperties::new();
            let value = title.map(Value::from).unwrap_or_default();
            properties.insert("title".to_string(), PropertyValue::Attribute(value));
            graph.insert(ManagedObject::from_properties(
                ObjectId::new("Book", *reference_id),
                properties,
            ));
        }
        graph
    }

    fn updated(ids: &[u64]) -> ChangeNotification {
        let mut notification = ChangeNotification::new();
        notification
            .updated
            .extend(ids.iter().map(|id| ObjectId::new("Book", *id)));
        notification
    }

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl FnMut(&Title) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, move |row: &Title| sink.borrow_mut().push(row.title.clone()))
    }

    #[test]
    fn callbacks_fire_only_for_observed_updates() {
        let mut observer = ObjectObserver::<Title>::new();
        let (seen, callback) = recorder();
        observer.observe(&ObjectId::new("Book", 1), callback);

        let graph = graph(&[(1, Some("Dune")), (2, Some("Emma"))]);
        observer.objects_did_change(&graph, &updated(&[1, 2])).unwrap();
        observer.objects_did_change(&graph, &updated(&[2])).unwrap();
        assert_eq!(*seen.borrow(), vec!["Dune".to_string()]);
    }

    #[test]
    fn every_callback_of_an_identity_runs_in_order() {
        let mut observer = ObjectObserver::<Title>::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for label in ["first", "second"] {
            let order = Rc::clone(&order);
            observer.observe(&ObjectId::new("Book", 1), move |_: &Title| {
                order.borrow_mut().push(label)
            });
        }

        let graph = graph(&[(1, Some("Dune"))]);
        observer.objects_did_change(&graph, &updated(&[1])).unwrap();
        assert_eq!(*order.borrow(), vec!["first", "second"]);
        assert_eq!(observer.forget(&ObjectId::new("Book", 1)), 2);
        assert_eq!(observer.forget(&ObjectId::new("Book", 1)), 0);
    }

    #[test]
    fn unwrappable_object_fails_without_starving_others() {
        let mut observer = ObjectObserver::<Title>::new();
        let (broken, broken_callback) = recorder();
        let (healthy, healthy_callback) = recorder();
        observer.observe(&ObjectId::new("Book", 1), broken_callback);
        observer.observe(&ObjectId::new("Book", 2), healthy_callback);

        let graph = graph(&[(1, None), (2, Some("Emma"))]);
        let err = observer
            .objects_did_change(&graph, &updated(&[1, 2]))
            .unwrap_err();
        assert!(matches!(err, ObserverError::Wrap(_)));
        assert!(broken.borrow().is_empty());
        assert_eq!(*healthy.borrow(), vec!["Emma".to_string()]);
    }

    #[test]
    fn observed_identity_missing_from_graph_is_reported() {
        let mut observer = ObjectObserver::<Title>::new();
        let (_seen, callback) = recorder();
        observer.observe(&ObjectId::new("Book", 3), callback);

        let err = observer
            .objects_did_change(&graph(&[]), &updated(&[3]))
            .unwrap_err();
        assert_eq!(err, ObserverError::MissingObject(ObjectId::new("Book", 3)));
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn hooks_skip_empty_sets_and_deletes_drop_callbacks() {
        let mut observer = ObjectObserver::<Title>::new();
        let hooks = Rc::new(RefCell::new(Vec::new()));
        let inserts = Rc::clone(&hooks);
        observer.on_insert(move |ids| inserts.borrow_mut().push(("insert", ids.len())));
        let deletes = Rc::clone(&hooks);
        observer.on_delete(move |ids| deletes.borrow_mut().push(("delete", ids.len())));
        let (_seen, callback) = recorder();
        observer.observe(&ObjectId::new("Book", 1), callback);

        let mut notification = ChangeNotification::new();
        notification.deleted.insert(ObjectId::new("Book", 1));
        observer.objects_did_change(&graph(&[]), &notification).unwrap();

        assert_eq!(*hooks.borrow(), vec![("delete", 1)]);
        assert!(!observer.is_observing(&ObjectId::new("Book", 1)));
    }
}
