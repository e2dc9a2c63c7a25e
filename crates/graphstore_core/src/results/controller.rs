use crate::model::graph::ObjectGraph;
use crate::model::object::{ManagedObject, ObjectId};
use crate::notify::{ChangeNotification, ChangeObserver};
use crate::results::listener::{ChangeType, ResultSetListener};
use crate::results::section::{IndexPath, Section, DEFAULT_SECTION_NAME};
use crate::results::{ObserverError, ObserverResult, ResultWrapper};
use log::{debug, error, info};
use std::cmp::Ordering;

type Predicate = Box<dyn Fn(&ManagedObject) -> bool>;
type SortComparator<R> = Box<dyn Fn(&R, &R) -> Ordering>;
type SectionNameExtractor<R> = Box<dyn Fn(&R) -> String>;
type SectionNameComparator = Box<dyn Fn(&str, &str) -> Ordering>;

/// What a result set fetches and how it orders and groups the results.
pub struct FetchSpec<R> {
    entity: String,
    predicate: Option<Predicate>,
    sort: SortComparator<R>,
    section_name: Option<SectionNameExtractor<R>>,
    section_order: SectionNameComparator,
}

impl<R: ResultWrapper> FetchSpec<R> {
    pub fn new(entity: impl Into<String>, sort: impl Fn(&R, &R) -> Ordering + 'static) -> Self {
        Self {
            entity: entity.into(),
            predicate: None,
            sort: Box::new(sort),
            section_name: None,
            section_order: Box::new(|left: &str, right: &str| left.cmp(right)),
        }
    }

    pub fn with_predicate(mut self, predicate: impl Fn(&ManagedObject) -> bool + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn with_section_name(mut self, extractor: impl Fn(&R) -> String + 'static) -> Self {
        self.section_name = Some(Box::new(extractor));
        self
    }

    /// Replaces the default lexicographic ordering of section names.
    pub fn with_section_order(
        mut self,
        comparator: impl Fn(&str, &str) -> Ordering + 'static,
    ) -> Self {
        self.section_order = Box::new(comparator);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    fn matches(&self, object: &ManagedObject) -> bool {
        object.entity() == self.entity
            && self
                .predicate
                .as_ref()
                .map_or(true, |predicate| predicate(object))
    }

    fn compare(&self, left: &R, right: &R) -> Ordering {
        (self.sort)(left, right).then_with(|| left.object_id().cmp(right.object_id()))
    }

    fn section_name_for(&self, result: &R) -> String {
        match &self.section_name {
            Some(extractor) => extractor(result),
            None => DEFAULT_SECTION_NAME.to_string(),
        }
    }
}

/// Validated work for one batch; applying it cannot fail.
struct ChangePlan<R> {
    inserts: Vec<R>,
    deletes: Vec<ObjectId>,
    updates: Vec<R>,
}

impl<R> ChangePlan<R> {
    fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty() && self.updates.is_empty()
    }
}

/// Sectioned snapshot of one entity, kept current by change batches.
///
/// Batches that arrive before the first `perform_fetch` are ignored.
pub struct ResultSetController<R> {
    request: FetchSpec<R>,
    sections: Vec<Section<R>>,
    listener: Option<Box<dyn ResultSetListener>>,
    fetched: bool,
}

impl<R: ResultWrapper> ResultSetController<R> {
    pub fn new(request: FetchSpec<R>) -> Self {
        Self {
            request,
            sections: Vec::new(),
            listener: None,
            fetched: false,
        }
    }

    pub fn set_listener(&mut self, listener: impl ResultSetListener + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    pub fn fetch_spec(&self) -> &FetchSpec<R> {
        &self.request
    }

    pub fn sections(&self) -> &[Section<R>] {
        &self.sections
    }

    pub fn object_count(&self) -> usize {
        self.sections.iter().map(Section::len).sum()
    }

    pub fn object_at(&self, path: IndexPath) -> Option<&R> {
        self.sections
            .get(path.section)
            .and_then(|section| section.objects.get(path.row))
    }

    pub fn index_path_of(&self, id: &ObjectId) -> Option<IndexPath> {
        self.sections
            .iter()
            .enumerate()
            .find_map(|(section_index, section)| {
                section
                    .objects
                    .iter()
                    .position(|result| result.object_id() == id)
                    .map(|row| IndexPath::new(section_index, row))
            })
    }

    /// Replaces the snapshot with the current contents of `graph`.
    ///
    /// # Errors
    /// - `Fetch` when the entity is not in the graph's schema.
    /// - `Wrap` when a matching object cannot be wrapped.
    pub fn perform_fetch(&mut self, graph: &ObjectGraph) -> ObserverResult<()> {
        if graph.schema().entity(&self.request.entity).is_none() {
            return Err(ObserverError::Fetch(format!(
                "entity `{}` is not in the schema",
                self.request.entity
            )));
        }

        let mut results = Vec::new();
        for object in graph.objects_of(&self.request.entity) {
            if self.request.matches(object) {
                results.push(R::from_persisted_object(object)?);
            }
        }
        results.sort_by(|left, right| self.request.compare(left, right));

        let mut sections: Vec<Section<R>> = Vec::new();
        for result in results {
            let name = self.request.section_name_for(&result);
            match sections.iter_mut().find(|section| section.name == name) {
                Some(section) => section.objects.push(result),
                None => sections.push(Section::new(name, vec![result])),
            }
        }

        self.sections = sections;
        self.fetched = true;
        info!(
            "event=result_fetch module=results status=ok entity={} sections={} objects={}",
            self.request.entity,
            self.sections.len(),
            self.object_count()
        );
        Ok(())
    }

    /// Applies one saved batch and reports the resulting events.
    ///
    /// # Errors
    /// - `MissingObject`, `DuplicateObject`, `OverlappingChange` when the
    ///   batch contradicts the snapshot. Nothing is changed or emitted.
    pub fn apply_changes(
        &mut self,
        graph: &ObjectGraph,
        notification: &ChangeNotification,
    ) -> ObserverResult<()> {
        if !self.fetched {
            return Ok(());
        }
        let plan = match self.plan(graph, notification) {
            Ok(plan) => plan,
            Err(err) => {
                error!(
                    "event=result_update module=results status=error entity={} error={}",
                    self.request.entity, err
                );
                return Err(err);
            }
        };
        if plan.is_empty() {
            return Ok(());
        }

        debug!(
            "event=result_update module=results status=start entity={} inserts={} deletes={} updates={}",
            self.request.entity,
            plan.inserts.len(),
            plan.deletes.len(),
            plan.updates.len()
        );
        self.emit(|listener| listener.will_change_content());
        for result in plan.inserts {
            self.insert_result(result);
        }
        for id in &plan.deletes {
            self.delete_result(id);
        }
        for result in plan.updates {
            self.update_result(result);
        }
        self.emit(|listener| listener.did_change_content());
        Ok(())
    }

    fn plan(
        &self,
        graph: &ObjectGraph,
        notification: &ChangeNotification,
    ) -> ObserverResult<ChangePlan<R>> {
        if let Some(id) = notification.overlap() {
            return Err(ObserverError::OverlappingChange(id.clone()));
        }
        let relevant = |id: &&ObjectId| id.entity() == self.request.entity;
        let filtered = self.request.predicate.is_some();

        let mut inserts = Vec::new();
        for id in notification.inserted.iter().filter(relevant) {
            if self.index_path_of(id).is_some() {
                return Err(ObserverError::DuplicateObject(id.clone()));
            }
            let object = graph
                .object(id)
                .ok_or_else(|| ObserverError::MissingObject(id.clone()))?;
            if self.request.matches(object) {
                inserts.push(R::from_persisted_object(object)?);
            }
        }

        let mut deletes = Vec::new();
        for id in notification.deleted.iter().filter(relevant) {
            if self.index_path_of(id).is_some() {
                deletes.push(id.clone());
            } else if !filtered {
                return Err(ObserverError::MissingObject(id.clone()));
            }
        }

        let mut updates = Vec::new();
        for id in notification.updated.iter().filter(relevant) {
            let object = graph
                .object(id)
                .ok_or_else(|| ObserverError::MissingObject(id.clone()))?;
            if self.index_path_of(id).is_some() {
                updates.push(R::from_persisted_object(object)?);
            } else if !filtered || self.request.matches(object) {
                return Err(ObserverError::MissingObject(id.clone()));
            }
        }

        Ok(ChangePlan {
            inserts,
            deletes,
            updates,
        })
    }

    fn insert_result(&mut self, result: R) {
        let name = self.request.section_name_for(&result);
        let section_index = match self
            .sections
            .iter()
            .position(|section| section.name == name)
        {
            Some(index) => index,
            None => {
                let index = self
                    .sections
                    .iter()
                    .position(|section| {
                        (self.request.section_order)(&section.name, &name) == Ordering::Greater
                    })
                    .unwrap_or(self.sections.len());
                self.sections.insert(index, Section::new(name, Vec::new()));
                self.emit(|listener| listener.did_change_section(index, ChangeType::Insert));
                index
            }
        };

        let objects = &mut self.sections[section_index].objects;
        let row = objects
            .iter()
            .position(|existing| self.request.compare(existing, &result) == Ordering::Greater)
            .unwrap_or(objects.len());
        objects.insert(row, result);

        let path = IndexPath::new(section_index, row);
        self.emit(|listener| listener.did_change_object(None, ChangeType::Insert, Some(path)));
    }

    fn delete_result(&mut self, id: &ObjectId) {
        let Some(path) = self.index_path_of(id) else {
            return;
        };
        self.sections[path.section].objects.remove(path.row);
        self.emit(|listener| listener.did_change_object(Some(path), ChangeType::Delete, None));

        if self.sections[path.section].is_empty() {
            self.sections.remove(path.section);
            self.emit(|listener| listener.did_change_section(path.section, ChangeType::Delete));
        }
    }

    fn update_result(&mut self, result: R) {
        let Some(path) = self.index_path_of(result.object_id()) else {
            return;
        };
        self.sections[path.section].objects[path.row] = result;
        self.emit(|listener| listener.did_change_object(Some(path), ChangeType::Update, None));
    }

    fn emit(&mut self, event: impl FnOnce(&mut dyn ResultSetListener)) {
        if let Some(listener) = self.listener.as_deref_mut() {
            event(listener);
        }
    }
}

impl<R: ResultWrapper> ChangeObserver for ResultSetController<R> {
    fn objects_did_change(
        &mut self,
        graph: &ObjectGraph,
        notification: &ChangeNotification,
    ) -> Result<(), ObserverError> {
        self.apply_changes(graph, notification)
    }
}
