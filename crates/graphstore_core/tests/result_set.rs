use graphstore_core::{
    AtomicStore, ChangeEvent, ChangeLog, ChangeNotification, ChangeType, ContextError,
    EntityDescriptor, FetchSpec, IndexPath, ManagedObject, ObjectContext, ObjectId, ObjectObserver,
    ObserverError, ResultSetController, ResultWrapper, Schema, StoreConfig, WrapperError,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
struct BookRow {
    id: ObjectId,
    title: String,
    author: String,
    year: i64,
}

impl ResultWrapper for BookRow {
    fn from_persisted_object(object: &ManagedObject) -> Result<Self, WrapperError> {
        let title = object
            .text("title")
            .ok_or_else(|| WrapperError::new(object.id(), "title is not set"))?;
        Ok(Self {
            id: object.id().clone(),
            title: title.to_string(),
            author: object.text("author").unwrap_or_default().to_string(),
            year: object.integer("year").unwrap_or_default(),
        })
    }

    fn object_id(&self) -> &ObjectId {
        &self.id
    }
}

type Controller = Rc<RefCell<ResultSetController<BookRow>>>;

fn context() -> (TempDir, ObjectContext) {
    let dir = tempfile::tempdir().unwrap();
    let schema = Schema::new(vec![
        EntityDescriptor::new("Book")
            .attribute("title")
            .attribute("author")
            .attribute("year"),
        EntityDescriptor::new("Reader").attribute("name"),
    ])
    .unwrap();
    let store = AtomicStore::new(
        Arc::new(schema),
        StoreConfig::new(dir.path().join("books.json")),
    )
    .unwrap();
    (dir, ObjectContext::new(store).unwrap())
}

fn by_author_then_title() -> FetchSpec<BookRow> {
    FetchSpec::new("Book", |left: &BookRow, right: &BookRow| {
        left.author
            .cmp(&right.author)
            .then_with(|| left.title.cmp(&right.title))
    })
    .with_section_name(|row: &BookRow| row.author.clone())
}

fn observe(
    context: &mut ObjectContext,
    request: FetchSpec<BookRow>,
) -> (Controller, Rc<RefCell<ChangeLog>>) {
    let log = Rc::new(RefCell::new(ChangeLog::new()));
    let controller = Rc::new(RefCell::new(ResultSetController::new(request)));
    controller.borrow_mut().set_listener(Rc::clone(&log));
    controller.borrow_mut().perform_fetch(context.graph()).unwrap();
    context.bus_mut().subscribe(&controller);
    (controller, log)
}

fn add_book(context: &mut ObjectContext, title: &str, author: &str) -> ObjectId {
    let id = context.insert_object("Book").unwrap();
    context.set_attribute(&id, "title", title).unwrap();
    context.set_attribute(&id, "author", author).unwrap();
    id
}

fn layout(controller: &Controller) -> Vec<(String, Vec<String>)> {
    controller
        .borrow()
        .sections()
        .iter()
        .map(|section| {
            (
                section.name().to_string(),
                section.objects().iter().map(|row| row.title.clone()).collect(),
            )
        })
        .collect()
}

fn assert_sections_consistent(controller: &Controller) {
    let controller = controller.borrow();
    let mut names = Vec::new();
    for section in controller.sections() {
        assert!(!section.is_empty(), "section `{}` is empty", section.name());
        assert!(!names.contains(&section.name()), "section `{}` repeats", section.name());
        names.push(section.name());
        for row in section.objects() {
            assert_eq!(row.author, section.name());
        }
        for pair in section.objects().windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            assert!((left.title.as_str(), &left.id) < (right.title.as_str(), &right.id));
        }
    }
}

fn object(path: IndexPath, change: ChangeType, old: bool) -> ChangeEvent {
    if old {
        ChangeEvent::Object {
            index_path: Some(path),
            change,
            new_index_path: None,
        }
    } else {
        ChangeEvent::Object {
            index_path: None,
            change,
            new_index_path: Some(path),
        }
    }
}

fn section(index: usize, change: ChangeType) -> ChangeEvent {
    ChangeEvent::Section { index, change }
}

#[test]
fn inserts_find_sorted_position_regardless_of_arrival_order() {
    let (_dir, mut context) = context();
    let (controller, log) = observe(&mut context, by_author_then_title());
    assert!(controller.borrow().sections().is_empty());

    add_book(&mut context, "Zebra", "A");
    context.save().unwrap();
    assert_eq!(
        log.borrow_mut().take(),
        vec![
            ChangeEvent::WillChange,
            section(0, ChangeType::Insert),
            object(IndexPath::new(0, 0), ChangeType::Insert, false),
            ChangeEvent::DidChange,
        ]
    );

    add_book(&mut context, "Apple", "A");
    context.save().unwrap();
    assert_eq!(
        log.borrow_mut().take(),
        vec![
            ChangeEvent::WillChange,
            object(IndexPath::new(0, 0), ChangeType::Insert, false),
            ChangeEvent::DidChange,
        ]
    );

    assert_eq!(
        layout(&controller),
        vec![("A".to_string(), vec!["Apple".to_string(), "Zebra".to_string()])]
    );
    assert_sections_consistent(&controller);
}

#[test]
fn inserts_in_one_batch_settle_in_sorted_order() {
    let (_dir, mut context) = context();
    let (controller, _log) = observe(&mut context, by_author_then_title());

    add_book(&mut context, "Zebra", "A");
    add_book(&mut context, "Apple", "A");
    let notification = context.save().unwrap();
    assert_eq!(notification.inserted.len(), 2);

    assert_eq!(
        layout(&controller),
        vec![("A".to_string(), vec!["Apple".to_string(), "Zebra".to_string()])]
    );
}

#[test]
fn deleting_last_object_removes_its_section() {
    let (_dir, mut context) = context();
    let only_in_a = add_book(&mut context, "Anathem", "A");
    add_book(&mut context, "Blindsight", "B");
    context.save().unwrap();

    let (controller, log) = observe(&mut context, by_author_then_title());
    assert_eq!(controller.borrow().sections().len(), 2);

    context.delete_object(&only_in_a).unwrap();
    context.save().unwrap();

    assert_eq!(
        log.borrow().events(),
        &[
            ChangeEvent::WillChange,
            object(IndexPath::new(0, 0), ChangeType::Delete, true),
            section(0, ChangeType::Delete),
            ChangeEvent::DidChange,
        ]
    );
    assert_eq!(
        layout(&controller),
        vec![("B".to_string(), vec!["Blindsight".to_string()])]
    );
}

#[test]
fn new_section_is_inserted_between_existing_names() {
    let (_dir, mut context) = context();
    add_book(&mut context, "Accelerando", "A");
    add_book(&mut context, "Consider Phlebas", "C");
    context.save().unwrap();
    let (controller, log) = observe(&mut context, by_author_then_title());

    add_book(&mut context, "Blood Music", "B");
    context.save().unwrap();

    assert_eq!(
        log.borrow().events(),
        &[
            ChangeEvent::WillChange,
            section(1, ChangeType::Insert),
            object(IndexPath::new(1, 0), ChangeType::Insert, false),
            ChangeEvent::DidChange,
        ]
    );
    let names: Vec<String> = layout(&controller).into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["A", "B", "C"]);
    assert_sections_consistent(&controller);
}

#[test]
fn custom_section_order_places_new_sections() {
    let (_dir, mut context) = context();
    add_book(&mut context, "Children of Time", "C");
    add_book(&mut context, "Ancillary Justice", "A");
    context.save().unwrap();

    let request = FetchSpec::new("Book", |left: &BookRow, right: &BookRow| {
        right.author.cmp(&left.author).then_with(|| left.title.cmp(&right.title))
    })
    .with_section_name(|row: &BookRow| row.author.clone())
    .with_section_order(|left, right| right.cmp(left));
    let (controller, _log) = observe(&mut context, request);

    add_book(&mut context, "Beggars in Spain", "B");
    context.save().unwrap();
    let names: Vec<String> = layout(&controller).into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["C", "B", "A"]);
}

#[test]
fn mixed_batch_runs_inserts_then_deletes_then_updates() {
    let (_dir, mut context) = context();
    let doomed = add_book(&mut context, "Hyperion", "S");
    let renamed = add_book(&mut context, "Ilium", "S");
    context.save().unwrap();
    let (controller, log) = observe(&mut context, by_author_then_title());

    add_book(&mut context, "Endymion", "S");
    context.delete_object(&doomed).unwrap();
    context.set_attribute(&renamed, "year", 2003).unwrap();
    let notification = context.save().unwrap();
    assert_eq!(notification.updated.len(), 1);

    // Each path reflects the steps already applied in the same batch.
    assert_eq!(
        log.borrow().events(),
        &[
            ChangeEvent::WillChange,
            object(IndexPath::new(0, 0), ChangeType::Insert, false),
            object(IndexPath::new(0, 1), ChangeType::Delete, true),
            object(IndexPath::new(0, 1), ChangeType::Update, true),
            ChangeEvent::DidChange,
        ]
    );
    let controller = controller.borrow();
    let ilium = controller.index_path_of(&renamed).unwrap();
    assert_eq!(controller.object_at(ilium).unwrap().year, 2003);
}

#[test]
fn update_for_object_outside_result_set_is_fatal() {
    let (_dir, mut context) = context();
    let log = Rc::new(RefCell::new(ChangeLog::new()));
    let controller = Rc::new(RefCell::new(ResultSetController::new(by_author_then_title())));
    controller.borrow_mut().set_listener(Rc::clone(&log));
    controller.borrow_mut().perform_fetch(context.graph()).unwrap();

    // Saved while nobody listens, so the snapshot never learns about it.
    let unseen = add_book(&mut context, "Neuromancer", "G");
    context.save().unwrap();
    context.bus_mut().subscribe(&controller);

    context.set_attribute(&unseen, "year", 1984).unwrap();
    let err = context.save().unwrap_err();
    assert!(err.is_integrity_violation());
    assert!(matches!(err, ContextError::Bus(_)));
    assert!(log.borrow().events().is_empty());
    assert!(controller.borrow().sections().is_empty());
}

#[test]
fn update_for_unknown_identity_is_fatal_when_applied_directly() {
    let (_dir, mut context) = context();
    add_book(&mut context, "Dune", "H");
    context.save().unwrap();
    let mut controller = ResultSetController::new(by_author_then_title());
    controller.perform_fetch(context.graph()).unwrap();

    let ghost = ObjectId::new("Book", 42);
    let mut notification = ChangeNotification::new();
    notification.updated.insert(ghost.clone());
    assert_eq!(
        controller.apply_changes(context.graph(), &notification),
        Err(ObserverError::MissingObject(ghost.clone()))
    );

    let mut notification = ChangeNotification::new();
    notification.deleted.insert(ghost.clone());
    assert_eq!(
        controller.apply_changes(context.graph(), &notification),
        Err(ObserverError::MissingObject(ghost))
    );
}

#[test]
fn duplicate_insert_is_rejected() {
    let (_dir, mut context) = context();
    let dune = add_book(&mut context, "Dune", "H");
    context.save().unwrap();
    let mut controller = ResultSetController::new(by_author_then_title());
    controller.perform_fetch(context.graph()).unwrap();

    let mut notification = ChangeNotification::new();
    notification.inserted.insert(dune.clone());
    assert_eq!(
        controller.apply_changes(context.graph(), &notification),
        Err(ObserverError::DuplicateObject(dune))
    );
}

#[test]
fn predicate_filters_inserts_updates_and_deletes() {
    let (_dir, mut context) = context();
    let request = by_author_then_title()
        .with_predicate(|object: &ManagedObject| object.integer("year").unwrap_or(0) >= 2000);
    let (controller, log) = observe(&mut context, request);

    let old = add_book(&mut context, "Foundation", "A");
    context.set_attribute(&old, "year", 1951).unwrap();
    context.save().unwrap();
    context.set_attribute(&old, "title", "Foundation and Empire").unwrap();
    context.save().unwrap();
    context.delete_object(&old).unwrap();
    context.save().unwrap();
    assert!(log.borrow().events().is_empty());

    let recent = add_book(&mut context, "Anathem", "S");
    context.set_attribute(&recent, "year", 2008).unwrap();
    context.save().unwrap();
    assert_eq!(layout(&controller), vec![("S".to_string(), vec!["Anathem".to_string()])]);
}

#[test]
fn update_that_starts_matching_predicate_is_reported_missing() {
    let (_dir, mut context) = context();
    let request = by_author_then_title()
        .with_predicate(|object: &ManagedObject| object.integer("year").unwrap_or(0) >= 2000);
    let old = add_book(&mut context, "Foundation", "A");
    context.set_attribute(&old, "year", 1951).unwrap();
    context.save().unwrap();
    let (_controller, log) = observe(&mut context, request);

    context.set_attribute(&old, "year", 2021).unwrap();
    let err = context.save().unwrap_err();
    assert!(err.is_integrity_violation());
    assert!(log.borrow().events().is_empty());
}

#[test]
fn unrelated_entity_changes_emit_nothing() {
    let (_dir, mut context) = context();
    let (_controller, log) = observe(&mut context, by_author_then_title());

    let reader = context.insert_object("Reader").unwrap();
    context.set_attribute(&reader, "name", "Ada").unwrap();
    context.save().unwrap();
    assert!(log.borrow().events().is_empty());
}

#[test]
fn missing_section_name_falls_back_to_default() {
    let (_dir, mut context) = context();
    add_book(&mut context, "Piranesi", "C");
    add_book(&mut context, "Circe", "M");
    context.save().unwrap();

    let request = FetchSpec::new("Book", |left: &BookRow, right: &BookRow| {
        left.title.cmp(&right.title)
    });
    let (controller, _log) = observe(&mut context, request);
    assert_eq!(
        layout(&controller),
        vec![(
            "Untitled".to_string(),
            vec!["Circe".to_string(), "Piranesi".to_string()]
        )]
    );
}

#[test]
fn unwrappable_object_fails_fetch() {
    let (_dir, mut context) = context();
    let untitled = context.insert_object("Book").unwrap();
    context.save().unwrap();

    let mut controller = ResultSetController::new(by_author_then_title());
    let err = controller.perform_fetch(context.graph()).unwrap_err();
    assert!(matches!(&err, ObserverError::Wrap(wrap) if wrap.object() == &untitled));
    assert!(!err.is_integrity_violation());
}

#[test]
fn object_observer_follows_one_book_through_saves() {
    let (_dir, mut context) = context();
    let watched = add_book(&mut context, "Dune", "Herbert");
    let other = add_book(&mut context, "Emma", "Austen");
    context.save().unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let batches = Rc::new(RefCell::new(Vec::new()));
    let observer = Rc::new(RefCell::new(ObjectObserver::<BookRow>::new()));
    {
        let mut observer = observer.borrow_mut();
        let sink = Rc::clone(&seen);
        observer.observe(&watched, move |row: &BookRow| {
            sink.borrow_mut().push(row.title.clone())
        });
        let updates = Rc::clone(&batches);
        observer.on_update(move |ids| updates.borrow_mut().push(("update", ids.len())));
        let deletes = Rc::clone(&batches);
        observer.on_delete(move |ids| deletes.borrow_mut().push(("delete", ids.len())));
    }
    context.bus_mut().subscribe(&observer);

    context.set_attribute(&watched, "title", "Dune Messiah").unwrap();
    context.set_attribute(&other, "title", "Persuasion").unwrap();
    context.save().unwrap();
    assert_eq!(*seen.borrow(), vec!["Dune Messiah".to_string()]);

    context.delete_object(&watched).unwrap();
    context.save().unwrap();
    assert!(!observer.borrow().is_observing(&watched));
    assert_eq!(*batches.borrow(), vec![("update", 2), ("delete", 1)]);
}
