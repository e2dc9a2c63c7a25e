use crate::results::section::IndexPath;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Insert,
    Delete,
    /// Never produced; kept for listeners that mirror table-view APIs.
    Move,
    Update,
}

/// Receives the events of one applied change batch.
///
/// All callbacks default to no-ops.
pub trait ResultSetListener {
    fn will_change_content(&mut self) {}

    /// `index_path` is the old position (delete, update), `new_index_path`
    /// the new one (insert).
    fn did_change_object(
        &mut self,
        _index_path: Option<IndexPath>,
        _change: ChangeType,
        _new_index_path: Option<IndexPath>,
    ) {
    }

    fn did_change_section(&mut self, _section_index: usize, _change: ChangeType) {}

    fn did_change_content(&mut self) {}
}

impl<L: ResultSetListener + ?Sized> ResultSetListener for Rc<RefCell<L>> {
    fn will_change_content(&mut self) {
        self.borrow_mut().will_change_content();
    }

    fn did_change_object(
        &mut self,
        index_path: Option<IndexPath>,
        change: ChangeType,
        new_index_path: Option<IndexPath>,
    ) {
        self.borrow_mut()
            .did_change_object(index_path, change, new_index_path);
    }

    fn did_change_section(&mut self, section_index: usize, change: ChangeType) {
        self.borrow_mut().did_change_section(section_index, change);
    }

    fn did_change_content(&mut self) {
        self.borrow_mut().did_change_content();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    WillChange,
    Object {
        index_path: Option<IndexPath>,
        change: ChangeType,
        new_index_path: Option<IndexPath>,
    },
    Section {
        index: usize,
        change: ChangeType,
    },
    DidChange,
}

/// Listener that records every event in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeLog {
    events: Vec<ChangeEvent>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    /// Returns recorded events and starts a fresh log.
    pub fn take(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.events)
    }
}

impl ResultSetListener for ChangeLog {
    fn will_change_content(&mut self) {
        self.events.push(ChangeEvent::WillChange);
    }

    fn did_change_object(
        &mut self,
        index_path: Option<IndexPath>,
        change: ChangeType,
        new_index_path: Option<IndexPath>,
    ) {
        self.events.push(ChangeEvent::Object {
            index_path,
            change,
            new_index_path,
        });
    }

    fn did_change_section(&mut self, section_index: usize, change: ChangeType) {
        self.events.push(ChangeEvent::Section {
            index: section_index,
            change,
        });
    }

    fn did_change_content(&mut self) {
        self.events.push(ChangeEvent::DidChange);
    }
}
