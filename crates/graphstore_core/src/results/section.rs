use std::fmt::{Display, Formatter};

/// Section name used when no section extractor is configured.
pub const DEFAULT_SECTION_NAME: &str = "Untitled";

/// Position of one row: section index, then row index inside the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

impl Display for IndexPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.section, self.row)
    }
}

/// Named, ordered group of wrapped results.
#[derive(Debug, Clone, PartialEq)]
pub struct Section<R> {
    pub(crate) name: String,
    pub(crate) objects: Vec<R>,
}

impl<R> Section<R> {
    pub(crate) fn new(name: String, objects: Vec<R>) -> Self {
        Self { name, objects }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn objects(&self) -> &[R] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
