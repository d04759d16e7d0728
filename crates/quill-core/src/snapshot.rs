use std::fmt;
use std::sync::Arc;

use crate::TextSize;

/// An immutable, versioned state of one text buffer.
///
/// Cloning is cheap; the text is shared. Snapshots taken from the same
/// [`crate::Buffer`] have strictly increasing versions.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Snapshot {
    version: u64,
    text: Arc<str>,
}

impl Snapshot {
    pub fn new(version: u64, text: impl Into<Arc<str>>) -> Self {
        Self {
            version,
            text: text.into(),
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn text_arc(&self) -> Arc<str> {
        Arc::clone(&self.text)
    }

    #[inline]
    pub fn len(&self) -> TextSize {
        TextSize::of(&*self.text)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Returns `true` if this snapshot was taken after `other`.
    #[inline]
    pub fn is_newer_than(&self, other: &Snapshot) -> bool {
        self.version > other.version
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("len", &self.text.len())
            .finish()
    }
}
