//! Collaborator interfaces for per-browser bookmark storage.
//!
//! Readers and writers for each browser's native format live outside this
//! workspace. The core talks to them through these capability traits,
//! selected by a registry lookup on the browser tag.

use std::collections::HashMap;

use tracing::warn;

use crate::bookmark::BookmarkCollection;
use crate::browser::BrowserTag;
use crate::error::SourceError;
use crate::merge_result::MergeResult;

/// Reads a browser's native bookmark storage into the common model.
pub trait BookmarkSource: Send + Sync {
    fn browser(&self) -> BrowserTag;

    /// May fail with [`SourceError::NotFound`] or [`SourceError::Parse`];
    /// callers treat either as "no data available from that source".
    fn parse(&self) -> Result<BookmarkCollection, SourceError>;
}

/// Writes a merged result back into a browser's native storage.
pub trait BookmarkSink: Send + Sync {
    /// A failure here does not roll back the in-memory merge; the caller
    /// is informed so it can retry the write-back independently.
    fn persist(&self, result: &MergeResult, target: BrowserTag) -> Result<(), SourceError>;
}

/// Registry of per-browser parsers, one capability per variant.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<BrowserTag, Box<dyn BookmarkSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parser for its browser, replacing any previous one.
    pub fn register(&mut self, source: Box<dyn BookmarkSource>) {
        self.sources.insert(source.browser(), source);
    }

    pub fn get(&self, browser: BrowserTag) -> Option<&dyn BookmarkSource> {
        self.sources.get(&browser).map(|s| s.as_ref())
    }

    pub fn registered(&self) -> Vec<BrowserTag> {
        self.sources.keys().copied().collect()
    }

    /// Parse a browser's bookmarks, treating failure as absence of data.
    pub fn load(&self, browser: BrowserTag) -> Option<BookmarkCollection> {
        let source = self.get(browser)?;
        match source.parse() {
            Ok(collection) => Some(collection),
            Err(e) => {
                warn!(browser = %browser, error = %e, "No bookmark data from source");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::Bookmark;

    struct FakeSource {
        browser: BrowserTag,
        fail: bool,
    }

    impl BookmarkSource for FakeSource {
        fn browser(&self) -> BrowserTag {
            self.browser
        }

        fn parse(&self) -> Result<BookmarkCollection, SourceError> {
            if self.fail {
                return Err(SourceError::NotFound(self.browser.to_string()));
            }
            let mut coll = BookmarkCollection::new(self.browser, "testhost");
            coll.insert(
                Bookmark::new("https://example.com", "Example", vec![], self.browser).unwrap(),
            )
            .unwrap();
            Ok(coll)
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = SourceRegistry::new();
        registry.register(Box::new(FakeSource {
            browser: BrowserTag::Firefox,
            fail: false,
        }));

        assert!(registry.get(BrowserTag::Firefox).is_some());
        assert!(registry.get(BrowserTag::Chrome).is_none());
        assert_eq!(registry.registered(), vec![BrowserTag::Firefox]);
    }

    #[test]
    fn test_load_failure_is_absence_not_error() {
        let mut registry = SourceRegistry::new();
        registry.register(Box::new(FakeSource {
            browser: BrowserTag::Safari,
            fail: true,
        }));

        assert!(registry.load(BrowserTag::Safari).is_none());
        assert!(registry.load(BrowserTag::Edge).is_none());
    }

    #[test]
    fn test_load_success() {
        let mut registry = SourceRegistry::new();
        registry.register(Box::new(FakeSource {
            browser: BrowserTag::Chrome,
            fail: false,
        }));

        let coll = registry.load(BrowserTag::Chrome).unwrap();
        assert_eq!(coll.len(), 1);
        assert_eq!(coll.source, BrowserTag::Chrome);
    }
}
