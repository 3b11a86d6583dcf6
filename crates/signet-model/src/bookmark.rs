//! The normalized bookmark tree.
//!
//! Collections are produced by the external per-browser parsers and
//! mutated here during merges. The tree is an owned value type: folders
//! contain sub-folders and bookmarks, so cycles cannot be constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::browser::BrowserTag;
use crate::error::ModelError;

/// Stable bookmark identifier within its source collection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BookmarkId(pub Uuid);

impl BookmarkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BookmarkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BookmarkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single bookmark entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bookmark {
    pub id: BookmarkId,
    pub url: String,
    pub title: String,
    /// Owning folder path, ordered from the collection root.
    pub folder_path: Vec<String>,
    pub source: BrowserTag,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Bookmark {
    /// Create a bookmark with fresh timestamps.
    ///
    /// Returns [`ModelError::EmptyUrl`] when the URL is empty.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        folder_path: Vec<String>,
        source: BrowserTag,
    ) -> Result<Self, ModelError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(ModelError::EmptyUrl);
        }
        let now = Utc::now();
        Ok(Self {
            id: BookmarkId::new(),
            url,
            title: title.into(),
            folder_path,
            source,
            created_at: now,
            modified_at: now,
        })
    }
}

/// A folder node: ordered sub-folders and bookmarks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BookmarkFolder {
    pub name: String,
    pub folders: Vec<BookmarkFolder>,
    pub bookmarks: Vec<Bookmark>,
}

impl BookmarkFolder {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            folders: Vec::new(),
            bookmarks: Vec::new(),
        }
    }

    fn collect_into<'a>(&'a self, out: &mut Vec<&'a Bookmark>) {
        out.extend(self.bookmarks.iter());
        for folder in &self.folders {
            folder.collect_into(out);
        }
    }

    fn find_mut(&mut self, id: BookmarkId) -> Option<&mut Bookmark> {
        if let Some(b) = self.bookmarks.iter_mut().find(|b| b.id == id) {
            return Some(b);
        }
        self.folders.iter_mut().find_map(|f| f.find_mut(id))
    }
}

/// An ordered tree of folders, tagged with its source browser and a
/// version counter bumped on every mutation batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookmarkCollection {
    pub source: BrowserTag,
    /// Machine name the collection came from.
    pub host: String,
    pub version: u64,
    pub root: BookmarkFolder,
}

impl BookmarkCollection {
    pub fn new(source: BrowserTag, host: impl Into<String>) -> Self {
        Self {
            source,
            host: host.into(),
            version: 0,
            root: BookmarkFolder::default(),
        }
    }

    /// All bookmarks in the collection, depth-first.
    pub fn all_bookmarks(&self) -> Vec<&Bookmark> {
        let mut out = Vec::new();
        self.root.collect_into(&mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.all_bookmarks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.bookmarks.is_empty() && self.root.folders.is_empty()
    }

    pub fn get(&self, id: BookmarkId) -> Option<&Bookmark> {
        self.all_bookmarks().into_iter().find(|b| b.id == id)
    }

    /// Whether the given folder path exists.
    pub fn contains_folder(&self, path: &[String]) -> bool {
        let mut node = &self.root;
        for segment in path {
            match node.folders.iter().find(|f| &f.name == segment) {
                Some(next) => node = next,
                None => return false,
            }
        }
        true
    }

    /// Walk to the folder at `path`, creating missing segments.
    ///
    /// Returns `true` when at least one folder was created. Sibling names
    /// stay unique because existing segments are reused.
    pub fn ensure_folder(&mut self, path: &[String]) -> bool {
        let mut node = &mut self.root;
        let mut created = false;
        for segment in path {
            let idx = node.folders.iter().position(|f| &f.name == segment);
            let idx = match idx {
                Some(i) => i,
                None => {
                    node.folders.push(BookmarkFolder::named(segment.clone()));
                    created = true;
                    node.folders.len() - 1
                }
            };
            node = &mut node.folders[idx];
        }
        created
    }

    /// Insert a bookmark under its own folder path, creating folders as
    /// needed. Returns `true` when a new folder was created along the way.
    ///
    /// Identifier uniqueness is the caller's invariant; inserting a
    /// duplicate id is rejected.
    pub fn insert(&mut self, bookmark: Bookmark) -> Result<bool, ModelError> {
        if self.get(bookmark.id).is_some() {
            return Err(ModelError::DuplicateId(bookmark.id.to_string()));
        }
        let path = bookmark.folder_path.clone();
        let mut created = false;
        let mut node = &mut self.root;
        for segment in &path {
            let idx = match node.folders.iter().position(|f| &f.name == segment) {
                Some(i) => i,
                None => {
                    node.folders.push(BookmarkFolder::named(segment.clone()));
                    created = true;
                    node.folders.len() - 1
                }
            };
            node = &mut node.folders[idx];
        }
        node.bookmarks.push(bookmark);
        Ok(created)
    }

    /// Replace the stored bookmark with the same id, keeping its position.
    /// Returns `false` when the id is unknown.
    pub fn replace(&mut self, bookmark: Bookmark) -> bool {
        match self.root.find_mut(bookmark.id) {
            Some(slot) => {
                *slot = bookmark;
                true
            }
            None => false,
        }
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bm(url: &str, path: &[&str]) -> Bookmark {
        Bookmark::new(
            url,
            url,
            path.iter().map(|s| s.to_string()).collect(),
            BrowserTag::Firefox,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(Bookmark::new("", "t", vec![], BrowserTag::Unknown).is_err());
        assert!(Bookmark::new("   ", "t", vec![], BrowserTag::Unknown).is_err());
    }

    #[test]
    fn test_insert_creates_folders() {
        let mut coll = BookmarkCollection::new(BrowserTag::Firefox, "laptop");
        let created = coll.insert(bm("https://example.com", &["Work", "Projects"])).unwrap();
        assert!(created);
        assert!(coll.contains_folder(&["Work".into(), "Projects".into()]));
        assert_eq!(coll.len(), 1);

        // second insert reuses the existing path
        let created = coll.insert(bm("https://example.org", &["Work", "Projects"])).unwrap();
        assert!(!created);
        assert_eq!(coll.len(), 2);
        // sibling folder names stayed unique
        assert_eq!(coll.root.folders.len(), 1);
        assert_eq!(coll.root.folders[0].folders.len(), 1);
    }

    #[test]
    fn test_ensure_folder() {
        let mut coll = BookmarkCollection::new(BrowserTag::Opera, "box");
        assert!(coll.ensure_folder(&["A".into(), "B".into()]));
        assert!(!coll.ensure_folder(&["A".into(), "B".into()]));
        assert!(coll.ensure_folder(&["A".into(), "C".into()]));
        assert!(coll.contains_folder(&["A".into(), "B".into()]));
        assert!(!coll.contains_folder(&["B".into()]));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut coll = BookmarkCollection::new(BrowserTag::Chrome, "desktop");
        let b = bm("https://example.com", &[]);
        coll.insert(b.clone()).unwrap();
        assert!(coll.insert(b).is_err());
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut coll = BookmarkCollection::new(BrowserTag::Chrome, "desktop");
        let mut b = bm("https://example.com", &["News"]);
        coll.insert(b.clone()).unwrap();

        b.title = "updated".to_string();
        assert!(coll.replace(b.clone()));
        assert_eq!(coll.get(b.id).unwrap().title, "updated");
        assert_eq!(coll.len(), 1);

        let stranger = bm("https://other.com", &[]);
        assert!(!coll.replace(stranger));
    }

    #[test]
    fn test_all_bookmarks_depth_first() {
        let mut coll = BookmarkCollection::new(BrowserTag::Safari, "mac");
        coll.insert(bm("https://a.com", &[])).unwrap();
        coll.insert(bm("https://b.com", &["Deep", "Deeper"])).unwrap();
        coll.insert(bm("https://c.com", &["Deep"])).unwrap();
        let urls: Vec<_> = coll.all_bookmarks().iter().map(|b| b.url.clone()).collect();
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[0], "https://a.com");
    }
}
