// Normalized bookmark model shared by every component: the folder tree,
// the URL similarity matcher, and the per-browser collaborator interfaces.

pub mod bookmark;
pub mod browser;
pub mod error;
pub mod merge_result;
pub mod similarity;
pub mod source;

pub use bookmark::{Bookmark, BookmarkCollection, BookmarkFolder, BookmarkId};
pub use browser::BrowserTag;
pub use error::{ModelError, SourceError};
pub use merge_result::{DuplicateCandidate, KeptSide, MergeResult, ResolvedDuplicate};
pub use similarity::{classify, host_key, normalize_url, MatchKind, SimilarityMatch};
pub use source::{BookmarkSink, BookmarkSource, SourceRegistry};
