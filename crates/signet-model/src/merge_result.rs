use serde::{Deserialize, Serialize};

use crate::bookmark::Bookmark;
use crate::similarity::MatchKind;

/// Which side of a resolved duplicate pair survived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeptSide {
    Local,
    Incoming,
}

/// A duplicate pair resolved automatically (Exact or WordBoundary match).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedDuplicate {
    pub local: Bookmark,
    pub incoming: Bookmark,
    pub kind: MatchKind,
    pub kept: KeptSide,
}

/// A fuzzy pair above threshold, surfaced for manual resolution instead
/// of being auto-merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateCandidate {
    pub local: Bookmark,
    pub incoming: Bookmark,
    pub score: f64,
}

/// Outcome of a two-way merge, produced once per sync operation and
/// handed to the external persistence collaborator. Deletions never
/// appear here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MergeResult {
    /// Incoming bookmarks with no local counterpart, keeping their
    /// original folder paths.
    pub added: Vec<Bookmark>,
    /// Local bookmarks replaced by a newer incoming duplicate.
    pub updated: Vec<Bookmark>,
    /// Automatically resolved duplicate pairs.
    pub duplicates: Vec<ResolvedDuplicate>,
    /// Ambiguous fuzzy pairs awaiting a caller decision.
    pub candidates: Vec<DuplicateCandidate>,
    /// Folder paths created locally to host added bookmarks.
    pub folders_created: Vec<Vec<String>>,
}

impl MergeResult {
    /// True when the merge changed nothing: no additions and no updates.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty()
    }

    /// Short human-readable summary for logs and progress events.
    pub fn summary(&self) -> String {
        format!(
            "{} added, {} updated, {} duplicates, {} candidates",
            self.added.len(),
            self.updated.len(),
            self.duplicates.len(),
            self.candidates.len()
        )
    }
}
