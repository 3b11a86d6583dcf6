//! Two-way merge of bookmark collections.
//!
//! Pure functions: classify every incoming bookmark against the local
//! collection, resolve strong matches as duplicates, surface ambiguous
//! ones as candidates, and add the rest preserving their folder paths.
//! Deletions are never produced; re-merging an already merged pair
//! yields empty add/update sets.

use tracing::debug;

use signet_model::{
    classify, host_key, normalize_url, Bookmark, BookmarkCollection, DuplicateCandidate, KeptSide,
    MatchKind, MergeResult, ResolvedDuplicate, SimilarityMatch,
};

/// How a resolved duplicate picks its survivor. The default keeps the
/// later-modified copy and the local one on ties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    #[default]
    LaterTimestampWins,
    LocalWins,
    IncomingWins,
}

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub fuzzy_threshold: f64,
    pub policy: DuplicatePolicy,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: signet_shared::constants::DEFAULT_FUZZY_THRESHOLD,
            policy: DuplicatePolicy::default(),
        }
    }
}

struct LocalEntry<'a> {
    bookmark: &'a Bookmark,
    normalized: String,
    host: String,
}

/// Merge a peer's full collection against the local one.
pub fn merge_collections(
    local: &BookmarkCollection,
    incoming: &BookmarkCollection,
    config: &MergeConfig,
) -> MergeResult {
    let bookmarks: Vec<Bookmark> = incoming.all_bookmarks().into_iter().cloned().collect();
    merge_bookmarks(local, &bookmarks, config)
}

/// Merge a batch of incoming bookmarks (a share push or a sync transfer)
/// against the local collection.
pub fn merge_bookmarks(
    local: &BookmarkCollection,
    incoming: &[Bookmark],
    config: &MergeConfig,
) -> MergeResult {
    let locals: Vec<LocalEntry<'_>> = local
        .all_bookmarks()
        .into_iter()
        .map(|b| LocalEntry {
            bookmark: b,
            normalized: normalize_url(&b.url),
            host: host_key(&b.url),
        })
        .collect();

    let mut result = MergeResult::default();

    for inc in incoming {
        let inc_normalized = normalize_url(&inc.url);
        let inc_host = host_key(&inc.url);

        let best = best_match(&locals, inc, &inc_normalized, &inc_host, config);

        match best {
            Some((entry, m)) if matches!(m.kind, MatchKind::Exact | MatchKind::WordBoundary) => {
                resolve_duplicate(entry.bookmark, inc, m.kind, config.policy, &mut result);
            }
            Some((entry, m)) => {
                // Substring and Fuzzy are surfaced, never auto-merged.
                debug!(
                    local = %entry.bookmark.url,
                    incoming = %inc.url,
                    score = m.score,
                    "Duplicate candidate"
                );
                result.candidates.push(DuplicateCandidate {
                    local: entry.bookmark.clone(),
                    incoming: inc.clone(),
                    score: m.score,
                });
            }
            None => {
                if !inc.folder_path.is_empty()
                    && !local.contains_folder(&inc.folder_path)
                    && !result.folders_created.contains(&inc.folder_path)
                {
                    result.folders_created.push(inc.folder_path.clone());
                }
                result.added.push(inc.clone());
            }
        }
    }

    result
}

/// Strongest local match for one incoming bookmark. The fuzzy tier only
/// runs within the same host bucket; cross-host pairs are limited to a
/// cheap containment pre-check before full classification.
fn best_match<'a>(
    locals: &'a [LocalEntry<'a>],
    inc: &Bookmark,
    inc_normalized: &str,
    inc_host: &str,
    config: &MergeConfig,
) -> Option<(&'a LocalEntry<'a>, SimilarityMatch)> {
    let mut best: Option<(&LocalEntry<'_>, SimilarityMatch)> = None;

    for entry in locals {
        let same_host = entry.host == inc_host;
        if !same_host
            && !entry.normalized.contains(inc_normalized)
            && !inc_normalized.contains(&entry.normalized)
        {
            continue;
        }

        let m = classify(&entry.bookmark.url, &inc.url, config.fuzzy_threshold);
        if m.kind == MatchKind::None {
            continue;
        }

        let better = match &best {
            None => true,
            Some((_, current)) => rank(m.kind) > rank(current.kind),
        };
        if better {
            let is_exact = m.kind == MatchKind::Exact;
            best = Some((entry, m));
            if is_exact {
                break;
            }
        }
    }

    best
}

fn rank(kind: MatchKind) -> u8 {
    match kind {
        MatchKind::Exact => 4,
        MatchKind::WordBoundary => 3,
        MatchKind::Substring => 2,
        MatchKind::Fuzzy => 1,
        MatchKind::None => 0,
    }
}

fn resolve_duplicate(
    local: &Bookmark,
    incoming: &Bookmark,
    kind: MatchKind,
    policy: DuplicatePolicy,
    result: &mut MergeResult,
) {
    let keep_incoming = match policy {
        DuplicatePolicy::LaterTimestampWins => incoming.modified_at > local.modified_at,
        DuplicatePolicy::LocalWins => false,
        DuplicatePolicy::IncomingWins => true,
    };

    if keep_incoming {
        // The survivor keeps the local identity and position so the
        // update stays an in-place replacement.
        let mut updated = incoming.clone();
        updated.id = local.id;
        updated.folder_path = local.folder_path.clone();
        updated.source = local.source;
        updated.created_at = local.created_at;
        result.updated.push(updated);
    }

    result.duplicates.push(ResolvedDuplicate {
        local: local.clone(),
        incoming: incoming.clone(),
        kind,
        kept: if keep_incoming {
            KeptSide::Incoming
        } else {
            KeptSide::Local
        },
    });
}

/// Apply a merge result to the local collection: insert additions,
/// replace updated entries, bump the version. Nothing is removed.
pub fn apply_merge(collection: &mut BookmarkCollection, result: &MergeResult) {
    for path in &result.folders_created {
        collection.ensure_folder(path);
    }
    for bookmark in &result.added {
        let mut bookmark = bookmark.clone();
        // incoming ids come from a foreign collection; keep them unless
        // they collide with a local id
        if collection.get(bookmark.id).is_some() {
            bookmark.id = signet_model::BookmarkId::new();
        }
        if let Err(e) = collection.insert(bookmark) {
            debug!(error = %e, "Skipping unaddable bookmark");
        }
    }
    for bookmark in &result.updated {
        collection.replace(bookmark.clone());
    }
    if !result.is_noop() {
        collection.bump_version();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use signet_model::BrowserTag;

    fn bookmark(url: &str, path: &[&str]) -> Bookmark {
        Bookmark::new(
            url,
            url,
            path.iter().map(|s| s.to_string()).collect(),
            BrowserTag::Firefox,
        )
        .unwrap()
    }

    fn collection(bookmarks: Vec<Bookmark>) -> BookmarkCollection {
        let mut coll = BookmarkCollection::new(BrowserTag::Firefox, "local-host");
        for b in bookmarks {
            coll.insert(b).unwrap();
        }
        coll
    }

    #[test]
    fn test_exact_duplicate_later_incoming_wins() {
        let mut local_bm = bookmark("https://example.com/page", &[]);
        local_bm.modified_at = Utc::now() - Duration::hours(1);
        let local = collection(vec![local_bm.clone()]);

        let mut incoming = bookmark("example.com/page/", &["Imported"]);
        incoming.modified_at = Utc::now();

        let result = merge_bookmarks(&local, &[incoming.clone()], &MergeConfig::default());
        assert!(result.added.is_empty());
        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.duplicates.len(), 1);
        assert_eq!(result.duplicates[0].kind, MatchKind::Exact);
        assert_eq!(result.duplicates[0].kept, KeptSide::Incoming);

        // the update is in-place: local id and folder survive
        let updated = &result.updated[0];
        assert_eq!(updated.id, local_bm.id);
        assert_eq!(updated.folder_path, local_bm.folder_path);
        assert_eq!(updated.url, incoming.url);
    }

    #[test]
    fn test_exact_duplicate_older_incoming_discarded() {
        let local_bm = bookmark("https://example.com/page", &[]);
        let local = collection(vec![local_bm]);

        let mut incoming = bookmark("example.com/page", &[]);
        incoming.modified_at = Utc::now() - Duration::hours(2);

        let result = merge_bookmarks(&local, &[incoming], &MergeConfig::default());
        assert!(result.is_noop());
        assert_eq!(result.duplicates[0].kept, KeptSide::Local);
    }

    #[test]
    fn test_tie_keeps_local() {
        let local_bm = bookmark("https://example.com/page", &[]);
        let local = collection(vec![local_bm.clone()]);

        let mut incoming = bookmark("example.com/page", &[]);
        incoming.modified_at = local_bm.modified_at;

        let result = merge_bookmarks(&local, &[incoming], &MergeConfig::default());
        assert_eq!(result.duplicates[0].kept, KeptSide::Local);
        assert!(result.updated.is_empty());
    }

    #[test]
    fn test_policy_is_configurable() {
        let local_bm = bookmark("https://example.com/page", &[]);
        let local = collection(vec![local_bm]);
        let mut incoming = bookmark("example.com/page", &[]);
        incoming.modified_at = Utc::now() - Duration::hours(2);

        let config = MergeConfig {
            policy: DuplicatePolicy::IncomingWins,
            ..Default::default()
        };
        let result = merge_bookmarks(&local, &[incoming], &config);
        assert_eq!(result.duplicates[0].kept, KeptSide::Incoming);
        assert_eq!(result.updated.len(), 1);
    }

    #[test]
    fn test_word_boundary_is_duplicate() {
        let local = collection(vec![bookmark("example.com/docs", &[])]);
        let incoming = bookmark("example.com/docs-archive", &[]);

        let result = merge_bookmarks(&local, &[incoming], &MergeConfig::default());
        assert_eq!(result.duplicates.len(), 1);
        assert_eq!(result.duplicates[0].kind, MatchKind::WordBoundary);
        assert!(result.added.is_empty());
    }

    #[test]
    fn test_fuzzy_surfaces_candidate_without_merging() {
        let local = collection(vec![bookmark("example.com/articles", &[])]);
        let incoming = bookmark("example.com/artikles", &[]);

        let result = merge_bookmarks(&local, &[incoming], &MergeConfig::default());
        assert!(result.added.is_empty());
        assert!(result.updated.is_empty());
        assert_eq!(result.candidates.len(), 1);
        assert!(result.candidates[0].score >= 0.8);
    }

    #[test]
    fn test_unmatched_added_with_folder_creation() {
        let local = collection(vec![bookmark("https://example.com", &[])]);
        let incoming = bookmark("https://newsite.org/post", &["Work", "Projects"]);

        let result = merge_bookmarks(&local, &[incoming.clone()], &MergeConfig::default());
        assert_eq!(result.added.len(), 1);
        assert_eq!(
            result.folders_created,
            vec![vec!["Work".to_string(), "Projects".to_string()]]
        );

        let mut merged = local.clone();
        apply_merge(&mut merged, &result);
        assert!(merged.contains_folder(&["Work".into(), "Projects".into()]));
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.version, 1);
    }

    #[test]
    fn test_two_way_sync_idempotent() {
        let local = collection(vec![
            bookmark("https://example.com/a", &[]),
            bookmark("https://example.com/b", &["News"]),
        ]);
        let peer = collection(vec![
            bookmark("https://example.com/a", &[]),
            bookmark("https://other.org/x", &["Work"]),
        ]);

        let config = MergeConfig::default();
        let first = merge_collections(&local, &peer, &config);
        assert_eq!(first.added.len(), 1);

        let mut merged = local.clone();
        apply_merge(&mut merged, &first);

        // no intervening changes: the second run adds and updates nothing
        let second = merge_collections(&merged, &peer, &config);
        assert!(second.is_noop(), "second merge was {}", second.summary());
    }

    #[test]
    fn test_merge_never_deletes() {
        let local = collection(vec![
            bookmark("https://example.com/a", &[]),
            bookmark("https://example.com/b", &[]),
        ]);
        // peer has nothing: locals must survive untouched
        let peer = collection(vec![]);

        let result = merge_collections(&local, &peer, &MergeConfig::default());
        assert!(result.is_noop());

        let mut merged = local.clone();
        apply_merge(&mut merged, &result);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_added_id_collision_gets_fresh_id() {
        let local_bm = bookmark("https://example.com/a", &[]);
        let local = collection(vec![local_bm.clone()]);

        let mut incoming = bookmark("https://unrelated.net/z", &[]);
        incoming.id = local_bm.id;

        let result = merge_bookmarks(&local, &[incoming], &MergeConfig::default());
        assert_eq!(result.added.len(), 1);

        let mut merged = local.clone();
        apply_merge(&mut merged, &result);
        assert_eq!(merged.len(), 2);
    }
}
