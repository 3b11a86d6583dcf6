//! URL similarity classification.
//!
//! Pure functions, no state. Two URLs are compared in priority tiers:
//! exact match after normalization, prefix at a word boundary, plain
//! containment, then an edit-distance ratio. The first tier that holds
//! wins; callers only fall back to the fuzzy ratio for ambiguous pairs.

use serde::{Deserialize, Serialize};
use url::Url;

/// Boundary characters that separate URL "words".
const BOUNDARY_CHARS: [char; 3] = ['/', '-', '_'];

/// Tier scores carried alongside the match kind.
const SCORE_EXACT: f64 = 1.0;
const SCORE_WORD_BOUNDARY: f64 = 0.9;
const SCORE_SUBSTRING: f64 = 0.8;

/// Match strength between two URLs, strongest first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MatchKind {
    Exact,
    WordBoundary,
    Substring,
    Fuzzy,
    None,
}

/// Outcome of classifying a URL pair. Transient, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityMatch {
    pub kind: MatchKind,
    /// For `Fuzzy` (and `None`) the raw edit-distance ratio in [0, 1];
    /// for the structural tiers a fixed tier score.
    pub score: f64,
}

/// Normalize a URL for comparison: drop the scheme, query and fragment,
/// lowercase, strip a leading `www.`, strip default ports and trailing
/// slashes. Unparseable input falls back to the lowercased string.
pub fn normalize_url(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();

    // Schemeless input ("example.com:8080/a") misparses the host as a
    // scheme, so retry with an explicit one before giving up.
    let parsed = match Url::parse(&lowered) {
        Ok(u) if u.has_host() => u,
        _ => match Url::parse(&format!("https://{lowered}")) {
            Ok(u) if u.has_host() => u,
            _ => return lowered,
        },
    };

    let mut host = parsed.host_str().unwrap_or_default().to_string();
    if let Some(stripped) = host.strip_prefix("www.") {
        host = stripped.to_string();
    }
    // `Url::port` is None for the scheme's default port, so only
    // non-default ports survive normalization.
    if let Some(port) = parsed.port() {
        host = format!("{host}:{port}");
    }

    let path = parsed.path().trim_end_matches('/');
    format!("{host}{path}")
}

/// Host portion of the normalized URL, used to bucket collections by
/// domain before running the expensive fuzzy tier.
pub fn host_key(raw: &str) -> String {
    let normalized = normalize_url(raw);
    match normalized.find('/') {
        Some(idx) => normalized[..idx].to_string(),
        None => normalized,
    }
}

/// Classify a pair of URLs. Deterministic and symmetric: swapping the
/// arguments yields the same kind and score.
pub fn classify(url_a: &str, url_b: &str, fuzzy_threshold: f64) -> SimilarityMatch {
    let a = normalize_url(url_a);
    let b = normalize_url(url_b);

    if a == b {
        return SimilarityMatch {
            kind: MatchKind::Exact,
            score: SCORE_EXACT,
        };
    }

    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };

    if !shorter.is_empty() && longer.starts_with(shorter.as_str()) {
        // The forms differ, so a character always follows the prefix.
        let next = longer[shorter.len()..].chars().next();
        if matches!(next, Some(c) if BOUNDARY_CHARS.contains(&c)) {
            return SimilarityMatch {
                kind: MatchKind::WordBoundary,
                score: SCORE_WORD_BOUNDARY,
            };
        }
    }

    if !shorter.is_empty() && longer.contains(shorter.as_str()) {
        return SimilarityMatch {
            kind: MatchKind::Substring,
            score: SCORE_SUBSTRING,
        };
    }

    let ratio = similarity_ratio(&a, &b);
    if ratio >= fuzzy_threshold {
        SimilarityMatch {
            kind: MatchKind::Fuzzy,
            score: ratio,
        }
    } else {
        SimilarityMatch {
            kind: MatchKind::None,
            score: ratio,
        }
    }
}

/// Normalized Levenshtein similarity: `1 - distance / max_len`.
fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

// Two-row dynamic program; O(min(a,b)) memory.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    let (a, b) = if a.len() < b.len() { (a, b) } else { (b, a) };
    if a.is_empty() {
        return b.len();
    }

    let mut prev: Vec<usize> = (0..=a.len()).collect();
    let mut curr = vec![0usize; a.len() + 1];

    for (j, bc) in b.iter().enumerate() {
        curr[0] = j + 1;
        for (i, ac) in a.iter().enumerate() {
            let cost = usize::from(ac != bc);
            curr[i + 1] = (prev[i] + cost).min(prev[i + 1] + 1).min(curr[i] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[a.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f64 = 0.8;

    #[test]
    fn test_normalize_strips_scheme_www_and_slash() {
        assert_eq!(normalize_url("https://www.Example.com/Page/"), "example.com/page");
        assert_eq!(normalize_url("http://example.com/page"), "example.com/page");
        assert_eq!(normalize_url("example.com/page"), "example.com/page");
    }

    #[test]
    fn test_normalize_strips_query_fragment_default_port() {
        assert_eq!(
            normalize_url("https://example.com:443/a?q=1#frag"),
            "example.com/a"
        );
        assert_eq!(normalize_url("http://example.com:8080/a"), "example.com:8080/a");
    }

    #[test]
    fn test_exact_after_normalization() {
        // trailing slash and scheme differences collapse to Exact
        let m = classify("https://example.com/page", "example.com/page/", THRESHOLD);
        assert_eq!(m.kind, MatchKind::Exact);
        assert_eq!(m.score, 1.0);
    }

    #[test]
    fn test_word_boundary_dash() {
        let m = classify("example.com/docs", "example.com/docs-archive", THRESHOLD);
        assert_eq!(m.kind, MatchKind::WordBoundary);
    }

    #[test]
    fn test_word_boundary_slash() {
        let m = classify("example.com/docs", "example.com/docs/intro", THRESHOLD);
        assert_eq!(m.kind, MatchKind::WordBoundary);
    }

    #[test]
    fn test_substring_without_boundary() {
        let m = classify("example.com/docs", "example.com/docsarchive", THRESHOLD);
        assert_eq!(m.kind, MatchKind::Substring);
    }

    #[test]
    fn test_fuzzy_and_none() {
        let m = classify("example.com/articles", "example.com/artikles", THRESHOLD);
        assert_eq!(m.kind, MatchKind::Fuzzy);
        assert!(m.score >= THRESHOLD && m.score < 1.0);

        let m = classify("example.com", "zzz.org/totally-different", THRESHOLD);
        assert_eq!(m.kind, MatchKind::None);
    }

    #[test]
    fn test_symmetric() {
        let pairs = [
            ("example.com/docs", "example.com/docs-archive"),
            ("example.com/a", "other.net/b"),
            ("example.com/articles", "example.com/artikles"),
        ];
        for (x, y) in pairs {
            let ab = classify(x, y, THRESHOLD);
            let ba = classify(y, x, THRESHOLD);
            assert_eq!(ab.kind, ba.kind, "{x} vs {y}");
            assert_eq!(ab.score, ba.score, "{x} vs {y}");
        }
    }

    #[test]
    fn test_deterministic() {
        for _ in 0..3 {
            let m = classify("example.com/page", "example.com/page/", THRESHOLD);
            assert_eq!(m.kind, MatchKind::Exact);
        }
    }

    #[test]
    fn test_host_key() {
        assert_eq!(host_key("https://www.example.com/deep/path"), "example.com");
        assert_eq!(host_key("example.com"), "example.com");
    }

    #[test]
    fn test_levenshtein_basics() {
        let to_chars = |s: &str| s.chars().collect::<Vec<_>>();
        assert_eq!(levenshtein(&to_chars("kitten"), &to_chars("sitting")), 3);
        assert_eq!(levenshtein(&to_chars(""), &to_chars("abc")), 3);
        assert_eq!(levenshtein(&to_chars("abc"), &to_chars("abc")), 0);
    }
}
