// src/version/mod.rs

//! Version keys for packages across every supported format
//!
//! A version string has the shape `[epoch:]upstream[-revision]`. The upstream
//! part and the revision are split into segments: runs of digits, runs of
//! other text, and the `~` pre-release marker. Separators (`.`, `+`, `_`,
//! and any other ASCII punctuation) only delimit segments.
//!
//! Per-position ordering: `~` < end of string < text < number. Numbers
//! compare by value regardless of leading zeros, text compares bytewise.
//! A version without a revision sorts before the same version with one.

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// One segment of an upstream version or revision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Tilde,
    /// Digits with leading zeros removed, so "0" and "000" are both ""
    Numeric(String),
    /// Letters or non-ASCII text, kept verbatim
    Text(String),
}

impl Segment {
    fn rank(seg: Option<&Segment>) -> u8 {
        match seg {
            Some(Segment::Tilde) => 0,
            None => 1,
            Some(Segment::Text(_)) => 2,
            Some(Segment::Numeric(_)) => 3,
        }
    }
}

fn cmp_numeric(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_segments(a: &[Segment], b: &[Segment]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let (sa, sb) = (a.get(i), b.get(i));
        let ord = match (sa, sb) {
            (Some(Segment::Numeric(x)), Some(Segment::Numeric(y))) => cmp_numeric(x, y),
            (Some(Segment::Text(x)), Some(Segment::Text(y))) => x.cmp(y),
            _ => Segment::rank(sa).cmp(&Segment::rank(sb)),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn strip_zeros(digits: &str) -> String {
    digits.trim_start_matches('0').to_string()
}

/// Split text into segments. Never fails: anything that is not a digit,
/// a tilde or ASCII punctuation is text.
fn tokenize(s: &str) -> Vec<Segment> {
    #[derive(PartialEq)]
    enum Run {
        None,
        Digits,
        Text,
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut run = Run::None;

    let flush = |run: &Run, current: &mut String, segments: &mut Vec<Segment>| {
        if current.is_empty() {
            return;
        }
        match run {
            Run::Digits => segments.push(Segment::Numeric(strip_zeros(current))),
            Run::Text => segments.push(Segment::Text(current.clone())),
            Run::None => {}
        }
        current.clear();
    };

    for c in s.chars() {
        if c == '~' {
            flush(&run, &mut current, &mut segments);
            run = Run::None;
            segments.push(Segment::Tilde);
        } else if c.is_ascii_digit() {
            if run != Run::Digits {
                flush(&run, &mut current, &mut segments);
                run = Run::Digits;
            }
            current.push(c);
        } else if c.is_ascii_punctuation() || c.is_whitespace() {
            flush(&run, &mut current, &mut segments);
            run = Run::None;
        } else {
            if run != Run::Text {
                flush(&run, &mut current, &mut segments);
                run = Run::Text;
            }
            current.push(c);
        }
    }
    flush(&run, &mut current, &mut segments);

    segments
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Parts {
    epoch: String,
    upstream: Vec<Segment>,
    revision: Option<Vec<Segment>>,
}

impl Ord for Parts {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_numeric(&self.epoch, &other.epoch)
            .then_with(|| cmp_segments(&self.upstream, &other.upstream))
            .then_with(|| match (&self.revision, &other.revision) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => cmp_segments(a, b),
            })
    }
}

impl PartialOrd for Parts {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed, totally ordered version
///
/// Equality follows the ordering: `"1.0" == "01.0"` but `"1.0" != "1.0-0"`.
/// The empty version is the minimum of the order.
#[derive(Debug, Clone)]
pub struct VersionKey {
    raw: String,
    upstream: String,
    revision: Option<String>,
    parts: Option<Parts>,
}

impl VersionKey {
    /// Parse a version string
    ///
    /// Examples:
    /// - "1.2.3" → upstream "1.2.3", no revision
    /// - "2:1.2.3-4" → epoch 2, upstream "1.2.3", revision "4"
    /// - "" → the minimum version
    /// - "2:" or "-1" → ParseError
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::minimum());
        }

        let (epoch, rest) = match trimmed.split_once(':') {
            Some((e, r)) if !e.is_empty() && e.chars().all(|c| c.is_ascii_digit()) => {
                (strip_zeros(e), r)
            }
            _ => (String::new(), trimmed),
        };

        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((u, r)) => (u, Some(r)),
            None => (rest, None),
        };

        let upstream_segments = tokenize(upstream);
        if upstream_segments.is_empty() {
            return Err(Error::ParseError(format!(
                "Empty upstream version in '{}'",
                raw
            )));
        }

        let revision_segments = match revision {
            Some(r) => {
                let segs = tokenize(r);
                if segs.is_empty() {
                    return Err(Error::ParseError(format!("Empty revision in '{}'", raw)));
                }
                Some(segs)
            }
            None => None,
        };

        Ok(Self {
            raw: trimmed.to_string(),
            upstream: upstream.to_string(),
            revision: revision.map(str::to_string),
            parts: Some(Parts {
                epoch,
                upstream: upstream_segments,
                revision: revision_segments,
            }),
        })
    }

    /// The version that sorts before every other version
    pub fn minimum() -> Self {
        Self {
            raw: String::new(),
            upstream: String::new(),
            revision: None,
            parts: None,
        }
    }

    pub fn is_minimum(&self) -> bool {
        self.parts.is_none()
    }

    /// Upstream part as written, without epoch or revision
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Compare two versions
    pub fn compare(&self, other: &VersionKey) -> Ordering {
        match (&self.parts, &other.parts) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }

    /// Check this version against a filter
    ///
    /// A filter without a revision matches every revision of its upstream
    /// version, so `1.2` selects both `1.2-1` and `1.2-3`.
    pub fn matches(&self, filter: &VersionKey) -> bool {
        match (&self.parts, &filter.parts) {
            (_, None) => self.parts.is_none(),
            (None, Some(_)) => false,
            (Some(mine), Some(wanted)) => {
                if wanted.revision.is_some() {
                    mine == wanted
                } else {
                    cmp_numeric(&mine.epoch, &wanted.epoch) == Ordering::Equal
                        && cmp_segments(&mine.upstream, &wanted.upstream) == Ordering::Equal
                }
            }
        }
    }
}

impl Default for VersionKey {
    fn default() -> Self {
        Self::minimum()
    }
}

impl std::str::FromStr for VersionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl PartialEq for VersionKey {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for VersionKey {}

impl Hash for VersionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for VersionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn v(s: &str) -> VersionKey {
        VersionKey::parse(s).unwrap()
    }

    #[test]
    fn test_parse_components() {
        let key = v("2:1.2.3-4.el8");
        assert_eq!(key.upstream(), "1.2.3");
        assert_eq!(key.revision(), Some("4.el8"));
        assert_eq!(key.to_string(), "2:1.2.3-4.el8");

        let key = v("6.0-1+deb7u1");
        assert_eq!(key.upstream(), "6.0");
        assert_eq!(key.revision(), Some("1+deb7u1"));
    }

    #[test]
    fn test_leading_zeros_equal() {
        assert_eq!(v("1.0"), v("01.0"));
        assert_eq!(v("1.00"), v("1.0"));

        let mut set = HashSet::new();
        set.insert(v("1.0"));
        assert!(set.contains(&v("01.0")));
    }

    #[test]
    fn test_missing_revision_sorts_first() {
        assert!(v("1.0") < v("1.0-1"));
        assert_ne!(v("1.0"), v("1.0-0"));
    }

    #[test]
    fn test_numeric_not_lexical() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.0") > v("1.99999999999999999999999"));
        assert!(v("1.2.10") > v("1.2.9"));
    }

    #[test]
    fn test_epoch_dominates() {
        assert!(v("1:0.1") > v("9.9"));
        assert_eq!(v("0:1.0"), v("1.0"));
    }

    #[test]
    fn test_tilde_sorts_before_everything() {
        assert!(v("1.0~rc1") < v("1.0"));
        assert!(v("1.0~~") < v("1.0~"));
        assert!(v("1.0~rc1") < v("1.0~rc2"));
    }

    #[test]
    fn test_text_segments() {
        assert!(v("1.0a") > v("1.0"));
        assert!(v("1.0a") < v("1.0.1"));
        assert!(v("5.2.0beta1") < v("5.2.0rc1"));
    }

    #[test]
    fn test_non_ascii_is_kept() {
        let key = v("1.0-é");
        assert!(key > v("1.0"));
        assert_eq!(key.revision(), Some("é"));
    }

    #[test]
    fn test_empty_is_minimum() {
        let empty = v("");
        assert!(empty.is_minimum());
        assert_eq!(empty, v("   "));
        assert!(empty < v("0"));
        assert!(empty < v("~"));
    }

    #[test]
    fn test_structurally_empty_rejected() {
        for bad in ["2:", "-1", ":", "1.0-", "..."] {
            assert!(
                matches!(VersionKey::parse(bad), Err(Error::ParseError(_))),
                "expected parse error for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_non_numeric_epoch_is_upstream() {
        let key = v("abc:1.0");
        assert_eq!(key.upstream(), "abc:1.0");
    }

    #[test]
    fn test_ordering_is_total_and_transitive() {
        let inputs = [
            "", "1.0~rc1", "1.0", "01.0", "1.0-0", "1.0-1", "1.0a", "1.0.1", "1.10", "1:0.1",
            "2.0~beta", "2.0", "6.0-1+deb7u1", "6.0-2", "1.0-é",
        ];
        let keys: Vec<VersionKey> = inputs.iter().map(|s| v(s)).collect();

        for a in &keys {
            for b in &keys {
                assert_eq!(a.cmp(b), b.cmp(a).reverse(), "{} vs {}", a, b);
                for c in &keys {
                    if a <= b && b <= c {
                        assert!(a <= c, "{} <= {} <= {}", a, b, c);
                    }
                }
            }
        }

        let mut sorted = keys.clone();
        sorted.sort();
        assert!(sorted.first().unwrap().is_minimum());
        assert_eq!(sorted.last().unwrap().to_string(), "1:0.1");
    }

    #[test]
    fn test_filter_matching() {
        assert!(v("1.2-1").matches(&v("1.2")));
        assert!(v("1.2-3").matches(&v("1.2")));
        assert!(v("1.2").matches(&v("1.2")));
        assert!(!v("1.2-1").matches(&v("1.2-3")));
        assert!(v("1.2-3").matches(&v("1.2-3")));
        assert!(!v("1.3").matches(&v("1.2")));
    }
}
