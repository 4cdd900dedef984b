//! Path template parsing and matching.
//!
//! Template grammar, per segment:
//! - literal: matches itself exactly
//! - `{name}`: captures exactly one segment
//! - `*` (bare or embedded, e.g. `report-*.csv`): matches within one segment
//! - `**`: matches zero or more whole segments; must stand alone
//!
//! Trailing slashes are insignificant: `/a/b/` and `/a/b` are the same path.

use std::cmp::Ordering;

use crate::{Error, Result};

/// One parsed template segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Exact text
    Literal(String),
    /// `{name}` capture
    Param(String),
    /// Segment containing `*` wildcards
    Glob(String),
    /// `**`, spans zero or more segments
    DeepWildcard,
}

impl Segment {
    /// Specificity rank: literal beats capture beats glob beats `**`.
    fn rank(&self) -> u8 {
        match self {
            Self::Literal(_) => 3,
            Self::Param(_) => 2,
            Self::Glob(_) => 1,
            Self::DeepWildcard => 0,
        }
    }
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
    specificity: Vec<u8>,
}

impl PathTemplate {
    /// Parse `path` into a template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the path does not start with `/`, a
    /// `{name}` capture is empty or not a whole segment, or `**` is embedded
    /// inside a segment.
    pub fn parse(path: &str) -> Result<Self> {
        if !path.starts_with('/') {
            return Err(Error::Config(format!(
                "route template must start with '/': {path}"
            )));
        }

        let mut segments = Vec::new();
        for part in split_path(path) {
            let segment = if part == "**" {
                Segment::DeepWildcard
            } else if part.starts_with('{') && part.ends_with('}') {
                let name = &part[1..part.len() - 1];
                if name.is_empty() {
                    return Err(Error::Config(format!(
                        "empty capture name in template: {path}"
                    )));
                }
                Segment::Param(name.to_string())
            } else if part.contains("**") {
                return Err(Error::Config(format!(
                    "'**' must be a whole segment: {path}"
                )));
            } else if part.contains('{') || part.contains('}') {
                return Err(Error::Config(format!(
                    "captures must span a whole segment: {path}"
                )));
            } else if part.contains('*') {
                Segment::Glob(part.to_string())
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        let specificity = segments.iter().map(Segment::rank).collect();
        Ok(Self {
            raw: path.to_string(),
            segments,
            specificity,
        })
    }

    /// The template text as written.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether every segment is a literal, making the template eligible for
    /// the exact-match map.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Per-segment specificity ranks, compared with [`specificity_cmp`].
    #[must_use]
    pub fn specificity(&self) -> &[u8] {
        &self.specificity
    }

    /// Match `path` against the template, returning captures in template
    /// order, or `None` when the path does not fit.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<&str> = split_path(path).collect();
        let mut captures = Vec::new();
        if match_segments(&self.segments, &parts, &mut captures) {
            Some(captures)
        } else {
            None
        }
    }
}

/// Canonical form of a path: leading slash, no trailing slash, no empty
/// segments. Used as the exact-match key on both sides of the lookup.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let joined: Vec<&str> = split_path(path).collect();
    if joined.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", joined.join("/"))
    }
}

/// Split a path into segments, ignoring leading and trailing slashes.
fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.trim_start_matches('/')
        .trim_end_matches('/')
        .split('/')
        .filter(|p| !p.is_empty())
}

fn match_segments(
    template: &[Segment],
    parts: &[&str],
    captures: &mut Vec<(String, String)>,
) -> bool {
    let Some((head, rest)) = template.split_first() else {
        return parts.is_empty();
    };

    if *head == Segment::DeepWildcard {
        // Try every split point, shortest consumption first. Captures made
        // along a failed branch are rolled back before the next attempt.
        for skip in 0..=parts.len() {
            let mark = captures.len();
            if match_segments(rest, &parts[skip..], captures) {
                return true;
            }
            captures.truncate(mark);
        }
        return false;
    }

    let Some((part, tail)) = parts.split_first() else {
        return false;
    };

    let matched = match head {
        Segment::Literal(text) => text == part,
        Segment::Param(name) => {
            captures.push((name.clone(), (*part).to_string()));
            true
        }
        Segment::Glob(pattern) => glob_match(pattern, part),
        Segment::DeepWildcard => unreachable!("handled above"),
    };

    matched && match_segments(rest, tail, captures)
}

/// Match a single-segment glob where `*` spans any run of characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == b'*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star, mark)) = backtrack {
            // Widen the last '*' by one character and retry.
            pi = star + 1;
            ti = mark + 1;
            backtrack = Some((star, mark + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Order two specificity vectors, more specific first.
///
/// Ranks compare segment-wise; the first difference decides. When one vector
/// exhausts first, the shorter template wins: the pair can only both match
/// one path when the longer carries a zero-width `**`, and the template
/// without it is the tighter fit.
#[must_use]
pub fn specificity_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let max = a.len().max(b.len());
    for i in 0..max {
        let ra = a.get(i).copied().unwrap_or(u8::MAX);
        let rb = b.get(i).copied().unwrap_or(u8::MAX);
        match ra.cmp(&rb) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}
