//! Glob pattern compilation and matching for `scan_match`.
//!
//! Patterns compile once into a segment list; matching runs a backtracking
//! walk over the segments. Supported syntax:
//!
//! | Syntax   | Meaning                                      |
//! |----------|----------------------------------------------|
//! | `abc`    | literal bytes (backslash escapes any byte)   |
//! | `?`      | exactly one byte                             |
//! | `*`      | any run of bytes                             |
//! | `**`     | any run of bytes, spanning separators        |
//! | `[abc]`  | one byte from the set                        |
//! | `[a-z]`  | ranges inside a set                          |
//! | `[^abc]` | negated set (`!` also negates)               |
//!
//! Cache keys are flat strings rather than paths, so `*` and `**` accept the
//! same runs; they stay distinct segment kinds so callers can ask
//! [`has_deep_wildcard`](Pattern::has_deep_wildcard).
//!
//! [`prefix`](Pattern::prefix) exposes the literal text before the first
//! wildcard. The scanner uses it to prune the radix tree walk: every key the
//! pattern can match necessarily starts with that prefix.

use crate::error::PatternError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(Vec<u8>),
    AnyByte,
    Run,
    DeepRun,
    Class { set: Vec<u8>, negated: bool },
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    prefix: String,
    segments: Vec<Segment>,
    has_deep: bool,
}

impl Pattern {
    /// Compiles `pattern` into a matchable form.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let bytes = pattern.as_bytes();
        let mut segments = Vec::new();
        let mut has_deep = false;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'*' => {
                    if bytes.get(i + 1) == Some(&b'*') {
                        segments.push(Segment::DeepRun);
                        has_deep = true;
                        i += 2;
                    } else {
                        segments.push(Segment::Run);
                        i += 1;
                    }
                }
                b'?' => {
                    segments.push(Segment::AnyByte);
                    i += 1;
                }
                b'[' => {
                    let (set, negated, end) = parse_class(bytes, i)?;
                    segments.push(Segment::Class { set, negated });
                    i = end;
                }
                _ => {
                    let (literal, end) = parse_literal(bytes, i)?;
                    segments.push(Segment::Literal(literal));
                    i = end;
                }
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            prefix: extract_prefix(bytes),
            segments,
            has_deep,
        })
    }

    /// Returns `true` if `key` matches the pattern.
    pub fn matches(&self, key: &str) -> bool {
        match_segments(&self.segments, key.as_bytes())
    }

    /// Literal text before the first wildcard.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The original pattern string.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// `true` when the pattern contains no wildcards at all.
    pub fn is_literal(&self) -> bool {
        self.segments.len() == 1 && matches!(self.segments[0], Segment::Literal(_))
    }

    /// `true` when the pattern contains a `**` segment.
    pub fn has_deep_wildcard(&self) -> bool {
        self.has_deep
    }
}

fn parse_literal(bytes: &[u8], start: usize) -> Result<(Vec<u8>, usize), PatternError> {
    let mut literal = Vec::new();
    let mut i = start;
    while i < bytes.len() && !matches!(bytes[i], b'*' | b'?' | b'[') {
        if bytes[i] == b'\\' {
            match bytes.get(i + 1) {
                Some(&escaped) => {
                    literal.push(escaped);
                    i += 2;
                }
                None => return Err(PatternError::TrailingEscape),
            }
        } else {
            literal.push(bytes[i]);
            i += 1;
        }
    }
    Ok((literal, i))
}

fn parse_class(bytes: &[u8], open: usize) -> Result<(Vec<u8>, bool, usize), PatternError> {
    let mut i = open + 1;
    let mut negated = false;
    if matches!(bytes.get(i), Some(b'^') | Some(b'!')) {
        negated = true;
        i += 1;
    }

    let mut set = Vec::new();
    while i < bytes.len() && bytes[i] != b']' {
        if bytes[i] == b'\\' {
            match bytes.get(i + 1) {
                Some(&escaped) => {
                    set.push(escaped);
                    i += 2;
                    continue;
                }
                None => return Err(PatternError::TrailingEscape),
            }
        }
        // Range such as a-z, unless the dash closes the class.
        if i + 2 < bytes.len() && bytes[i + 1] == b'-' && bytes[i + 2] != b']' {
            let (lo, hi) = if bytes[i] <= bytes[i + 2] {
                (bytes[i], bytes[i + 2])
            } else {
                (bytes[i + 2], bytes[i])
            };
            set.extend(lo..=hi);
            i += 3;
            continue;
        }
        set.push(bytes[i]);
        i += 1;
    }

    if i >= bytes.len() {
        return Err(PatternError::UnmatchedBracket(open));
    }
    Ok((set, negated, i + 1))
}

fn extract_prefix(bytes: &[u8]) -> String {
    let mut prefix = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'*' | b'?' | b'[' => break,
            b'\\' => match bytes.get(i + 1) {
                Some(&escaped) => {
                    prefix.push(escaped);
                    i += 2;
                }
                None => break,
            },
            b => {
                prefix.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(prefix).unwrap_or_default()
}

fn match_segments(segments: &[Segment], key: &[u8]) -> bool {
    let Some((segment, rest)) = segments.split_first() else {
        return key.is_empty();
    };

    match segment {
        Segment::Literal(literal) => key
            .strip_prefix(literal.as_slice())
            .is_some_and(|tail| match_segments(rest, tail)),
        Segment::AnyByte => !key.is_empty() && match_segments(rest, &key[1..]),
        Segment::Class { set, negated } => {
            let Some((&first, tail)) = key.split_first() else {
                return false;
            };
            let in_set = set.contains(&first);
            if in_set == *negated {
                return false;
            }
            match_segments(rest, tail)
        }
        Segment::Run | Segment::DeepRun => {
            (0..=key.len()).any(|skip| match_segments(rest, &key[skip..]))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(pattern: &str) -> Pattern {
        Pattern::compile(pattern).expect("valid pattern")
    }

    #[test]
    fn literal_patterns_match_exactly() {
        let p = compiled("user:1");
        assert!(p.matches("user:1"));
        assert!(!p.matches("user:12"));
        assert!(!p.matches("user:"));
        assert!(p.is_literal());
    }

    #[test]
    fn question_mark_matches_single_byte() {
        let p = compiled("user:?");
        assert!(p.matches("user:1"));
        assert!(p.matches("user:x"));
        assert!(!p.matches("user:"));
        assert!(!p.matches("user:12"));
    }

    #[test]
    fn star_matches_any_run() {
        let p = compiled("user:*:name");
        assert!(p.matches("user:1:name"));
        assert!(p.matches("user:42:name"));
        assert!(p.matches("user::name"));
        assert!(!p.matches("user:1:email"));
    }

    #[test]
    fn double_star_is_flagged_and_matches_runs() {
        let p = compiled("logs/**/error");
        assert!(p.has_deep_wildcard());
        assert!(p.matches("logs/2024/05/error"));
        assert!(p.matches("logs//error"));
        assert!(!p.matches("logs/2024/warn"));
    }

    #[test]
    fn character_class_with_ranges() {
        let p = compiled("shard-[0-3a-c]");
        for good in ["shard-0", "shard-3", "shard-b"] {
            assert!(p.matches(good), "{good} should match");
        }
        for bad in ["shard-4", "shard-d", "shard-"] {
            assert!(!p.matches(bad), "{bad} should not match");
        }
    }

    #[test]
    fn negated_class_with_caret_or_bang() {
        for pattern in ["tmp[^0-9]", "tmp[!0-9]"] {
            let p = compiled(pattern);
            assert!(p.matches("tmpx"));
            assert!(!p.matches("tmp7"));
        }
    }

    #[test]
    fn escapes_turn_wildcards_into_literals() {
        let p = compiled(r"file\*name\?");
        assert!(p.matches("file*name?"));
        assert!(!p.matches("fileXname?"));
        assert_eq!(p.prefix(), "file*name?");
        assert!(p.is_literal());
    }

    #[test]
    fn prefix_stops_at_first_wildcard() {
        assert_eq!(compiled("user:*:name").prefix(), "user:");
        assert_eq!(compiled("*anything").prefix(), "");
        assert_eq!(compiled("a?c").prefix(), "a");
        assert_eq!(compiled(r"a\*b*").prefix(), "a*b");
    }

    #[test]
    fn compile_errors() {
        assert!(matches!(Pattern::compile(""), Err(PatternError::Empty)));
        assert!(matches!(
            Pattern::compile("oops["),
            Err(PatternError::UnmatchedBracket(4))
        ));
        assert!(matches!(
            Pattern::compile("half[a-"),
            Err(PatternError::UnmatchedBracket(4))
        ));
        assert!(matches!(
            Pattern::compile("bad\\"),
            Err(PatternError::TrailingEscape)
        ));
    }

    #[test]
    fn raw_round_trips() {
        assert_eq!(compiled("user:*").raw(), "user:*");
    }

    #[test]
    fn trailing_star_matches_prefix_extension() {
        let p = compiled("session:*");
        assert!(p.matches("session:"));
        assert!(p.matches("session:abc"));
        assert!(!p.matches("sess"));
    }
}
