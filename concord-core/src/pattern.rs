//! Hierarchical topic patterns.
//!
//! Topics and context keys are dot-separated names (`goal.status_changed`,
//! `browser.tab.url`). A pattern uses the same syntax with two wildcards:
//!
//! - `*` matches exactly one segment
//! - `**` matches zero or more segments
//!
//! `a.b.**` therefore matches `a.b`, `a.b.c` and `a.b.c.d`, while `a.*`
//! matches `a.x` but neither `a` nor `a.x.y`. The event bus and the context
//! store both match through this module.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One compiled segment of a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    /// `*`
    Single,
    /// `**`
    Multi,
}

/// A compiled topic pattern.
///
/// Compiling never fails: any string is a pattern, and a string without
/// wildcards matches only itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct TopicPattern {
    raw: String,
    #[serde(skip)]
    segments: Vec<Segment>,
}

impl TopicPattern {
    pub fn new(pattern: &str) -> Self {
        let mut segments: Vec<Segment> = Vec::new();
        for part in pattern.split('.') {
            let segment = match part {
                "*" => Segment::Single,
                "**" => Segment::Multi,
                literal => Segment::Literal(literal.to_string()),
            };
            // `**.**` is the same as `**`
            if segment == Segment::Multi && segments.last() == Some(&Segment::Multi) {
                continue;
            }
            segments.push(segment);
        }
        Self {
            raw: pattern.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the pattern contains no wildcard.
    pub fn is_exact(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Check whether a concrete topic matches this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic.split('.').collect();
        match_segments(&self.segments, &parts)
    }
}

fn match_segments(pattern: &[Segment], topic: &[&str]) -> bool {
    match pattern.split_first() {
        None => topic.is_empty(),
        Some((Segment::Multi, rest)) => {
            if rest.is_empty() {
                return true;
            }
            (0..=topic.len()).any(|skip| match_segments(rest, &topic[skip..]))
        }
        Some((Segment::Single, rest)) => match topic.split_first() {
            Some((_, tail)) => match_segments(rest, tail),
            None => false,
        },
        Some((Segment::Literal(literal), rest)) => match topic.split_first() {
            Some((head, tail)) => literal == head && match_segments(rest, tail),
            None => false,
        },
    }
}

/// Match a topic against a pattern without keeping the compiled form.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    TopicPattern::new(pattern).matches(topic)
}

impl From<&str> for TopicPattern {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TopicPattern {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<TopicPattern> for String {
    fn from(value: TopicPattern) -> Self {
        value.raw
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern() {
        let p = TopicPattern::new("goal.created");
        assert!(p.is_exact());
        assert!(p.matches("goal.created"));
        assert!(!p.matches("goal.created.extra"));
        assert!(!p.matches("goal"));
        assert!(!p.matches("task.created"));
    }

    #[test]
    fn test_single_wildcard_matches_exactly_one_segment() {
        let p = TopicPattern::new("a.*");
        assert!(!p.is_exact());
        assert!(p.matches("a.x"));
        assert!(!p.matches("a"));
        assert!(!p.matches("a.x.y"));
    }

    #[test]
    fn test_multi_wildcard_matches_zero_or_more_trailing() {
        let p = TopicPattern::new("a.b.**");
        assert!(p.matches("a.b"));
        assert!(p.matches("a.b.c"));
        assert!(p.matches("a.b.c.d"));
        assert!(!p.matches("a"));
        assert!(!p.matches("a.x"));
    }

    #[test]
    fn test_bare_multi_wildcard_matches_everything() {
        let p = TopicPattern::new("**");
        assert!(p.matches("a"));
        assert!(p.matches("a.b.c"));
        assert!(p.matches(""));
    }

    #[test]
    fn test_multi_wildcard_in_the_middle() {
        let p = TopicPattern::new("goal.**.changed");
        assert!(p.matches("goal.changed"));
        assert!(p.matches("goal.status.changed"));
        assert!(p.matches("goal.a.b.changed"));
        assert!(!p.matches("goal.status.created"));
    }

    #[test]
    fn test_consecutive_multi_wildcards_collapse() {
        assert_eq!(
            TopicPattern::new("a.**.**").segments,
            TopicPattern::new("a.**").segments
        );
    }

    #[test]
    fn test_mixed_wildcards() {
        let p = TopicPattern::new("*.tab.**");
        assert!(p.matches("browser.tab"));
        assert!(p.matches("browser.tab.url"));
        assert!(!p.matches("tab.url"));
    }

    #[test]
    fn test_topic_matches_helper() {
        assert!(topic_matches("task.*", "task.assigned"));
        assert!(!topic_matches("task.*", "goal.created"));
    }

    #[test]
    fn test_serde_uses_raw_string() -> Result<(), serde_json::Error> {
        let p = TopicPattern::new("a.*.c");
        let json = serde_json::to_string(&p)?;
        assert_eq!(json, "\"a.*.c\"");
        let back: TopicPattern = serde_json::from_str(&json)?;
        assert!(back.matches("a.b.c"));
        assert_eq!(back, p);
        Ok(())
    }
}
