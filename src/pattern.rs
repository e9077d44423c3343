//! `*`-wildcard matching shared by both cache tiers.
//!
//! A pattern is split on `*` into literal segments. The first segment must
//! prefix the key, the last must suffix it, and the ones in between must
//! appear in order. A pattern without `*` only matches the identical key.

/// Compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    segments: Vec<String>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            segments: pattern.split('*').map(str::to_string).collect(),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        let (first, rest) = match self.segments.split_first() {
            Some(parts) => parts,
            None => return key.is_empty(),
        };

        // No wildcard at all: exact match.
        let Some((last, middle)) = rest.split_last() else {
            return key == first;
        };

        if key.len() < first.len() + last.len() {
            return false;
        }
        if !key.starts_with(first.as_str()) || !key.ends_with(last.as_str()) {
            return false;
        }

        let mut remaining = &key[first.len()..key.len() - last.len()];
        for segment in middle {
            match remaining.find(segment.as_str()) {
                Some(pos) => remaining = &remaining[pos + segment.len()..],
                None => return false,
            }
        }
        true
    }
}

impl From<&str> for GlobPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_wildcard() {
        let pattern = GlobPattern::new("ads-client42-*");
        assert!(pattern.matches("ads-client42-campaigns"));
        assert!(pattern.matches("ads-client42-"));
        assert!(!pattern.matches("ads-client07-campaigns"));
    }

    #[test]
    fn test_exact_without_wildcard() {
        let pattern = GlobPattern::new("ads:client42");
        assert!(pattern.matches("ads:client42"));
        assert!(!pattern.matches("ads:client42:extra"));
    }

    #[test]
    fn test_anchored_at_both_ends() {
        let pattern = GlobPattern::new("*:client42");
        assert!(pattern.matches("ads:client42"));
        assert!(!pattern.matches("ads:client42:start=2025-01-01"));
    }

    #[test]
    fn test_middle_segments_in_order() {
        let pattern = GlobPattern::new("ads:*:start=*:end=*");
        assert!(pattern.matches("ads:c1:start=2025-01-01:end=2025-01-31"));
        assert!(!pattern.matches("ads:c1:end=2025-01-31:start=2025-01-01"));
    }

    #[test]
    fn test_prefix_and_suffix_do_not_overlap() {
        let pattern = GlobPattern::new("aa*aa");
        assert!(!pattern.matches("aaa"));
        assert!(pattern.matches("aaaa"));
    }

    #[test]
    fn test_star_matches_everything() {
        let pattern = GlobPattern::new("*");
        assert!(pattern.matches(""));
        assert!(pattern.matches("anything:at:all"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = GlobPattern::new("gsc:site.com:*");
        assert!(pattern.matches("gsc:site.com:queries"));
        assert!(!pattern.matches("gsc:siteXcom:queries"));
    }
}
