use std::collections::BTreeSet;
use std::ops::BitOr;

use super::ScenePath;

/// How a path relates to the paths held by a `PathMatcher`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct MatchResult(u8);

impl MatchResult {
    pub const NONE: MatchResult = MatchResult(0);
    /// The path itself is held.
    pub const EXACT: MatchResult = MatchResult(1);
    /// An ancestor of the path is held.
    pub const ANCESTOR: MatchResult = MatchResult(2);
    /// A descendant of the path is held.
    pub const DESCENDANT: MatchResult = MatchResult(4);
    pub const EVERY: MatchResult = MatchResult(7);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn intersects(self, other: MatchResult) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for MatchResult {
    type Output = MatchResult;

    fn bitor(self, rhs: MatchResult) -> MatchResult {
        MatchResult(self.0 | rhs.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathMatcher {
    paths: BTreeSet<ScenePath>,
}

impl PathMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ScenePath>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add_path(&mut self, path: impl Into<ScenePath>) -> bool {
        self.paths.insert(path.into())
    }

    pub fn remove_path(&mut self, path: &[String]) -> bool {
        self.paths.remove(path)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &ScenePath> {
        self.paths.iter()
    }

    pub fn match_path(&self, path: &[String]) -> MatchResult {
        let mut result = MatchResult::NONE;
        if self.paths.contains(path) {
            result = result | MatchResult::EXACT;
        }
        if (0..path.len()).any(|len| self.paths.contains(&path[..len])) {
            result = result | MatchResult::ANCESTOR;
        }
        // Descendants sort directly after the path itself.
        let has_descendant = self
            .paths
            .range::<[String], _>((std::ops::Bound::Excluded(path), std::ops::Bound::Unbounded))
            .next()
            .is_some_and(|next| next.len() > path.len() && next.starts_with(path));
        if has_descendant {
            result = result | MatchResult::DESCENDANT;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::string_to_path;

    #[test]
    fn match_results() {
        let matcher = PathMatcher::from_paths([string_to_path("/a/b"), string_to_path("/c")]);
        assert_eq!(matcher.match_path(&string_to_path("/a/b")), MatchResult::EXACT);
        assert_eq!(matcher.match_path(&string_to_path("/a")), MatchResult::DESCENDANT);
        assert_eq!(matcher.match_path(&[]), MatchResult::DESCENDANT);
        assert_eq!(matcher.match_path(&string_to_path("/a/b/x")), MatchResult::ANCESTOR);
        assert!(matcher.match_path(&string_to_path("/ab")).is_none());
        assert!(matcher.match_path(&string_to_path("/a/bb")).is_none());
    }
}
