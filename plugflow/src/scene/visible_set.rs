use super::path_matcher::{MatchResult, PathMatcher};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum DrawMode {
    #[default]
    None,
    Visible,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Visibility {
    pub draw_mode: DrawMode,
    /// Whether children are drawn individually rather than as a bound.
    pub descendants_visible: bool,
}

/// Which locations of a scene are expanded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisibleSet {
    pub expansions: PathMatcher,
}

impl VisibleSet {
    pub fn new(expansions: PathMatcher) -> Self {
        Self { expansions }
    }

    /// Locations shallower than `minimum_expansion_depth` are always expanded.
    pub fn visibility(&self, path: &[String], minimum_expansion_depth: usize) -> Visibility {
        Visibility {
            draw_mode: DrawMode::Visible,
            descendants_visible: path.len() < minimum_expansion_depth
                || self.expansions.match_path(path).intersects(MatchResult::EXACT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::string_to_path;

    #[test]
    fn expansion_by_depth_and_path() {
        let set = VisibleSet::new(PathMatcher::from_paths([string_to_path("/a")]));
        assert!(!set.visibility(&[], 0).descendants_visible);
        assert!(set.visibility(&[], 1).descendants_visible);
        assert!(set.visibility(&string_to_path("/a"), 0).descendants_visible);
        assert!(!set.visibility(&string_to_path("/a/b"), 0).descendants_visible);
        assert!(set.visibility(&string_to_path("/a/b"), 3).descendants_visible);
    }
}
