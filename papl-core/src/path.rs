//! Path-parent computation for policy keys.
//!
//! Keys are `/`-separated. A directory key carries a trailing separator
//! (`"a/b/"`), a leaf key does not (`"a/b/c.txt"`). Ascension always lands on
//! a directory key:
//!
//! ```text
//! "a/b/c.txt" → "a/b/" → "a/" → (root, no parent)
//! ```

/// Separator used by policy keys.
pub const PATH_SEPARATOR: char = '/';

/// Compute the parent directory key of `path`.
///
/// Trailing separators are ignored when locating the last segment, so
/// `"a/b"` and `"a/b/"` share the parent `"a/"`. A single segment (`"a"`,
/// `"a/"`) and the empty key have no parent. An absolute key ascends to
/// `"/"`, which itself has no parent.
pub fn parent_of(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches(PATH_SEPARATOR);
    if trimmed.is_empty() {
        return None;
    }

    let idx = trimmed.rfind(PATH_SEPARATOR)?;
    let parent = trimmed[..idx].trim_end_matches(PATH_SEPARATOR);

    let mut out = String::with_capacity(parent.len() + 1);
    out.push_str(parent);
    out.push(PATH_SEPARATOR);
    Some(out)
}

/// Iterate over `path` and every ancestor, nearest first.
///
/// The first item is `path` unchanged; each following item is the
/// [`parent_of`] the previous one.
pub fn ancestors(path: &str) -> Ancestors {
    Ancestors {
        next: Some(path.to_string()),
    }
}

/// Iterator returned by [`ancestors`].
#[derive(Debug, Clone)]
pub struct Ancestors {
    next: Option<String>,
}

impl Iterator for Ancestors {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = parent_of(&current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parent_of_leaf() {
        assert_eq!(parent_of("a/b/c.txt").as_deref(), Some("a/b/"));
    }

    #[test]
    fn test_parent_of_directory() {
        assert_eq!(parent_of("a/b/").as_deref(), Some("a/"));
        assert_eq!(parent_of("a/b").as_deref(), Some("a/"));
    }

    #[test]
    fn test_top_level_has_no_parent() {
        assert_eq!(parent_of("a/"), None);
        assert_eq!(parent_of("a"), None);
        assert_eq!(parent_of(""), None);
        assert_eq!(parent_of("///"), None);
    }

    #[test]
    fn test_absolute_paths() {
        assert_eq!(parent_of("/a/b").as_deref(), Some("/a/"));
        assert_eq!(parent_of("/a").as_deref(), Some("/"));
        assert_eq!(parent_of("/"), None);
    }

    #[test]
    fn test_repeated_separators_collapse() {
        assert_eq!(parent_of("a//b//c").as_deref(), Some("a//b/"));
        assert_eq!(parent_of("a//b/").as_deref(), Some("a/"));
    }

    #[test]
    fn test_ancestors_walk() {
        let walk: Vec<String> = ancestors("x/y/z").collect();
        assert_eq!(walk, vec!["x/y/z", "x/y/", "x/"]);
    }

    fn segment_strategy() -> impl Strategy<Value = String> {
        "[a-z0-9._-]{1,8}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Ascension always terminates: each parent is strictly shorter.
        #[test]
        fn prop_parent_is_shorter(segments in prop::collection::vec(segment_strategy(), 1..6)) {
            let path = segments.join("/");
            let mut current = path.clone();
            let mut steps = 0;
            while let Some(parent) = parent_of(&current) {
                prop_assert!(parent.len() < current.len() || current.ends_with('/'));
                prop_assert!(parent.ends_with('/'));
                current = parent;
                steps += 1;
                prop_assert!(steps <= segments.len());
            }
            prop_assert_eq!(steps, segments.len() - 1);
        }

        /// The parent of a leaf key is the key with its last segment removed.
        #[test]
        fn prop_parent_strips_last_segment(segments in prop::collection::vec(segment_strategy(), 2..6)) {
            let path = segments.join("/");
            let expected = format!("{}/", segments[..segments.len() - 1].join("/"));
            prop_assert_eq!(parent_of(&path), Some(expected));
        }
    }
}
