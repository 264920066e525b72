//! Resource paths and resource name validation.
//!
//! A path is the sequence of resource names from a root-level resource down
//! to a target, written with `/` separators. Empty segments are ignored, so
//! `"/Garage//Wrench/"` and `"Garage/Wrench"` are the same path. The empty
//! path denotes the root, which is not a stored resource.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Path separator.
pub const SEPARATOR: char = '/';

/// Validate a resource name.
///
/// Names must be non-empty, must not contain the path separator (a name
/// containing `/` could never be reached by path resolution) and must not
/// contain control characters.
pub fn validate_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(TypeError::InvalidName {
            name: name.to_string(),
            reason: "name must not be empty".into(),
        });
    }
    if name.contains(SEPARATOR) {
        return Err(TypeError::InvalidName {
            name: name.to_string(),
            reason: "name must not contain '/'".into(),
        });
    }
    if let Some(ch) = name.chars().find(|c| c.is_control()) {
        return Err(TypeError::InvalidName {
            name: name.to_string(),
            reason: format!("contains control character: {ch:?}"),
        });
    }
    Ok(())
}

/// An ordered list of resource names, root first.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// The root path (no segments).
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a `/`-separated string. Empty segments are dropped.
    pub fn parse(raw: &str) -> Self {
        Self {
            segments: raw
                .split(SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Build a path from already-split segments. Empty segments are dropped.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<String> {
        self.segments
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, if any.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The enclosing path. The root is its own parent.
    pub fn parent(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    /// This path extended by one name.
    pub fn join(&self, name: &str) -> Self {
        let mut out = self.clone();
        out.push(name);
        out
    }

    /// Append the segments of `name` (split on `/`) to this path.
    pub fn push(&mut self, name: &str) {
        self.segments.extend(
            name.split(SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
    }

    /// Returns `true` if `other` is this path or lies underneath it.
    ///
    /// Comparison is per segment: `foo` encloses `foo/bar` but not `foo2`.
    pub fn encloses(&self, other: &ResourcePath) -> bool {
        other.segments.len() >= self.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a == b)
    }
}

impl fmt::Debug for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourcePath({:?})", self.to_string())
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        write!(f, "{}", self.segments.join("/"))
    }
}

impl From<&str> for ResourcePath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl Serialize for ResourcePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResourcePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encloses(ancestor: &str, test: &str) -> bool {
        ResourcePath::parse(ancestor).encloses(&ResourcePath::parse(test))
    }

    #[test]
    fn parse_drops_empty_segments() {
        let p = ResourcePath::parse("/Garage//Wrench/");
        assert_eq!(p.segments(), &["Garage".to_string(), "Wrench".to_string()]);
        assert_eq!(p.to_string(), "Garage/Wrench");
    }

    #[test]
    fn empty_path_is_root() {
        assert!(ResourcePath::parse("").is_root());
        assert!(ResourcePath::parse("///").is_root());
        assert_eq!(ResourcePath::root().to_string(), "/");
    }

    #[test]
    fn parent_and_join() {
        let p = ResourcePath::parse("a/b/c");
        assert_eq!(p.parent(), ResourcePath::parse("a/b"));
        assert_eq!(p.parent().join("d"), ResourcePath::parse("a/b/d"));
        assert_eq!(ResourcePath::root().parent(), ResourcePath::root());
        assert_eq!(p.name(), Some("c"));
    }

    #[test]
    fn encloses_is_segment_aware() {
        assert!(encloses("", ""));
        assert!(!encloses("/a/b/c", "/a/b"));
        assert!(!encloses("/foo/bar", "/a/b/c"));
        assert!(encloses("/foo/bar", "/foo/bar/c"));
        assert!(encloses("/", "/a/b/c"));
        assert!(!encloses("/a/b", ""));
        assert!(encloses("", "/a/b/c"));
        assert!(!encloses("a//b", "a"));
        assert!(encloses("a/", "a/b/"));
        assert!(encloses("//////", "/a/b/c"));
        assert!(encloses("/a//b///c", "////a///b/c/d/e"));
        assert!(!encloses("/foo", "/foo2"));
        assert!(!encloses("/foo", "/foo2/bar"));
    }

    #[test]
    fn validate_name_rules() {
        assert!(validate_name("Wrench").is_ok());
        assert!(validate_name("Box 3 (red)").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("tab\there").is_err());
    }

    #[test]
    fn serde_as_string() {
        let p = ResourcePath::parse("Garage/Wrench");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"Garage/Wrench\"");
        let back: ResourcePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    proptest! {
        #[test]
        fn path_encloses_its_extensions(
            base in proptest::collection::vec("[a-z]{1,4}", 0..4),
            tail in proptest::collection::vec("[a-z]{1,4}", 0..4),
        ) {
            let base_path = ResourcePath::from_segments(base.clone());
            let mut full = base.clone();
            full.extend(tail.clone());
            let full_path = ResourcePath::from_segments(full);
            prop_assert!(base_path.encloses(&full_path));
            if !tail.is_empty() {
                prop_assert!(!full_path.encloses(&base_path));
            }
        }
    }
}
