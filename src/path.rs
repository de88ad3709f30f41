//! Attribute paths.
//!
//! An [`AttributePath`] addresses a value inside a resource's value tree. Paths
//! are structural: each step says whether it names an object attribute, a list
//! position, or a map/set key. Diagnostics carry paths so the engine can point
//! at the offending configuration.
//!
//! The dotted string form (`"rules.0.port"`) is accepted everywhere a path is
//! taken. Dotted paths are resolved against the schema before use, so a
//! numeric segment under a list becomes an index while the same segment under
//! a map stays a key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single step in an [`AttributePath`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStep {
    /// An attribute of an object or block.
    Attribute(String),
    /// A position in a list.
    Index(usize),
    /// A map key, or the equivalence key of a set element.
    Key(String),
}

impl PathStep {
    /// The step rendered as it appears in a dotted path.
    pub fn as_segment(&self) -> String {
        match self {
            Self::Attribute(name) | Self::Key(name) => name.clone(),
            Self::Index(i) => i.to_string(),
        }
    }
}

/// A structural path to a value.
///
/// The empty path addresses the root object.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributePath {
    steps: Vec<PathStep>,
}

impl AttributePath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from raw steps.
    pub fn from_steps(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    /// Parse a dotted path. Numeric segments become indices, everything else
    /// an attribute step. Use the schema to resolve map and set steps.
    pub fn parse(path: &str) -> Self {
        if path.is_empty() {
            return Self::root();
        }
        let steps = path
            .split('.')
            .map(|seg| match seg.parse::<usize>() {
                Ok(i) => PathStep::Index(i),
                Err(_) => PathStep::Attribute(seg.to_string()),
            })
            .collect();
        Self { steps }
    }

    /// Extend the path with an attribute step.
    pub fn attribute(&self, name: impl Into<String>) -> Self {
        self.with_step(PathStep::Attribute(name.into()))
    }

    /// Extend the path with a list index.
    pub fn index(&self, index: usize) -> Self {
        self.with_step(PathStep::Index(index))
    }

    /// Extend the path with a map or set key.
    pub fn key(&self, key: impl Into<String>) -> Self {
        self.with_step(PathStep::Key(key.into()))
    }

    /// Extend the path with an arbitrary step.
    pub fn with_step(&self, step: PathStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    /// Append a step in place.
    pub fn push(&mut self, step: PathStep) {
        self.steps.push(step);
    }

    /// The steps of this path.
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True for the root path.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The top-level attribute name, if the path starts with one.
    pub fn root_attribute(&self) -> Option<&str> {
        match self.steps.first() {
            Some(PathStep::Attribute(name)) => Some(name),
            _ => None,
        }
    }

    /// The last step.
    pub fn last(&self) -> Option<&PathStep> {
        self.steps.last()
    }

    /// The path without its last step.
    pub fn parent(&self) -> Option<Self> {
        if self.steps.is_empty() {
            return None;
        }
        Some(Self {
            steps: self.steps[..self.steps.len() - 1].to_vec(),
        })
    }

    /// True if `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &AttributePath) -> bool {
        self.steps.starts_with(&prefix.steps)
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(&step.as_segment())?;
        }
        Ok(())
    }
}

impl From<&str> for AttributePath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl From<String> for AttributePath {
    fn from(path: String) -> Self {
        Self::parse(&path)
    }
}

impl From<&AttributePath> for AttributePath {
    fn from(path: &AttributePath) -> Self {
        path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotted_path() {
        let path = AttributePath::parse("rules.0.port");
        assert_eq!(
            path.steps(),
            &[
                PathStep::Attribute("rules".to_string()),
                PathStep::Index(0),
                PathStep::Attribute("port".to_string()),
            ]
        );
        assert_eq!(path.to_string(), "rules.0.port");
    }

    #[test]
    fn test_root_path() {
        let path = AttributePath::parse("");
        assert!(path.is_empty());
        assert_eq!(path.to_string(), "");
        assert!(path.parent().is_none());
    }

    #[test]
    fn test_builders_and_display() {
        let path = AttributePath::root().attribute("labels").key("env");
        assert_eq!(path.to_string(), "labels.env");
        assert_eq!(path.root_attribute(), Some("labels"));
        assert_eq!(path.last(), Some(&PathStep::Key("env".to_string())));
    }

    #[test]
    fn test_prefix_and_parent() {
        let parent = AttributePath::parse("disk");
        let child = parent.index(2).attribute("size");
        assert!(child.starts_with(&parent));
        assert!(!parent.starts_with(&child));
        assert_eq!(child.parent(), Some(parent.index(2)));
    }

    #[test]
    fn test_ordering_is_stable() {
        let mut paths = vec![
            AttributePath::parse("b"),
            AttributePath::parse("a.1"),
            AttributePath::parse("a.0"),
            AttributePath::parse("a"),
        ];
        paths.sort();
        let rendered: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, vec!["a", "a.0", "a.1", "b"]);
    }
}
