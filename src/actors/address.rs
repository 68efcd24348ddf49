//! Hierarchical actor addresses.
//!
//! An [`ActorPath`] is an explicit list of segments; the parent address is
//! derived structurally by truncation, and the `/a/b/c` string form exists
//! only at the `Display` boundary. The root path (no segments) addresses
//! the system itself and is never a live actor.

use std::fmt;
use std::sync::Arc;

/// Address of a live or recently live actor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActorPath {
    segments: Arc<Vec<String>>,
}

impl ActorPath {
    /// The system root: parent of all top-level actors.
    #[must_use]
    pub fn root() -> Self {
        Self {
            segments: Arc::new(Vec::new()),
        }
    }

    /// Address of a child one level below this one.
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = (*self.segments).clone();
        segments.push(name.into());
        Self {
            segments: Arc::new(segments),
        }
    }

    /// The parent address, or `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = (*self.segments).clone();
        segments.pop();
        Some(Self {
            segments: Arc::new(segments),
        })
    }

    /// The final segment, or `None` at the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// `true` if `other` is the direct parent of `self`.
    #[must_use]
    pub fn is_child_of(&self, other: &ActorPath) -> bool {
        self.parent().as_ref() == Some(other)
    }

    /// `true` if `self` equals `other` or lies anywhere underneath it.
    #[must_use]
    pub fn is_within(&self, other: &ActorPath) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }
}

impl fmt::Display for ActorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            write!(f, "/")
        } else {
            for segment in self.segments.iter() {
                write!(f, "/{segment}")?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_parent_derivation() {
        let root = ActorPath::root();
        let job = root.child("job-3");
        let proc = job.child("graphprocessor-0");

        assert_eq!(proc.parent(), Some(job.clone()));
        assert_eq!(job.parent(), Some(root.clone()));
        assert_eq!(root.parent(), None);
        assert!(proc.is_child_of(&job));
        assert!(!proc.is_child_of(&root));
    }

    #[test]
    fn display_only_at_boundary() {
        let path = ActorPath::root().child("job-3").child("nodeprocessor-7");
        assert_eq!(path.to_string(), "/job-3/nodeprocessor-7");
        assert_eq!(ActorPath::root().to_string(), "/");
        assert_eq!(path.name(), Some("nodeprocessor-7"));
    }
}
