//! Dependency edge semantics.
//!
//! A dependency carries two independent flags that drive two independent
//! scheduler decisions:
//!
//! - `immediate` controls *viability*: an immediate dependency must have
//!   succeeded before the dependent can be dispatched; a deferred one does
//!   not block dispatch (its value is pulled mid-execution through the
//!   context lookup).
//! - `tolerant` controls the *upstream-failure short-circuit*: if any
//!   non-tolerant dependency fails, the dependent is marked failed without
//!   ever running.

use serde::{Deserialize, Serialize};

/// Flag pair describing one dependency edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyType {
    /// Must be satisfied before the dependent is considered viable.
    pub immediate: bool,
    /// The dependent may still run if this dependency fails.
    pub tolerant: bool,
}

impl DependencyType {
    /// Immediate and intolerant: the common case.
    pub const HARD: DependencyType = DependencyType {
        immediate: true,
        tolerant: false,
    };
    /// Deferred and tolerant.
    pub const SOFT: DependencyType = DependencyType {
        immediate: false,
        tolerant: true,
    };
    /// Immediate but tolerant of upstream failure.
    pub const TOLERANT: DependencyType = DependencyType {
        immediate: true,
        tolerant: true,
    };
    /// Deferred but intolerant: the dependent never runs after an upstream
    /// failure, yet dispatch does not wait for success.
    pub const DELAYED: DependencyType = DependencyType {
        immediate: false,
        tolerant: false,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_combinations() {
        assert!(DependencyType::HARD.immediate && !DependencyType::HARD.tolerant);
        assert!(!DependencyType::SOFT.immediate && DependencyType::SOFT.tolerant);
        assert!(DependencyType::TOLERANT.immediate && DependencyType::TOLERANT.tolerant);
        assert!(!DependencyType::DELAYED.immediate && !DependencyType::DELAYED.tolerant);
    }
}
