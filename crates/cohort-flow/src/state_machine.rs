//! Explicit `(status, action) -> status` transition tables.
//!
//! Task and function lifecycles are both described as a static list of edges.
//! Looking up an edge is the only way to obtain a destination status, so a status
//! can never change along an edge that is not in the table.

use std::fmt::Debug;

/// One edge family of a transition table: `action` moves any of `sources` to `destination`.
#[derive(Debug, Clone, Copy)]
pub struct Transition<S: 'static, A> {
    /// The action triggering the transition.
    pub action: A,
    /// Statuses from which the action is legal.
    pub sources: &'static [S],
    /// Status reached after the action.
    pub destination: S,
}

/// A static transition table.
#[derive(Debug, Clone, Copy)]
pub struct TransitionTable<S: 'static, A: 'static> {
    edges: &'static [Transition<S, A>],
}

impl<S, A> TransitionTable<S, A>
where
    S: Copy + Eq + Debug,
    A: Copy + Eq + Debug,
{
    /// Creates a table from a static edge list.
    #[must_use]
    pub const fn new(edges: &'static [Transition<S, A>]) -> Self {
        Self { edges }
    }

    /// Returns the destination of `action` applied in status `from`, if legal.
    #[must_use]
    pub fn next(&self, from: S, action: A) -> Option<S> {
        self.edges
            .iter()
            .find(|edge| edge.action == action && edge.sources.contains(&from))
            .map(|edge| edge.destination)
    }

    /// Returns true if `action` is legal in status `from`.
    #[must_use]
    pub fn can_apply(&self, from: S, action: A) -> bool {
        self.next(from, action).is_some()
    }
}
