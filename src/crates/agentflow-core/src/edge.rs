//! Typed directed edges connecting executors.
//!
//! An edge governs how a source executor's outgoing messages reach targets.
//! Three shapes exist:
//!
//! - **Direct** (1 → 1) - optionally guarded by a predicate over the message
//! - **Fan-out** (1 → N) - optionally narrowed by a partitioner selecting
//!   target indices; no partitioner means broadcast
//! - **Fan-in** (N → 1) - gated: the target fires exactly once per *gating
//!   round*, after every declared source has contributed at least one
//!   message
//!
//! A message leaving an executor is routed through **all** matching outgoing
//! edges - there is no implicit selection between them. Predicates and
//! partitioners see the message only, never the context.
//!
//! # Examples
//!
//! ```rust
//! use agentflow_core::edge::Edge;
//! use std::sync::Arc;
//!
//! // Unconditional 1-to-1.
//! let plain = Edge::direct("parse", "validate");
//!
//! // Guarded 1-to-1: only even numbers pass.
//! let guarded = Edge::direct_when("parse", "evens", Arc::new(|msg| {
//!     msg.payload.as_i64().is_some_and(|n| n % 2 == 0)
//! }));
//!
//! // Broadcast to three workers.
//! let broadcast = Edge::fan_out("dispatch", vec!["w1".into(), "w2".into(), "w3".into()]);
//!
//! // Gather one message from each worker.
//! let gather = Edge::fan_in(vec!["w1".into(), "w2".into(), "w3".into()], "aggregate");
//!
//! assert!(plain.is_unconditional_direct());
//! assert!(!guarded.is_unconditional_direct());
//! assert_eq!(broadcast.id(), "fan_out:dispatch->w1|w2|w3");
//! assert_eq!(gather.target_id(), "aggregate");
//! ```

use crate::message::WorkflowMessage;
use std::sync::Arc;

/// Predicate deciding whether a direct edge delivers a message.
pub type EdgePredicate = Arc<dyn Fn(&WorkflowMessage) -> bool + Send + Sync>;

/// Selects fan-out target indices for a message: `(msg, target_count)` to a
/// subset of `0..target_count`.
pub type Partitioner = Arc<dyn Fn(&WorkflowMessage, usize) -> Vec<usize> + Send + Sync>;

/// A directed, typed connection between executors.
#[derive(Clone)]
pub enum Edge {
    /// One source, one target, optional predicate.
    Direct {
        /// Source executor id.
        source: String,
        /// Target executor id.
        target: String,
        /// Delivered iff absent or `condition(msg)` is true.
        condition: Option<EdgePredicate>,
    },

    /// One source, ordered targets, optional partitioner.
    ///
    /// Selected targets are enqueued in declared index order regardless of
    /// the order the partitioner returns.
    FanOut {
        /// Source executor id.
        source: String,
        /// Ordered target executor ids.
        targets: Vec<String>,
        /// Index selector; `None` broadcasts to every target.
        partitioner: Option<Partitioner>,
    },

    /// Ordered sources, one target, gated on all-sources-seen.
    ///
    /// The runtime buffers the most recent message per source
    /// (*latest-per-source*); when every source has contributed in the
    /// current gating round the target receives one synthesized bundle whose
    /// element order matches the declared source order, and a new round
    /// begins.
    FanIn {
        /// Ordered source executor ids.
        sources: Vec<String>,
        /// Target executor id.
        target: String,
    },
}

impl Edge {
    /// Unconditional direct edge.
    pub fn direct(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Direct {
            source: source.into(),
            target: target.into(),
            condition: None,
        }
    }

    /// Direct edge guarded by a predicate.
    pub fn direct_when(
        source: impl Into<String>,
        target: impl Into<String>,
        condition: EdgePredicate,
    ) -> Self {
        Self::Direct {
            source: source.into(),
            target: target.into(),
            condition: Some(condition),
        }
    }

    /// Broadcast fan-out edge.
    pub fn fan_out(source: impl Into<String>, targets: Vec<String>) -> Self {
        Self::FanOut {
            source: source.into(),
            targets,
            partitioner: None,
        }
    }

    /// Fan-out edge narrowed by a partitioner.
    pub fn fan_out_with(
        source: impl Into<String>,
        targets: Vec<String>,
        partitioner: Partitioner,
    ) -> Self {
        Self::FanOut {
            source: source.into(),
            targets,
            partitioner: Some(partitioner),
        }
    }

    /// Gated fan-in edge.
    pub fn fan_in(sources: Vec<String>, target: impl Into<String>) -> Self {
        Self::FanIn {
            sources,
            target: target.into(),
        }
    }

    /// Stable identifier for this edge, used to key fan-in buffers in
    /// checkpoints. Derived from the endpoints, so it survives rebuilds of
    /// the same workflow definition.
    pub fn id(&self) -> String {
        match self {
            Self::Direct { source, target, .. } => format!("direct:{source}->{target}"),
            Self::FanOut { source, targets, .. } => {
                format!("fan_out:{source}->{}", targets.join("|"))
            }
            Self::FanIn { sources, target } => {
                format!("fan_in:{}->{target}", sources.join("|"))
            }
        }
    }

    /// Every source id feeding this edge.
    pub fn source_ids(&self) -> Vec<&str> {
        match self {
            Self::Direct { source, .. } | Self::FanOut { source, .. } => vec![source.as_str()],
            Self::FanIn { sources, .. } => sources.iter().map(String::as_str).collect(),
        }
    }

    /// Every target id this edge may deliver to.
    pub fn target_ids(&self) -> Vec<&str> {
        match self {
            Self::Direct { target, .. } | Self::FanIn { target, .. } => vec![target.as_str()],
            Self::FanOut { targets, .. } => targets.iter().map(String::as_str).collect(),
        }
    }

    /// The single target of a direct or fan-in edge; the first target of a
    /// fan-out edge.
    pub fn target_id(&self) -> &str {
        match self {
            Self::Direct { target, .. } | Self::FanIn { target, .. } => target,
            Self::FanOut { targets, .. } => targets.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// Whether this is a direct edge with no predicate.
    ///
    /// At most one unconditional direct edge may exist per
    /// `(source, target)` pair; the builder rejects duplicates.
    pub fn is_unconditional_direct(&self) -> bool {
        matches!(
            self,
            Self::Direct {
                condition: None,
                ..
            }
        )
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct {
                source,
                target,
                condition,
            } => f
                .debug_struct("Direct")
                .field("source", source)
                .field("target", target)
                .field("condition", &condition.as_ref().map(|_| "<predicate>"))
                .finish(),
            Self::FanOut {
                source,
                targets,
                partitioner,
            } => f
                .debug_struct("FanOut")
                .field("source", source)
                .field("targets", targets)
                .field("partitioner", &partitioner.as_ref().map(|_| "<partitioner>"))
                .finish(),
            Self::FanIn { sources, target } => f
                .debug_struct("FanIn")
                .field("sources", sources)
                .field("target", target)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn edge_ids_are_stable_and_distinct() {
        let a = Edge::direct("x", "y");
        let b = Edge::direct("x", "y");
        assert_eq!(a.id(), b.id());

        let c = Edge::fan_in(vec!["x".into(), "z".into()], "y");
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn endpoints_enumerate_correctly() {
        let edge = Edge::fan_in(vec!["a".into(), "b".into()], "t");
        assert_eq!(edge.source_ids(), vec!["a", "b"]);
        assert_eq!(edge.target_ids(), vec!["t"]);

        let edge = Edge::fan_out("s", vec!["t1".into(), "t2".into()]);
        assert_eq!(edge.source_ids(), vec!["s"]);
        assert_eq!(edge.target_ids(), vec!["t1", "t2"]);
    }

    #[test]
    fn predicate_presence_affects_unconditional_check() {
        let plain = Edge::direct("a", "b");
        assert!(plain.is_unconditional_direct());

        let guarded = Edge::direct_when("a", "b", Arc::new(|m| m.payload == json!(1)));
        assert!(!guarded.is_unconditional_direct());
    }
}
