//! Node lifecycle events.
//!
//! Applications observe node state transitions through callbacks registered
//! on the distributed graph. Each event carries the node and a context
//! describing why the transition happened.

/// Why a node was set local on this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetLocalContext {
    /// The node was just built on this process.
    BuildLocal,
    /// A previously unknown node was imported during a distribution pass.
    ImportNewLocal,
    /// An imported node replaced an existing distant replica; the replica
    /// was upgraded in place (weight and data refreshed from the import),
    /// keeping its adjacency.
    ImportExistingLocal,
    /// Any other cause.
    Unspecified,
}

/// Why a node was set distant on this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetDistantContext {
    /// A distant replica was instantiated as the endpoint of an imported
    /// edge.
    ImportNewDistant,
    /// A local node was exported by a distribution pass and downgraded to a
    /// replica.
    ExportDistant,
    /// Any other cause.
    Unspecified,
}
