//! A pure, synchronous snapshot of the backend's state, giving an
//! out-of-scope presentation layer (an HTTP status page) a stable seam to
//! call into without depending on any web framework here (§4.7).

use serde::Serialize;

/// A point-in-time summary safe to serialize and hand to an external
/// renderer.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub groups: Vec<GroupStatus>,
    pub moderator_count: usize,
    pub blacklist_count: usize,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupStatus {
    pub name: String,
    pub count: usize,
    pub low: u64,
    pub high: u64,
}

/// Builds a [`StatusSnapshot`] from already-fetched group summaries, so
/// this function stays synchronous and independent of the backend's
/// locking -- callers gather the async pieces first.
pub fn build_snapshot(
    groups: &[crate::backend::GroupSummary],
    moderator_count: usize,
    blacklist_count: usize,
    uptime_seconds: u64,
) -> StatusSnapshot {
    StatusSnapshot {
        groups: groups
            .iter()
            .map(|g| GroupStatus {
                name: g.name.clone(),
                count: g.count,
                low: g.low,
                high: g.high,
            })
            .collect(),
        moderator_count,
        blacklist_count,
        uptime_seconds,
    }
}
