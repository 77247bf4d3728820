//! Link allocation
//!
//! Splits the ledger listing into the links a participant may still view,
//! one pool per origin, and picks the next one so operator and participant
//! links alternate within a session.

use std::collections::HashSet;

use viewswap_core::{Link, LinkId, ParticipantId, PoolKind};

/// Links still available to one viewer, per origin, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPools {
    pub operator: Vec<Link>,
    pub participant: Vec<Link>,
}

/// Build the candidate pools for `viewer`
///
/// Excludes links the viewer submitted and links already in `viewed`.
/// Insertion order of `links` is preserved within each pool.
pub fn pools<'a>(
    links: impl IntoIterator<Item = &'a Link>,
    viewer: ParticipantId,
    viewed: &HashSet<LinkId>,
) -> LinkPools {
    let mut pools = LinkPools::default();
    for link in links {
        if link.submitter == viewer || viewed.contains(&link.id) {
            continue;
        }
        match link.pool_kind() {
            PoolKind::Operator => pools.operator.push(link.clone()),
            PoolKind::Participant => pools.participant.push(link.clone()),
        }
    }
    pools
}

impl LinkPools {
    pub fn pool(&self, kind: PoolKind) -> &[Link] {
        match kind {
            PoolKind::Operator => &self.operator,
            PoolKind::Participant => &self.participant,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operator.is_empty() && self.participant.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operator.len() + self.participant.len()
    }

    /// Pick the next link to deliver
    ///
    /// Prefers the pool opposite to `last_delivered` (the operator pool when
    /// nothing was delivered yet), falls back to the other pool, and returns
    /// `None` once both are exhausted. The oldest link of the chosen pool
    /// wins.
    pub fn choose(&self, last_delivered: Option<PoolKind>) -> Option<(PoolKind, &Link)> {
        let preferred = last_delivered.map_or(PoolKind::Operator, PoolKind::opposite);
        [preferred, preferred.opposite()]
            .into_iter()
            .find_map(|kind| self.pool(kind).first().map(|link| (kind, link)))
    }
}
