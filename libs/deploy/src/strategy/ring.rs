use super::{Strategy, StrategyContext, attach_privates, ring_edges};
use crate::Error;
use std::collections::BTreeSet;
use uvn_model::{LinkId, StrategyKind};

/// Public cells on a ring by id; private cells hang off their assigned
/// public cell.
pub(super) struct Circular;

impl Strategy for Circular {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Circular
    }

    fn degree_bounds(&self, k: usize) -> (usize, usize) {
        match k {
            0 | 1 => (0, 0),
            2 => (1, 1),
            _ => (2, 2),
        }
    }

    fn backbone(&self, ctx: &StrategyContext) -> Result<Vec<LinkId>, Error> {
        let publics = ctx.publics();

        let mut links = ring_edges(&publics);
        links.extend(attach_privates(&publics, &ctx.privates())?);

        Ok(links)
    }
}

/// The ring plus a chord from each position in the first half to the
/// opposite side, for shorter worst-case paths.
pub(super) struct Crossed;

impl Strategy for Crossed {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Crossed
    }

    fn degree_bounds(&self, k: usize) -> (usize, usize) {
        match k {
            0 | 1 => (0, 0),
            2 => (1, 1),
            _ => (2, 3),
        }
    }

    fn backbone(&self, ctx: &StrategyContext) -> Result<Vec<LinkId>, Error> {
        let publics = ctx.publics();
        let k = publics.len();

        let mut links = ring_edges(&publics).into_iter().collect::<BTreeSet<_>>();

        if k >= 3 {
            // With K odd the half-way offset rounds down; for K = 3 every
            // chord collapses onto a ring edge and the set stays a ring.
            let offset = k / 2;

            for i in 0..k / 2 {
                let chord = LinkId::backbone(publics[i].id, publics[(i + offset) % k].id, 0);
                links.insert(chord);
            }
        }

        let mut links = links.into_iter().collect::<Vec<_>>();
        links.extend(attach_privates(&publics, &ctx.privates())?);

        Ok(links)
    }
}
