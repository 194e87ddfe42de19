use super::{Strategy, StrategyContext, attach_privates};
use crate::Error;
use itertools::Itertools as _;
use uvn_model::{LinkId, StrategyKind};

/// Complete graph over the public cells.
pub(super) struct FullMesh;

impl Strategy for FullMesh {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FullMesh
    }

    fn degree_bounds(&self, k: usize) -> (usize, usize) {
        (k.saturating_sub(1), k.saturating_sub(1))
    }

    fn backbone(&self, ctx: &StrategyContext) -> Result<Vec<LinkId>, Error> {
        let publics = ctx.publics();

        let mut links = publics
            .iter()
            .tuple_combinations()
            .map(|(a, b)| LinkId::backbone(a.id, b.id, 0))
            .collect::<Vec<_>>();
        links.extend(attach_privates(&publics, &ctx.privates())?);

        Ok(links)
    }
}
