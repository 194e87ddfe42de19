use super::{Strategy, StrategyContext};
use crate::{Error, StaticGraphIssue};
use std::collections::BTreeMap;
use uvn_model::{LinkId, StrategyKind};

/// The adjacency list comes verbatim from the UVN settings; this strategy
/// only validates it. Repeated pairs become replicas of a multigraph edge.
pub(super) struct StaticGraph;

impl Strategy for StaticGraph {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Static
    }

    fn degree_bounds(&self, k: usize) -> (usize, usize) {
        (0, usize::from(u8::MAX) * k.max(1))
    }

    fn backbone(&self, ctx: &StrategyContext) -> Result<Vec<LinkId>, Error> {
        let cell_by_name = ctx
            .cells
            .iter()
            .map(|cell| (&cell.name, cell))
            .collect::<BTreeMap<_, _>>();

        let mut replicas = BTreeMap::new();
        let mut links = Vec::new();

        for (left, right) in &ctx.settings.deployment.static_edges {
            if left == right {
                return Err(StaticGraphIssue::SelfLoop { cell: left.clone() }.into());
            }

            let resolve = |name: &uvn_model::Name| {
                cell_by_name
                    .get(name)
                    .copied()
                    .ok_or_else(|| StaticGraphIssue::UnknownCell { cell: name.clone() })
            };
            let a = resolve(left)?;
            let b = resolve(right)?;

            if !a.is_public() && !b.is_public() {
                return Err(StaticGraphIssue::PrivatePrivateEdge {
                    a: a.name.clone(),
                    b: b.name.clone(),
                }
                .into());
            }

            let pair = if a.id <= b.id { (a.id, b.id) } else { (b.id, a.id) };
            let replica = replicas.entry(pair).or_insert(0u8);

            links.push(LinkId::backbone(pair.0, pair.1, *replica));
            *replica = replica.checked_add(1).ok_or(Error::StrategyUnsatisfiable)?;
        }

        Ok(links)
    }
}
