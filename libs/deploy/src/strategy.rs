mod full_mesh;
mod random;
mod ring;
mod static_graph;

pub use random::EDGE_BUDGET;

use crate::Error;
use uvn_model::{Cell, LinkId, Name, StrategyKind, UvnSettings};

/// Everything a strategy may look at. Strategies are pure: same context,
/// same graph.
pub struct StrategyContext<'a> {
    /// Non-excluded cells in ascending id order.
    pub cells: &'a [Cell],
    pub settings: &'a UvnSettings,
    pub uvn_name: &'a Name,
}

impl StrategyContext<'_> {
    /// Public cells in ring order (ascending id).
    pub fn publics(&self) -> Vec<&Cell> {
        self.cells.iter().filter(|c| c.is_public()).collect()
    }

    pub fn privates(&self) -> Vec<&Cell> {
        self.cells.iter().filter(|c| !c.is_public()).collect()
    }
}

/// A backbone-shaping strategy, selected by the UVN settings tag.
pub trait Strategy: Sync {
    fn kind(&self) -> StrategyKind;

    /// Inclusive bounds on the public-to-public backbone degree of every
    /// public cell, for `k` public cells.
    fn degree_bounds(&self, k: usize) -> (usize, usize);

    fn backbone(&self, ctx: &StrategyContext) -> Result<Vec<LinkId>, Error>;
}

static CIRCULAR: ring::Circular = ring::Circular;
static CROSSED: ring::Crossed = ring::Crossed;
static FULL_MESH: full_mesh::FullMesh = full_mesh::FullMesh;
static STATIC: static_graph::StaticGraph = static_graph::StaticGraph;
static RANDOM: random::Random = random::Random;

/// The static registry mapping a settings tag to its implementation.
pub fn strategy_for(kind: StrategyKind) -> &'static dyn Strategy {
    match kind {
        StrategyKind::Circular => &CIRCULAR,
        StrategyKind::Crossed => &CROSSED,
        StrategyKind::FullMesh => &FULL_MESH,
        StrategyKind::Static => &STATIC,
        StrategyKind::Random => &RANDOM,
    }
}

/// Ring edges over the public cells: each peers with its two neighbours,
/// one peer if only two cells, none if fewer.
fn ring_edges(publics: &[&Cell]) -> Vec<LinkId> {
    match publics {
        [] | [_] => Vec::new(),
        [a, b] => vec![LinkId::backbone(a.id, b.id, 0)],
        _ => (0..publics.len())
            .map(|i| {
                let next = (i + 1) % publics.len();

                LinkId::backbone(publics[i].id, publics[next].id, 0)
            })
            .collect(),
    }
}

/// Every private cell gets exactly one backbone link, to the public cell
/// at ring position `(id - 1) mod K`.
fn attach_privates(publics: &[&Cell], privates: &[&Cell]) -> Result<Vec<LinkId>, Error> {
    if privates.is_empty() {
        return Ok(Vec::new());
    }

    if publics.is_empty() {
        return Err(Error::NotDeployable);
    }

    Ok(privates
        .iter()
        .map(|private| {
            let position = (private.id.get() as usize - 1) % publics.len();

            LinkId::backbone(private.id, publics[position].id, 0)
        })
        .collect())
}

/// Post-conditions every automatic strategy must satisfy; violations are
/// a strategy bug surfaced as [`Error::StrategyUnsatisfiable`].
pub(crate) fn check_contract(
    strategy: &dyn Strategy,
    ctx: &StrategyContext,
    links: &[LinkId],
) -> Result<(), Error> {
    let publics = ctx.publics();
    let public_ids = publics.iter().map(|c| c.id).collect::<std::collections::BTreeSet<_>>();

    // Backbone links terminate at a public cell on at least one side,
    // no matter which strategy produced them.
    for link in links {
        let LinkId::Backbone { a, b, .. } = *link else {
            return Err(Error::StrategyUnsatisfiable);
        };

        if !public_ids.contains(&a) && !public_ids.contains(&b) {
            return Err(Error::StrategyUnsatisfiable);
        }
    }

    if strategy.kind() == StrategyKind::Static {
        // The operator owns the shape; only the hard rules above apply.
        return Ok(());
    }

    let (min, max) = strategy.degree_bounds(publics.len());
    for public in &publics {
        let degree = links
            .iter()
            .filter(|link| {
                let LinkId::Backbone { a, b, .. } = **link else {
                    return false;
                };

                (a == public.id && public_ids.contains(&b))
                    || (b == public.id && public_ids.contains(&a))
            })
            .count();

        if degree < min || degree > max {
            tracing::warn!(
                cell = %public.name,
                degree,
                min,
                max,
                "strategy violated its degree contract"
            );
            return Err(Error::StrategyUnsatisfiable);
        }
    }

    for private in ctx.privates() {
        let incident = links
            .iter()
            .filter(|link| link.touches(private.id))
            .count();

        if incident != 1 {
            return Err(Error::StrategyUnsatisfiable);
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeSet;
    use uvn_model::{Cell, CellId};

    pub fn cell(id: u32, public: bool) -> Cell {
        Cell {
            id: CellId::new(id),
            name: format!("cell-{id}").parse().unwrap(),
            address: public.then(|| format!("cell-{id}.example")),
            allowed_lans: BTreeSet::new(),
            excluded: false,
            owner: "op@example.com".parse().unwrap(),
        }
    }
}
