use super::{Strategy, StrategyContext, attach_privates, ring_edges};
use crate::Error;
use rand::Rng as _;
use rand::SeedableRng as _;
use rand::rngs::StdRng;
use sha2::Digest as _;
use std::collections::BTreeSet;
use uvn_model::{LinkId, StrategyKind};

/// How many edge draws the walk may spend before giving up.
///
/// Callers must treat the budget running out as a normal outcome, not a
/// bug: the walk is best effort and carries no termination proof.
pub const EDGE_BUDGET: usize = 1024;

/// Seeded random walk towards a 2-edge-connected public subgraph.
pub(super) struct Random;

impl Strategy for Random {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Random
    }

    fn degree_bounds(&self, k: usize) -> (usize, usize) {
        match k {
            0 | 1 => (0, 0),
            2 => (1, 1),
            _ => (2, k - 1),
        }
    }

    fn backbone(&self, ctx: &StrategyContext) -> Result<Vec<LinkId>, Error> {
        let publics = ctx.publics();
        let k = publics.len();

        // Too few cells for redundant paths; the ring shape is all there is.
        if k < 3 {
            let mut links = ring_edges(&publics);
            links.extend(attach_privates(&publics, &ctx.privates())?);

            return Ok(links);
        }

        let mut rng = StdRng::from_seed(seed(ctx));
        let mut edges = BTreeSet::new();
        let mut budget = EDGE_BUDGET;

        while !is_two_edge_connected(k, &edges) {
            if budget == 0 {
                tracing::warn!(k, edges = edges.len(), "random walk ran out of budget");
                return Err(Error::StrategyUnsatisfiable);
            }
            budget -= 1;

            let i = rng.gen_range(0..k);
            let j = rng.gen_range(0..k);
            if i == j {
                continue;
            }

            edges.insert((i.min(j), i.max(j)));
        }

        let mut links = edges
            .into_iter()
            .map(|(i, j)| LinkId::backbone(publics[i].id, publics[j].id, 0))
            .collect::<Vec<_>>();
        links.extend(attach_privates(&publics, &ctx.privates())?);

        Ok(links)
    }
}

/// Stable digest over the inputs, so the walk is reproducible for a given
/// cell set.
fn seed(ctx: &StrategyContext) -> [u8; 32] {
    let mut hasher = sha2::Sha256::new();
    hasher.update(ctx.uvn_name.as_str());
    for cell in ctx.publics() {
        hasher.update(cell.id.get().to_be_bytes());
    }

    hasher.finalize().into()
}

/// Connected with no bridges: every node keeps a path to every other if
/// any single edge fails.
fn is_two_edge_connected(nodes: usize, edges: &BTreeSet<(usize, usize)>) -> bool {
    if nodes < 2 {
        return true;
    }

    let mut adjacency = vec![Vec::new(); nodes];
    for (edge_id, &(u, v)) in edges.iter().enumerate() {
        adjacency[u].push((v, edge_id));
        adjacency[v].push((u, edge_id));
    }

    // Iterative DFS computing discovery and low-link times; a bridge is an
    // edge whose far side can not reach back above it.
    let mut disc = vec![usize::MAX; nodes];
    let mut low = vec![usize::MAX; nodes];
    let mut time = 0;
    let mut stack = vec![(0usize, usize::MAX, 0usize)];

    while let Some(frame) = stack.len().checked_sub(1) {
        let (node, via_edge, next) = stack[frame];

        if disc[node] == usize::MAX {
            disc[node] = time;
            low[node] = time;
            time += 1;
        }

        if let Some(&(neighbour, edge_id)) = adjacency[node].get(next) {
            stack[frame].2 += 1;

            if edge_id == via_edge {
                continue;
            }

            if disc[neighbour] == usize::MAX {
                stack.push((neighbour, edge_id, 0));
            } else {
                low[node] = low[node].min(disc[neighbour]);
            }
        } else {
            stack.pop();
            if let Some(&(parent, _, _)) = stack.last() {
                if low[node] > disc[parent] {
                    return false; // bridge between parent and node
                }
                low[parent] = low[parent].min(low[node]);
            }
        }
    }

    disc.iter().all(|&d| d != usize::MAX)
}
