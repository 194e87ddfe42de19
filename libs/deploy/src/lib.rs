//! Deployment-graph construction for the UVN.
//!
//! Turns the registry's cell set into the concrete set of tunnels: the
//! strategy (C4) picks the backbone multigraph, the link generator (C3)
//! materialises every link's endpoint pair from the address plan and the
//! key authority. The result is a [`Deployment`], ready to be embedded in
//! a registry snapshot.
//!
//! Nothing here performs I/O and nothing is published on failure; a failed
//! build leaves only already-ensured link keys behind, which the next
//! successful build either reuses or retires.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod endpoint;
mod generator;
mod graph;
mod strategy;

pub use endpoint::{HostPort, IfaceAddr, Link, LinkEndpoint};
pub use graph::{Deployment, DeploymentGraph};
pub use strategy::{EDGE_BUDGET, Strategy, StrategyContext, strategy_for};

use uvn_model::Name;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("the UVN has no public cell to anchor a deployment")]
    NotDeployable,
    #[error("deployment strategy could not satisfy its contract")]
    StrategyUnsatisfiable,
    #[error("static deployment graph is invalid: {reason}")]
    InvalidStaticGraph { reason: StaticGraphIssue },
    #[error(transparent)]
    Plan(#[from] uvn_netplan::Error),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StaticGraphIssue {
    #[error("edge between private cells `{a}` and `{b}`")]
    PrivatePrivateEdge { a: Name, b: Name },
    #[error("unknown or excluded cell `{cell}`")]
    UnknownCell { cell: Name },
    #[error("self loop at `{cell}`")]
    SelfLoop { cell: Name },
}

impl From<StaticGraphIssue> for Error {
    fn from(reason: StaticGraphIssue) -> Self {
        Error::InvalidStaticGraph { reason }
    }
}
