use serde::{Deserialize, Serialize};

use crate::io::pandapower::Network;

/// The tables right after loading: slack generator added, bus table doubled.
///
/// Captured once and shared between copies of a backend; resetting restores
/// a fresh clone of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    network: Network,
}

impl GridSnapshot {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// An independent copy of the captured tables.
    pub fn restore(&self) -> Network {
        self.network.clone()
    }
}
