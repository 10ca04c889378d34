//! Save/restore of volatile interrupt state.
//!
//! The snapshot covers the state not reachable through the CSR read/write
//! surface: externally-latched pending bits, latched input-signal levels,
//! the basic selector's reporting scratch, the CLIC per-interrupt words,
//! and the cluster-level cliccfg. On restore the per-hart `ipe` summary is
//! rebuilt from the interrupt state and a full re-selection is run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::Cluster;
use crate::hart::clic::Cliccfg;
use crate::hart::interrupts::BasicIntState;
use crate::hart::signals::NetValue;

/// Version identifier for snapshot compatibility checks.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Serializable volatile state of one hart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HartSnapshot {
    /// Externally-asserted pending bitmap.
    pub ip: Vec<u64>,
    /// Latched input-signal levels.
    pub net_value: NetValue,
    /// Basic selector reporting scratch.
    pub int_state: BasicIntState,
    /// Packed `{ip, ie, attr, ctl}` words, one per CLIC interrupt; empty
    /// when no CLIC is present.
    pub clic_int_state: Vec<u32>,
}

/// Serializable volatile state of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub version: String,
    /// Cluster-level cliccfg.
    pub cliccfg: u8,
    pub harts: Vec<HartSnapshot>,
}

/// Failure to apply a snapshot to a cluster.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum RestoreError {
    #[error("unsupported snapshot version {0:?}")]
    Version(String),
    #[error("snapshot hart count does not match cluster")]
    HartCount,
    #[error("snapshot interrupt-state length does not match configuration")]
    StateLength,
}

impl Cluster {
    /// Serialize the cluster's volatile interrupt state.
    pub fn save(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            version: SNAPSHOT_VERSION.to_owned(),
            cliccfg: self.cliccfg().as_raw(),
            harts: self.harts().iter().map(|hart| hart.save_state()).collect(),
        }
    }

    /// Restore a snapshot taken from an identically-configured cluster.
    pub fn restore(&mut self, snapshot: &ClusterSnapshot) -> Result<(), RestoreError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(RestoreError::Version(snapshot.version.clone()));
        }
        if snapshot.harts.len() != self.num_harts() {
            return Err(RestoreError::HartCount);
        }

        let cliccfg = Cliccfg::from_raw(snapshot.cliccfg);
        self.set_cliccfg_raw(cliccfg);

        for (hart, hart_snapshot) in self.harts_mut().iter_mut().zip(&snapshot.harts) {
            hart.set_cliccfg_mirror(cliccfg);
            hart.restore_state(hart_snapshot)?;
        }
        Ok(())
    }
}
