//! Observer records for derived models.
//!
//! A derived model registers one observer record per concern; records are
//! kept in insertion order and every notification fires in that order.

use crate::PrivilegeLevel;
use std::fmt;
use std::ops::Deref;

/// Descriptor of an exception contributed by a derived model, merged into
/// the hart's enumerable exception list.
#[derive(Debug, Clone)]
pub struct ExtraException {
    pub name: String,
    pub code: u32,
    pub description: String,
}

/// Callbacks a derived model may implement. All entry points are optional;
/// the defaults do nothing.
pub trait HartObserver {
    /// The hart entered a trap handler targeting `mode`.
    fn trap(&mut self, hart_id: u32, mode: PrivilegeLevel) {
        let _ = (hart_id, mode);
    }

    /// The hart executed an exception return from `mode`.
    fn eret(&mut self, hart_id: u32, mode: PrivilegeLevel) {
        let _ = (hart_id, mode);
    }

    /// The hart was reset.
    fn reset(&mut self, hart_id: u32) {
        let _ = hart_id;
    }

    /// The hart transitioned between running and halted. Fires once per
    /// state transition, not per contributing signal edge.
    fn halt_restart(&mut self, hart_id: u32, halted: bool) {
        let _ = (hart_id, halted);
    }

    /// Extra exception descriptors to include in the enumerable list.
    fn extra_exceptions(&self) -> &[ExtraException] {
        &[]
    }

    /// Snap a read address. The first observer returning `Some` wins.
    fn read_snap(&mut self, address: u32, bytes: u32) -> Option<u32> {
        let _ = (address, bytes);
        None
    }

    /// Snap a write address. The first observer returning `Some` wins.
    fn write_snap(&mut self, address: u32, bytes: u32) -> Option<u32> {
        let _ = (address, bytes);
        None
    }
}

/// Boxed observer, held in the hart's insertion-ordered observer list.
pub struct DynHartObserver(pub Box<dyn HartObserver>);

impl Deref for DynHartObserver {
    type Target = dyn HartObserver;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DynHartObserver {
    pub(crate) fn get_mut(&mut self) -> &mut dyn HartObserver {
        self.0.as_mut()
    }
}

impl fmt::Debug for DynHartObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynHartObserver").finish_non_exhaustive()
    }
}
