//! Basic (`mip`/`mie`) interrupt controller state and selector.

use serde::{Deserialize, Serialize};

use super::Hart;
use crate::{isa, PrivilegeLevel};

// Software-writable pending bits (via the mip/sip CSRs). The M-level bits
// are managed externally: MEIP by the interrupt fabric, MTIP by the timer,
// MSIP by memory-mapped control registers.
#[allow(clippy::identity_op)]
const SWIP_WRITABLE: u64 = 0
    | (1 << 0) // USIP
    | (1 << 1) // SSIP
    | (1 << 4) // UTIP
    | (1 << 5) // STIP
    | (1 << 8) // UEIP
    | (1 << 9); // SEIP

// Interrupts delegatable to S-mode via mideleg.
const S_DELEGATABLE: u64 = (1 << 1) | (1 << 5) | (1 << 9);

// Interrupts delegatable to U-mode via sideleg (requires the N extension).
const U_DELEGATABLE: u64 = (1 << 0) | (1 << 4) | (1 << 8);

// medeleg bit 11 (ECALL from M) is hardwired to zero; sedeleg additionally
// cannot delegate ECALL from S or M.
const MEDELEG_FIXED_ZERO: u64 = 1 << 11;
const SEDELEG_FIXED_ZERO: u64 = 0b111 << 9;

/// Basic interrupt-controller registers.
///
/// `mip` is the composed value visible to guest software: the
/// externally-latched pending bits ORed with the software-asserted bits
/// (`swip`), recomputed whenever either side changes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Interrupts {
    mip: u64,
    mie: u64,
    mideleg: u64,
    sideleg: u64,
    medeleg: u64,
    sedeleg: u64,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    pub fn new() -> Self {
        Self {
            mip: 0,
            mie: 0,
            mideleg: 0,
            sideleg: 0,
            medeleg: 0,
            sedeleg: 0,
        }
    }

    pub fn mip(&self) -> u64 {
        self.mip
    }

    pub(crate) fn set_mip(&mut self, value: u64) {
        self.mip = value;
    }

    pub fn mie(&self) -> u64 {
        self.mie
    }

    pub fn mideleg(&self) -> u64 {
        self.mideleg
    }

    pub fn sideleg(&self) -> u64 {
        self.sideleg
    }

    pub fn medeleg(&self) -> u64 {
        self.medeleg
    }

    pub fn sedeleg(&self) -> u64 {
        self.sedeleg
    }
}

/// The selected deliverable interrupt, or `id: None` when no interrupt is
/// currently deliverable.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PendEnab {
    pub id: Option<u32>,
    pub privilege: PrivilegeLevel,
    pub level: u8,
    pub is_clic: bool,
}

impl Default for PendEnab {
    fn default() -> Self {
        Self {
            id: None,
            privilege: PrivilegeLevel::User,
            level: 0,
            is_clic: false,
        }
    }
}

/// Factors contributing to basic interrupt state, kept only to report
/// selector transitions once per change.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct BasicIntState {
    pub pending_enabled: u64,
    pub pending: u64,
    pub pending_external: u64,
    pub pending_internal: u64,
    pub mideleg: u64,
    pub sideleg: u64,
    pub mie: bool,
    pub sie: bool,
    pub uie: bool,
}

/// Fixed priority of the standard interrupts; local and custom interrupts
/// rank lowest. This ordering is mandated by the privileged architecture.
fn int_pri(code: u32) -> u32 {
    match code {
        4 => 1,  // UTimer
        0 => 2,  // USoftware
        8 => 3,  // UExternal
        5 => 4,  // STimer
        1 => 5,  // SSoftware
        9 => 6,  // SExternal
        7 => 7,  // MTimer
        3 => 8,  // MSoftware
        11 => 9, // MExternal
        _ => 0,
    }
}

impl Hart {
    //
    // CSR accessors
    //

    pub fn read_mip(&self) -> u32 {
        self.interrupts.mip() as u32
    }

    /// Writes to MEIP, MTIP, and MSIP are ignored; their values are managed
    /// externally. The remaining standard bits land in the
    /// software-asserted pending set.
    pub fn write_mip(&mut self, value: u32, mask: u32) {
        let mask = mask as u64 & SWIP_WRITABLE & self.masks.interrupts;
        self.swip = self.swip & !mask | value as u64 & mask;
        self.update_pending();
    }

    pub fn read_mie(&self) -> u32 {
        self.interrupts.mie() as u32
    }

    pub fn write_mie(&mut self, value: u32, mask: u32) {
        let mask = mask as u64 & self.masks.interrupts;
        self.interrupts.mie = self.interrupts.mie & !mask | value as u64 & mask;
        self.test_interrupt();
    }

    pub fn read_mideleg(&self) -> u32 {
        self.interrupts.mideleg() as u32
    }

    /// The mideleg register is **WARL**.
    pub fn write_mideleg(&mut self, value: u32, mask: u32) {
        if self.config().arch & isa::S == 0 {
            return;
        }
        let writable = (S_DELEGATABLE | self.local_interrupt_bits()) & self.masks.interrupts;
        let mask = mask as u64 & writable;
        self.interrupts.mideleg = self.interrupts.mideleg & !mask | value as u64 & mask;
        self.test_interrupt();
    }

    pub fn read_sideleg(&self) -> u32 {
        self.interrupts.sideleg() as u32
    }

    /// The sideleg register is **WARL**; it exists only with the N
    /// extension.
    pub fn write_sideleg(&mut self, value: u32, mask: u32) {
        if self.config().arch & isa::N == 0 {
            return;
        }
        let writable = (U_DELEGATABLE | self.local_interrupt_bits()) & self.masks.interrupts;
        let mask = mask as u64 & writable;
        self.interrupts.sideleg = self.interrupts.sideleg & !mask | value as u64 & mask;
        self.test_interrupt();
    }

    pub fn read_medeleg(&self) -> u32 {
        self.interrupts.medeleg() as u32
    }

    /// The medeleg register is **WARL**; ECALL-from-M cannot be delegated.
    pub fn write_medeleg(&mut self, value: u32, mask: u32) {
        if self.config().arch & isa::S == 0 {
            return;
        }
        let writable = self.masks.exceptions & !MEDELEG_FIXED_ZERO;
        let mask = mask as u64 & writable;
        self.interrupts.medeleg = self.interrupts.medeleg & !mask | value as u64 & mask;
    }

    pub fn read_sedeleg(&self) -> u32 {
        self.interrupts.sedeleg() as u32
    }

    pub fn write_sedeleg(&mut self, value: u32, mask: u32) {
        if self.config().arch & isa::N == 0 {
            return;
        }
        let writable = self.masks.exceptions & !SEDELEG_FIXED_ZERO;
        let mask = mask as u64 & writable;
        self.interrupts.sedeleg = self.interrupts.sedeleg & !mask | value as u64 & mask;
    }

    pub fn read_sip(&self) -> u32 {
        (self.interrupts.mip() & self.interrupts.mideleg()) as u32
    }

    /// Only SSIP is software-writable through sip.
    pub fn write_sip(&mut self, value: u32, mask: u32) {
        self.write_mip(value, mask & (1 << 1));
    }

    pub fn read_sie(&self) -> u32 {
        (self.interrupts.mie() & self.interrupts.mideleg()) as u32
    }

    pub fn write_sie(&mut self, value: u32, mask: u32) {
        let delegated = self.interrupts.mideleg() as u32;
        self.write_mie(value, mask & delegated);
    }

    fn local_interrupt_bits(&self) -> u64 {
        crate::exception::local_interrupt_mask(self.config().local_int_num)
    }

    //
    // Pending-state composition
    //

    /// Recompute mip from the external and software pending sets, and
    /// re-test interrupts on a change.
    pub(crate) fn update_pending(&mut self) {
        let old = self.interrupts.mip();
        let new = self.ip[0] | self.swip;
        if old != new {
            self.interrupts.set_mip(new);
            self.test_interrupt();
        }
    }

    //
    // Delegation
    //

    /// The mode an interrupt with the given cause code traps to, per
    /// mideleg/sideleg. Traps never go to a lower privilege than the
    /// current one.
    pub(crate) fn interrupt_mode_x(&self, code: u32) -> PrivilegeLevel {
        self.mode_x(self.interrupts.mideleg(), self.interrupts.sideleg(), code)
    }

    /// The mode a synchronous exception with the given cause code traps
    /// to, per medeleg/sedeleg.
    pub(crate) fn exception_mode_x(&self, code: u32) -> PrivilegeLevel {
        self.mode_x(self.interrupts.medeleg(), self.interrupts.sedeleg(), code)
    }

    fn mode_x(&self, m_mask: u64, s_mask: u64, code: u32) -> PrivilegeLevel {
        let mode_y = self.current_mode();
        let bit = 1u64 << (code & 63);
        let mode_x = if m_mask & bit == 0 {
            PrivilegeLevel::Machine
        } else if s_mask & bit == 0 {
            PrivilegeLevel::Supervisor
        } else {
            PrivilegeLevel::User
        };
        mode_x.max(mode_y)
    }

    //
    // Selection
    //

    /// Effective interrupt enable for the given mode: forced off when the
    /// mode runs in CLIC mode, on when executing below it, off when
    /// executing above it, and the raw `xstatus.xIE` bit when executing in
    /// it.
    fn effective_ie(&self, mode_ie: PrivilegeLevel) -> bool {
        if self.use_clic(mode_ie) {
            return false;
        }
        let mode = self.current_mode();
        if mode < mode_ie {
            true
        } else if mode > mode_ie {
            false
        } else {
            self.status.ie(mode_ie)
        }
    }

    /// Refresh the basic-mode pending-and-enabled selection into
    /// `pend_enab`.
    pub(crate) fn refresh_basic(&mut self) {
        let mut pending_enabled = self.interrupts.mip() & self.interrupts.mie();

        if pending_enabled != 0 {
            let mie = self.effective_ie(PrivilegeLevel::Machine);
            let sie = self.effective_ie(PrivilegeLevel::Supervisor);
            let uie = self.effective_ie(PrivilegeLevel::User);

            let mideleg = self.interrupts.mideleg();
            let sideleg = self.interrupts.sideleg() & mideleg;
            let m_mask = !mideleg;
            let s_mask = mideleg & !sideleg;
            let u_mask = sideleg;

            if !mie {
                pending_enabled &= !m_mask;
            }
            if !sie {
                pending_enabled &= !s_mask;
            }
            if !uie {
                pending_enabled &= !u_mask;
            }
        }

        let state = BasicIntState {
            pending_enabled,
            pending: self.interrupts.mip(),
            pending_external: self.ip[0],
            pending_internal: self.swip,
            mideleg: self.interrupts.mideleg(),
            sideleg: self.interrupts.sideleg(),
            mie: self.status.ie(PrivilegeLevel::Machine),
            sie: self.status.ie(PrivilegeLevel::Supervisor),
            uie: self.status.ie(PrivilegeLevel::User),
        };
        // Report only when the interrupt state changes.
        if state != self.int_state {
            self.int_state = state;
            self.trace_selector();
        }

        // Select the winner: highest destination privilege first, then the
        // fixed priority order.
        let mut id = 0u32;
        let mut remaining = pending_enabled;
        while remaining != 0 {
            if remaining & 1 != 0 {
                let privilege = self.interrupt_mode_x(id);
                let take = match self.pend_enab.id {
                    None => true,
                    Some(selected) => {
                        if self.pend_enab.privilege < privilege {
                            true
                        } else if self.pend_enab.privilege > privilege {
                            false
                        } else {
                            int_pri(selected) <= int_pri(id)
                        }
                    }
                };
                if take {
                    self.pend_enab = PendEnab {
                        id: Some(id),
                        privilege,
                        level: 0,
                        is_clic: false,
                    };
                }
            }
            remaining >>= 1;
            id += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::Config;

    fn hart() -> Hart {
        Hart::new(Config::default())
    }

    #[test]
    fn test_mip_composes_external_and_software() {
        let mut hart = hart();
        hart.set_interrupt(9, true); // external SEIP
        assert_eq!(1 << 9, hart.read_mip());
        hart.write_mip(1 << 1, u32::MAX); // software SSIP
        assert_eq!((1 << 9) | (1 << 1), hart.read_mip());
        // Deasserting the external input leaves the software bit.
        hart.set_interrupt(9, false);
        assert_eq!(1 << 1, hart.read_mip());
    }

    #[test]
    fn test_mip_machine_bits_not_software_writable() {
        let mut hart = hart();
        hart.write_mip(u32::MAX, u32::MAX);
        assert_eq!(0, hart.read_mip() & ((1 << 3) | (1 << 7) | (1 << 11)));
    }

    #[test]
    fn test_priority_order_same_privilege() {
        let mut hart = hart();
        // All machine-level interrupts pending and enabled, taken from M
        // with MIE set.
        hart.status.set_ie(PrivilegeLevel::Machine, true);
        hart.write_mie((1 << 3) | (1 << 7) | (1 << 11), u32::MAX);
        for code in [3, 7, 11] {
            hart.set_interrupt(code, true);
        }
        assert_eq!(Some(11), hart.pend_enab.id); // MExternal wins
        hart.set_interrupt(11, false);
        assert_eq!(Some(3), hart.pend_enab.id); // then MSoftware
        hart.set_interrupt(3, false);
        assert_eq!(Some(7), hart.pend_enab.id); // then MTimer
    }

    #[test]
    fn test_higher_privilege_wins() {
        let mut hart = hart();
        hart.status.set_ie(PrivilegeLevel::Machine, true);
        hart.write_mideleg(1 << 9, u32::MAX); // delegate SExternal to S
        hart.write_mie((1 << 7) | (1 << 9), u32::MAX);
        hart.set_interrupt(9, true);
        hart.set_interrupt(7, true);
        // SExternal has a higher fixed rank than MTimer in flat order, but
        // MTimer targets M which always wins.
        assert_eq!(Some(7), hart.pend_enab.id);
        assert_eq!(PrivilegeLevel::Machine, hart.pend_enab.privilege);
    }

    #[test]
    fn test_effective_enable_masks_partition() {
        let mut hart = hart();
        hart.write_mideleg(1 << 5, u32::MAX);
        hart.write_mie(1 << 5, u32::MAX);
        hart.set_interrupt(5, true);
        hart.set_mode(PrivilegeLevel::Supervisor);

        // SIE clear in S-mode: the S partition is masked.
        hart.test_interrupt();
        assert_eq!(None, hart.pend_enab.id);

        // SIE set: deliverable.
        hart.status.set_ie(PrivilegeLevel::Supervisor, true);
        hart.test_interrupt();
        assert_eq!(Some(5), hart.pend_enab.id);
        assert_eq!(PrivilegeLevel::Supervisor, hart.pend_enab.privilege);

        // From U-mode the S partition is always enabled.
        hart.status.set_ie(PrivilegeLevel::Supervisor, false);
        hart.set_mode(PrivilegeLevel::User);
        hart.test_interrupt();
        assert_eq!(Some(5), hart.pend_enab.id);

        // From M-mode it never is.
        hart.set_mode(PrivilegeLevel::Machine);
        hart.status.set_ie(PrivilegeLevel::Machine, true);
        hart.test_interrupt();
        assert_eq!(None, hart.pend_enab.id);
    }

    #[test]
    fn test_undelegated_interrupt_targets_machine() {
        let hart = hart();
        assert_eq!(PrivilegeLevel::Machine, hart.interrupt_mode_x(9));
    }

    #[test]
    fn test_delegation_never_lowers_target_below_current() {
        let mut hart = hart();
        hart.write_mideleg(1 << 5, u32::MAX);
        hart.set_mode(PrivilegeLevel::Machine);
        // Delegated to S, but the hart runs in M: target stays M.
        assert_eq!(PrivilegeLevel::Machine, hart.interrupt_mode_x(5));
        hart.set_mode(PrivilegeLevel::User);
        assert_eq!(PrivilegeLevel::Supervisor, hart.interrupt_mode_x(5));
    }

    #[test]
    fn test_sie_is_delegated_view_of_mie() {
        let mut hart = hart();
        hart.write_mideleg((1 << 1) | (1 << 5), u32::MAX);
        hart.write_mie(u32::MAX, u32::MAX);
        assert_eq!((1 << 1) | (1 << 5), hart.read_sie());
        hart.write_sie(0, u32::MAX);
        // Only delegated bits were cleared.
        assert_ne!(0, hart.read_mie() & (1 << 7));
        assert_eq!(0, hart.read_mie() & (1 << 5));
    }

    #[test]
    fn test_medeleg_fixed_zero_bits() {
        let mut hart = hart();
        hart.write_medeleg(u32::MAX, u32::MAX);
        assert_eq!(0, hart.read_medeleg() & (1 << 11));
        assert_ne!(0, hart.read_medeleg() & (1 << 8));
    }
}
