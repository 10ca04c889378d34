//! Core-Local Interrupt Controller, per-hart side.
//!
//! Each interrupt owns four byte-sized fields packed into one 32-bit word:
//! `clicintip`, `clicintie`, `clicintattr` and `clicintctl`. The
//! pending-and-enabled summary bitmap (`ipe`) mirrors `ip & ie` per
//! interrupt and drives selection. The cluster-shared registers (`cliccfg`,
//! `clicinfo`) and the memory map live in [`crate::cluster`]; the hart
//! keeps a mirror of `cliccfg` refreshed by the cluster on every write.

use bitvec::{field::BitField, order::Lsb0, view::BitView};
use log::trace;

use super::{ClicConfig, Hart};
use crate::exception::{Trap, LOCAL_INTERRUPT_BASE};
use crate::hart::csr::IntCtlMode;
use crate::hart::interrupts::PendEnab;
use crate::{isa, PrivilegeLevel, RawPrivilegeLevel};

/// The cluster-level cliccfg register.
///
/// Layout: nvbits \[0], nlbits \[4:1], nmbits \[6:5], bit 7 WPRI.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Cliccfg(u8);

impl Cliccfg {
    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u8 {
        self.0
    }

    /// Whether hardware vectoring is enabled (read-only, fixed by
    /// configuration).
    pub fn nvbits(self) -> bool {
        self.0.view_bits::<Lsb0>()[0]
    }

    pub fn set_nvbits(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(0, value);
    }

    /// Number of interrupt-level bits in clicintctl.
    pub fn nlbits(self) -> u8 {
        self.0.view_bits::<Lsb0>()[1..5].load_le()
    }

    pub fn set_nlbits(&mut self, value: u8) {
        self.0.view_bits_mut::<Lsb0>()[1..5].store_le(value);
    }

    /// Number of interrupt-mode bits in clicintattr.mode.
    pub fn nmbits(self) -> u8 {
        self.0.view_bits::<Lsb0>()[5..7].load_le()
    }

    pub fn set_nmbits(&mut self, value: u8) {
        self.0.view_bits_mut::<Lsb0>()[5..7].store_le(value);
    }

    pub fn clear_wpri(&mut self) {
        self.0.view_bits_mut::<Lsb0>().set(7, false);
    }
}

/// The read-only clicinfo register.
///
/// Layout: num_interrupt \[12:0], version \[20:13], CLICINTCTLBITS \[24:21].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Clicinfo(u32);

impl Clicinfo {
    pub fn new(num_interrupt: u32, version: u8, intctl_bits: u8) -> Self {
        let mut raw = 0u32;
        raw.view_bits_mut::<Lsb0>()[..13].store_le(num_interrupt);
        raw.view_bits_mut::<Lsb0>()[13..21].store_le(version);
        raw.view_bits_mut::<Lsb0>()[21..25].store_le(intctl_bits);
        Self(raw)
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }

    pub fn num_interrupt(self) -> u32 {
        self.0.view_bits::<Lsb0>()[..13].load_le()
    }

    pub fn intctl_bits(self) -> u8 {
        self.0.view_bits::<Lsb0>()[21..25].load_le()
    }
}

/// A per-interrupt clicintattr byte.
///
/// Layout: shv \[0], trig \[2:1] (bit 1 = edge-triggered, bit 2 =
/// active-low), bits 5:3 WPRI, mode \[7:6].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Clicintattr(u8);

impl Clicintattr {
    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u8 {
        self.0
    }

    /// Selective hardware vectoring for this interrupt.
    pub fn shv(self) -> bool {
        self.0.view_bits::<Lsb0>()[0]
    }

    pub fn set_shv(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(0, value);
    }

    pub fn edge_triggered(self) -> bool {
        self.0.view_bits::<Lsb0>()[1]
    }

    pub fn active_low(self) -> bool {
        self.0.view_bits::<Lsb0>()[2]
    }

    /// The raw 2-bit mode field.
    pub fn mode_raw(self) -> u8 {
        self.0.view_bits::<Lsb0>()[6..8].load_le()
    }

    pub fn set_mode_raw(&mut self, value: u8) {
        self.0.view_bits_mut::<Lsb0>()[6..8].store_le(value & 0b11);
    }

    pub fn clear_wpri(&mut self) {
        self.0.view_bits_mut::<Lsb0>()[3..6].store_le(0u8);
    }
}

/// State of a single CLIC interrupt: the four packed byte fields.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct ClicIntState {
    pub pending: bool,
    pub enable: bool,
    pub attr: Clicintattr,
    pub ctl: u8,
}

impl ClicIntState {
    /// The composed 32-bit register value: ip, ie, attr, ctl from LSB to
    /// MSB.
    pub fn packed(self) -> u32 {
        u32::from_le_bytes([
            self.pending as u8,
            self.enable as u8,
            self.attr.as_raw(),
            self.ctl,
        ])
    }

    pub fn from_packed(value: u32) -> Self {
        let [ip, ie, attr, ctl] = value.to_le_bytes();
        Self {
            pending: ip & 1 != 0,
            enable: ie & 1 != 0,
            attr: Clicintattr::from_raw(attr),
            ctl,
        }
    }
}

/// The selected CLIC interrupt, or `id: None` when nothing is pending and
/// enabled.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ClicSel {
    pub id: Option<u32>,
    pub privilege: PrivilegeLevel,
    pub level: u8,
    pub shv: bool,
}

impl Default for ClicSel {
    fn default() -> Self {
        Self {
            id: None,
            privilege: PrivilegeLevel::User,
            level: 0,
            shv: false,
        }
    }
}

/// Per-hart CLIC state, allocated only when a CLIC is configured.
#[derive(Debug, Clone)]
pub struct ClicState {
    pub(crate) int_state: Vec<ClicIntState>,
    /// Summary bitmap: bit i set iff interrupt i is pending and enabled.
    pub(crate) ipe: Vec<u64>,
    pub(crate) sel: ClicSel,
    /// Mirror of the cluster-level cliccfg, refreshed on every cliccfg
    /// write.
    pub(crate) cfg: Cliccfg,
    cfg_mbits: u8,
    ctl1_bits: u8,
}

impl ClicState {
    pub(crate) fn new(config: &ClicConfig, int_num: u32) -> Self {
        let ctl1_bits = ((1u32 << (8 - config.intctl_bits.min(8) as u32)) - 1) as u8;
        let mut cfg = Cliccfg::default();
        cfg.set_nvbits(config.sel_hvec);

        let mut attr = Clicintattr::default();
        attr.set_mode_raw(PrivilegeLevel::Machine as u8);

        Self {
            int_state: vec![
                ClicIntState {
                    pending: false,
                    enable: false,
                    attr,
                    ctl: ctl1_bits,
                };
                int_num as usize
            ],
            ipe: vec![0; (int_num as usize + 63) / 64],
            sel: ClicSel::default(),
            cfg,
            cfg_mbits: config.cfg_mbits.min(2),
            ctl1_bits,
        }
    }

    /// Mask of always-one bits in clicintctl.
    pub(crate) fn ctl1_bits(&self) -> u8 {
        self.ctl1_bits
    }

    fn set_ipe(&mut self, index: usize, value: bool) {
        let word = index / 64;
        let mask = 1u64 << (index % 64);
        if value {
            self.ipe[word] |= mask;
        } else {
            self.ipe[word] &= !mask;
        }
    }

    /// Rebuild the pending-and-enabled summary from the interrupt state
    /// (after restore).
    pub(crate) fn rebuild_ipe(&mut self) {
        for word in &mut self.ipe {
            *word = 0;
        }
        for index in 0..self.int_state.len() {
            let st = self.int_state[index];
            if st.pending && st.enable {
                self.set_ipe(index, true);
            }
        }
    }

    /// Effective privilege mode of the indexed interrupt, interpreting
    /// attr.mode under the current nmbits setting.
    pub(crate) fn interrupt_mode(&self, index: usize) -> PrivilegeLevel {
        let attr_mode = self.int_state[index].attr.mode_raw();
        let nmbits = self.cfg.nmbits();

        let raw = if nmbits == 0 {
            // priv-modes nmbits clicintattr[i].mode  Interpretation
            //      ---      0       xx               M-mode interrupt
            PrivilegeLevel::Machine as u8
        } else if self.cfg_mbits == 1 {
            // priv-modes nmbits clicintattr[i].mode  Interpretation
            //      M/U      1       0x               U-mode interrupt
            //      M/U      1       1x               M-mode interrupt
            if attr_mode & 2 != 0 {
                PrivilegeLevel::Machine as u8
            } else {
                PrivilegeLevel::User as u8
            }
        } else {
            // priv-modes nmbits clicintattr[i].mode  Interpretation
            //    M/S/U      1       0x               S-mode interrupt
            //    M/S/U      1       1x               M-mode interrupt
            //    M/S/U      2       00               U-mode interrupt
            //    M/S/U      2       01               S-mode interrupt
            //    M/S/U      2       10               Reserved
            //    M/S/U      2       11               M-mode interrupt
            attr_mode | (nmbits == 1) as u8
        };

        RawPrivilegeLevel::from_u2(raw)
            .try_into()
            .unwrap_or(PrivilegeLevel::Machine)
    }
}

impl Hart {
    /// Whether the given privilege mode currently operates in CLIC mode
    /// (xtvec.MODE selects CLIC and a CLIC is present).
    pub(crate) fn use_clic(&self, mode: PrivilegeLevel) -> bool {
        self.clic.is_some() && self.trap_csrs.get(mode).tvec().mode() == IntCtlMode::Clic
    }

    /// The current CLIC selection cache.
    pub fn clic_sel(&self) -> ClicSel {
        self.clic.as_ref().map(|c| c.sel).unwrap_or_default()
    }

    /// The composed 32-bit register value of the indexed interrupt.
    pub(crate) fn clic_int_value(&self, index: u32) -> u32 {
        self.clic
            .as_ref()
            .map(|c| c.int_state[index as usize].packed())
            .unwrap_or(0)
    }

    /// Whether the indexed interrupt is visible through a page of the
    /// given mode: it must be implemented and its effective mode must not
    /// exceed the page mode.
    pub(crate) fn clic_visible(&self, index: u32, page_mode: PrivilegeLevel) -> bool {
        let Some(clic) = self.clic.as_ref() else {
            return false;
        };
        if index < LOCAL_INTERRUPT_BASE && !self.has_exception(Trap::Interrupt(index)) {
            return false;
        }
        if index >= self.int_num() {
            return false;
        }
        clic.interrupt_mode(index as usize) <= page_mode
    }

    /// Mirror a cluster-level cliccfg write into this hart.
    pub(crate) fn set_cliccfg_mirror(&mut self, cfg: Cliccfg) {
        if let Some(clic) = self.clic.as_mut() {
            clic.cfg = cfg;
        }
    }

    //
    // Pending/enable maintenance
    //

    /// Write clicintip for the indexed interrupt, updating the summary
    /// bitmap on a pending-and-enabled change.
    pub(crate) fn write_clic_pending(&mut self, index: usize, value: u8) {
        let Some(clic) = self.clic.as_mut() else {
            return;
        };
        let st = &mut clic.int_state[index];
        let old_ie = st.enable;
        let new_ip = value & 1 != 0;

        let old_ipe = old_ie && st.pending;
        st.pending = new_ip;
        let new_ipe = old_ie && new_ip;

        if old_ipe != new_ipe {
            clic.set_ipe(index, new_ipe);
            self.test_interrupt();
        }
    }

    /// Write clicintie for the indexed interrupt.
    pub(crate) fn write_clic_enable(&mut self, index: usize, value: u8) {
        let Some(clic) = self.clic.as_mut() else {
            return;
        };
        let st = &mut clic.int_state[index];
        let old_ip = st.pending;
        let new_ie = value & 1 != 0;

        let old_ipe = old_ip && st.enable;
        st.enable = new_ie;
        let new_ipe = old_ip && new_ie;

        if old_ipe != new_ipe {
            clic.set_ipe(index, new_ipe);
            self.test_interrupt();
        }
    }

    /// Write clicintattr for the indexed interrupt. The mode field is
    /// clamped on write: it cannot exceed the accessing page's mode, cannot
    /// select an unimplemented mode, and cannot leave Machine when no mode
    /// bits are configured.
    pub(crate) fn write_clic_attr(&mut self, index: usize, value: u8, page_mode: PrivilegeLevel) {
        let has_n = self.config().arch & isa::N != 0;
        let Some(clic) = self.clic.as_mut() else {
            return;
        };

        let mut attr = Clicintattr::from_raw(value);
        attr.clear_wpri();

        if !clic.cfg.nvbits() {
            attr.set_shv(false);
        }

        let int_mode = attr.mode_raw();
        let clamp = int_mode > page_mode as u8
            || clic.cfg_mbits == 0
            || int_mode == RawPrivilegeLevel::Reserved as u8
            || (clic.cfg_mbits < 2 && int_mode == PrivilegeLevel::Supervisor as u8)
            || (int_mode == PrivilegeLevel::User as u8 && !has_n);
        if clamp {
            attr.set_mode_raw(page_mode as u8);
        }

        if clic.int_state[index].attr != attr {
            clic.int_state[index].attr = attr;
            self.test_interrupt();
        }
    }

    /// Write clicintctl for the indexed interrupt. The unimplemented low
    /// bits always read as 1.
    pub(crate) fn write_clic_ctl(&mut self, index: usize, value: u8) {
        let Some(clic) = self.clic.as_mut() else {
            return;
        };
        let value = value | clic.ctl1_bits();
        if clic.int_state[index].ctl != value {
            clic.int_state[index].ctl = value;
            self.test_interrupt();
        }
    }

    /// Acknowledge a CLIC-sourced interrupt: an edge-triggered source
    /// deasserts; a level-triggered source is re-evaluated without
    /// deassertion.
    pub(crate) fn acknowledge_clic_int(&mut self, index: u32) {
        let Some(clic) = self.clic.as_ref() else {
            return;
        };
        let is_edge = clic.int_state[index as usize].attr.edge_triggered();
        if is_edge {
            self.write_clic_pending(index as usize, 0);
        } else {
            self.refresh_pending_and_enabled();
        }
    }

    /// Apply an input-signal change to the indexed interrupt, honoring
    /// the edge/level and active-low attributes.
    pub(crate) fn update_clic_input(&mut self, index: usize, value: bool) {
        let Some(clic) = self.clic.as_ref() else {
            return;
        };
        let attr = clic.int_state[index].attr;
        let value = value ^ attr.active_low();

        // Apply the new value if level triggered, or edge triggered and
        // asserted.
        if !attr.edge_triggered() || value {
            self.write_clic_pending(index, value as u8);
        }
    }

    //
    // Selection and delivery gate
    //

    /// Should a CLIC interrupt targeting privilege `x` at `level` be
    /// presented, given the current execution mode?
    fn clic_int_deliverable(&self, x: PrivilegeLevel, level: u8, mode: PrivilegeLevel) -> bool {
        self.use_clic(x)
            && self.status.ie(x)
            && (mode < x
                || (level > self.mintstatus.il(x) && level > self.intthresh.get(x).th()))
    }

    /// Refresh the CLIC selection cache and, when deliverable, promote the
    /// selection into `pend_enab`.
    pub(crate) fn refresh_clic(&mut self) {
        let Some(clic) = self.clic.as_ref() else {
            return;
        };

        // Scan for the maximum-rank pending+enabled interrupt; ties go to
        // the higher-numbered id.
        let mut max_rank = 0u32;
        let mut id = None;
        for (word_index, &word) in clic.ipe.iter().enumerate() {
            let mut remaining = word;
            let mut bit = 0u32;
            while remaining != 0 {
                if remaining & 1 != 0 {
                    let index = word_index as u32 * 64 + bit;
                    let ctl = clic.int_state[index as usize].ctl;
                    let mode = clic.interrupt_mode(index as usize);
                    let rank = ((mode as u32) << 8) | ctl as u32;
                    if max_rank <= rank {
                        max_rank = rank;
                        id = Some(index);
                    }
                }
                remaining >>= 1;
                bit += 1;
            }
        }

        let sel = match id {
            None => ClicSel::default(),
            Some(index) => {
                let st = clic.int_state[index as usize];
                // Interrupt level: the top nlbits of clicintctl, with the
                // lower bits filled with 1s.
                let nlbits = clic.cfg.nlbits().min(8);
                let nlbits_mask = !(((1u32 << (8 - nlbits as u32)) - 1) as u8);
                ClicSel {
                    id: Some(index),
                    privilege: clic.interrupt_mode(index as usize),
                    level: (st.ctl & nlbits_mask) | !nlbits_mask,
                    shv: st.attr.shv(),
                }
            }
        };

        if let Some(index) = sel.id {
            let mode = self.current_mode();
            let deliverable = if self.pend_enab.id.is_some() && self.pend_enab.privilege > sel.privilege
            {
                // The basic-mode selection targets a higher privilege.
                false
            } else if mode > sel.privilege {
                // Execution privilege exceeds the interrupt's privilege.
                false
            } else {
                self.clic_int_deliverable(sel.privilege, sel.level, mode)
            };

            if deliverable {
                self.pend_enab = PendEnab {
                    id: Some(index),
                    privilege: sel.privilege,
                    level: sel.level,
                    is_clic: true,
                };
            }
        }

        if let Some(clic) = self.clic.as_mut() {
            clic.sel = sel;
        }

        // Report only when the selection changes.
        if self.clic_state != sel {
            self.clic_state = sel;
            trace!(
                "hart {}: CLIC ID:{} MODE:{} LEVEL:{} SHV:{}",
                self.config().hart_id,
                sel.id.map(|id| id as i64).unwrap_or(-1),
                sel.privilege,
                sel.level,
                sel.shv as u8,
            );
        }
    }
}
