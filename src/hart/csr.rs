//! Trap-relevant control and status registers.
//!
//! Only the registers the trap machinery reads or writes live here; the
//! full CSR specifier space is dispatched by the external CSR file, which
//! forwards accesses to these groups.

use bitvec::{field::BitField, order::Lsb0, view::BitView};

use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// Per-privilege-level storage, indexed by [`PrivilegeLevel`].
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct PerMode<T> {
    u: T,
    s: T,
    m: T,
}

impl<T> PerMode<T> {
    pub fn get(&self, mode: PrivilegeLevel) -> &T {
        match mode {
            PrivilegeLevel::User => &self.u,
            PrivilegeLevel::Supervisor => &self.s,
            PrivilegeLevel::Machine => &self.m,
        }
    }

    pub fn get_mut(&mut self, mode: PrivilegeLevel) -> &mut T {
        match mode {
            PrivilegeLevel::User => &mut self.u,
            PrivilegeLevel::Supervisor => &mut self.s,
            PrivilegeLevel::Machine => &mut self.m,
        }
    }
}

/// Interrupt dispatch mode, from the MODE field of xtvec.
///
/// > When MODE=Direct, all traps into machine mode cause the pc to be set
/// > to the address in the BASE field. When MODE=Vectored, all synchronous
/// > exceptions into machine mode cause the pc to be set to the address in
/// > the BASE field, whereas interrupts cause the pc to be set to the
/// > address in the BASE field plus four times the interrupt cause number.
///
/// Encoding 3 selects CLIC mode when a CLIC is configured; encoding 2 is
/// reserved.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IntCtlMode {
    Direct,
    Vectored,
    Clic,
}

/// The xcause register, including the CLIC fields.
///
/// Layout: ExceptionCode \[11:0], pil \[23:16], inhv \[30], Interrupt \[31].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Xcause(u32);

impl Xcause {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }

    pub fn code(self) -> u32 {
        self.0.view_bits::<Lsb0>()[..12].load_le()
    }

    pub fn set_code(&mut self, code: u32) {
        self.0.view_bits_mut::<Lsb0>()[..12].store_le(code & 0xFFF);
    }

    pub fn is_interrupt(self) -> bool {
        self.0.view_bits::<Lsb0>()[31]
    }

    pub fn set_interrupt(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(31, value);
    }

    /// Previous interrupt level (CLIC).
    pub fn pil(self) -> u8 {
        self.0.view_bits::<Lsb0>()[16..24].load_le()
    }

    pub fn set_pil(&mut self, value: u8) {
        self.0.view_bits_mut::<Lsb0>()[16..24].store_le(value);
    }

    /// Set while a hardware-vectored handler address is being fetched.
    pub fn inhv(self) -> bool {
        self.0.view_bits::<Lsb0>()[30]
    }

    pub fn set_inhv(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(30, value);
    }
}

/// The xtvec register.
///
/// BASE occupies bits 31:2 (so the handler base is the raw value with the
/// MODE bits cleared); MODE occupies bits 1:0.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Xtvec(u32);

impl Xtvec {
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Handler base address (BASE << 2).
    pub fn base(self) -> u32 {
        self.0 & !0b11
    }

    /// The dispatch mode encoded by the MODE field. The reserved encoding
    /// cannot be stored ([`Self::write`] clamps it), so a raw 2 decodes as
    /// CLIC here.
    pub fn mode(self) -> IntCtlMode {
        match self.0 & 0b11 {
            0 => IntCtlMode::Direct,
            1 => IntCtlMode::Vectored,
            _ => IntCtlMode::Clic,
        }
    }

    /// Masked **WARL** write. The reserved MODE encoding 2 and, without a
    /// CLIC, encoding 3 fall back to Direct.
    pub fn write(&mut self, value: u32, mask: u32, clic_present: bool) {
        let mut updated = self.0 & !mask | value & mask;
        let mode = updated & 0b11;
        if mode == 2 || (mode == 3 && !clic_present) {
            updated &= !0b11;
        }
        self.0 = updated;
    }
}

/// Per-mode trap CSR group: xepc, xcause, xtval, xtvec and the CLIC
/// trap-vector table base xtvt.
///
/// One instance exists per implemented privilege level; the trap-entry
/// engine operates on whichever group belongs to the target mode.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct TrapCsrs {
    epc: u32,
    cause: Xcause,
    tval: u32,
    tvec: Xtvec,
    tvt: u32,
}

impl TrapCsrs {
    pub fn read_epc(&self) -> u32 {
        self.epc
    }

    pub fn write_epc(&mut self, value: u32, mask: u32) {
        self.epc = self.epc & !mask | value & mask;
        self.epc &= !0b1;
    }

    pub fn cause(&self) -> Xcause {
        self.cause
    }

    pub fn cause_mut(&mut self) -> &mut Xcause {
        &mut self.cause
    }

    pub fn read_cause(&self) -> u32 {
        self.cause.as_raw()
    }

    pub fn write_cause(&mut self, value: u32, mask: u32) {
        self.cause = Xcause::from_raw(self.cause.as_raw() & !mask | value & mask);
    }

    pub fn read_tval(&self) -> u32 {
        self.tval
    }

    pub fn write_tval(&mut self, value: u32, mask: u32) {
        self.tval = self.tval & !mask | value & mask;
    }

    pub fn tvec(&self) -> Xtvec {
        self.tvec
    }

    pub fn write_tvec(&mut self, value: u32, mask: u32, clic_present: bool) {
        self.tvec.write(value, mask, clic_present);
    }

    pub fn read_tvt(&self) -> u32 {
        self.tvt
    }

    /// xtvt is 64-byte aligned; the low bits read as zero.
    pub fn write_tvt(&mut self, value: u32, mask: u32) {
        self.tvt = (self.tvt & !mask | value & mask) & !0x3F;
    }
}

/// The mintstatus register: current interrupt level per privilege mode.
///
/// Layout: uil \[7:0], sil \[15:8], mil \[31:24]. Read-only to software;
/// written by trap entry and return.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Mintstatus(u32);

impl Mintstatus {
    pub fn as_raw(self) -> u32 {
        self.0
    }

    pub fn il(self, mode: PrivilegeLevel) -> u8 {
        let lo = idx::il(mode);
        self.0.view_bits::<Lsb0>()[lo..lo + 8].load_le()
    }

    pub fn set_il(&mut self, mode: PrivilegeLevel, value: u8) {
        let lo = idx::il(mode);
        self.0.view_bits_mut::<Lsb0>()[lo..lo + 8].store_le(value);
    }
}

/// A per-mode xintthresh register (interrupt-level threshold).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Intthresh(u8);

impl Intthresh {
    pub fn th(self) -> u8 {
        self.0
    }

    pub fn write(&mut self, value: u32, mask: u32) {
        self.0 = (self.0 & !(mask as u8)) | (value as u8 & mask as u8);
    }
}

/// Why Debug mode was entered; stored in dcsr.cause.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DebugCause {
    /// Re-entry while already in Debug mode.
    None = 0,
    Ebreak = 1,
    Trigger = 2,
    HaltReq = 3,
    Step = 4,
    ResetHaltReq = 5,
}

/// The dcsr register.
///
/// Layout: prv \[1:0], step \[2], nmip \[3], cause \[8:6], stopcount \[10],
/// ebreaku \[12], ebreaks \[13], ebreakm \[15], xdebugver \[31:28] = 4.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Dcsr(u32);

impl Default for Dcsr {
    fn default() -> Self {
        Self::new()
    }
}

impl Dcsr {
    pub fn new() -> Self {
        // xdebugver = 4 (external debug support as ratified)
        Self(4 << 28)
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Masked write. cause, nmip and xdebugver are read-only.
    pub fn write(&mut self, value: u32, mask: u32) {
        const WRITABLE: u32 = (1 << idx::STEP)
            | (1 << idx::STOPCOUNT)
            | (1 << idx::EBREAKU)
            | (1 << idx::EBREAKS)
            | (1 << idx::EBREAKM)
            | 0b11; // prv
        let mask = mask & WRITABLE;
        let updated = self.0 & !mask | value & mask;
        self.0 = updated;
        // prv is WARL: reserved encoding falls back to Machine.
        if RawPrivilegeLevel::from_u2((updated & 0b11) as u8).is_reserved() {
            self.set_prv(PrivilegeLevel::Machine);
        }
    }

    pub fn prv(self) -> PrivilegeLevel {
        RawPrivilegeLevel::from_u2((self.0 & 0b11) as u8)
            .try_into()
            .unwrap_or(PrivilegeLevel::Machine)
    }

    pub fn set_prv(&mut self, mode: PrivilegeLevel) {
        self.0 = self.0 & !0b11 | mode as u32 & 0b11;
    }

    pub fn step(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::STEP]
    }

    pub fn set_step(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::STEP, value);
    }

    pub fn nmip(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::NMIP]
    }

    pub fn set_nmip(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::NMIP, value);
    }

    pub fn cause(self) -> u32 {
        self.0.view_bits::<Lsb0>()[idx::CAUSE..idx::CAUSE + 3].load_le()
    }

    pub fn set_cause(&mut self, cause: DebugCause) {
        self.0.view_bits_mut::<Lsb0>()[idx::CAUSE..idx::CAUSE + 3].store_le(cause as u32);
    }

    pub fn stopcount(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::STOPCOUNT]
    }

    pub fn set_stopcount(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::STOPCOUNT, value);
    }

    /// The ebreak routing bit for the given privilege level.
    pub fn ebreak(self, mode: PrivilegeLevel) -> bool {
        self.0.view_bits::<Lsb0>()[idx::ebreak(mode)]
    }

    pub fn set_ebreak(&mut self, mode: PrivilegeLevel, value: bool) {
        self.0
            .view_bits_mut::<Lsb0>()
            .set(idx::ebreak(mode), value);
    }
}

/// The mcountinhibit register is **WARL**.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Mcountinhibit(u32);

impl Mcountinhibit {
    // Bit indices for the fields of the mcountinhibit register.
    // Index 1 is a read-only zero bit.
    const CY: usize = 0;
    const IR: usize = 2;

    pub fn cy(self) -> bool {
        self.0.view_bits::<Lsb0>()[Self::CY]
    }

    pub fn ir(self) -> bool {
        self.0.view_bits::<Lsb0>()[Self::IR]
    }

    pub fn read(self) -> u32 {
        self.0
    }

    pub fn write(&mut self, value: u32, mask: u32) {
        // Bit 1 is always read-only 0.
        self.0 = self.0 & !mask | value & mask & !0b10;
    }
}

/// Bit indices into dcsr and mintstatus.
mod idx {
    use crate::PrivilegeLevel;

    pub const STEP: usize = 2;
    pub const NMIP: usize = 3;
    pub const CAUSE: usize = 6;
    pub const STOPCOUNT: usize = 10;
    pub const EBREAKU: usize = 12;
    pub const EBREAKS: usize = 13;
    pub const EBREAKM: usize = 15;

    pub fn ebreak(mode: PrivilegeLevel) -> usize {
        match mode {
            PrivilegeLevel::User => EBREAKU,
            PrivilegeLevel::Supervisor => EBREAKS,
            PrivilegeLevel::Machine => EBREAKM,
        }
    }

    pub fn il(mode: PrivilegeLevel) -> usize {
        match mode {
            PrivilegeLevel::User => 0,
            PrivilegeLevel::Supervisor => 8,
            PrivilegeLevel::Machine => 24,
        }
    }
}
