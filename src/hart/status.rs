use bitvec::{field::BitField, order::Lsb0, view::BitView};

use crate::{PrivilegeLevel, RawPrivilegeLevel};

// Mask to be applied to mstatus to get sstatus.
const SSTATUS_MASK: u32 = 0b0000_0000_0000_1101_1110_0001_0011_0011;

/// The mstatus and mstatush registers, restricted to the fields the trap
/// machinery manipulates.
///
/// > The mstatus register keeps track of and controls the hart's current
/// > operating state. A restricted view of mstatus appears as the sstatus
/// > register in the S-level ISA.
///
/// The interrupt-enable stack is exactly one deep per privilege: trap entry
/// saves `xIE` into `xPIE` and clears `xIE`; the matching return pops
/// `xIE` from `xPIE` and sets `xPIE` to 1.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Status {
    mstatus: u32,
    mstatush: u32,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    pub fn new() -> Self {
        Self {
            mstatus: 0x0000_0000,
            mstatush: 0x0000_0000,
        }
    }

    /// Returns the xIE (Interrupt Enable) bit for the given privilege
    /// level.
    pub fn ie(&self, mode: PrivilegeLevel) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::ie(mode)]
    }

    /// Sets the xIE (Interrupt Enable) bit for the given privilege level.
    pub fn set_ie(&mut self, mode: PrivilegeLevel, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::ie(mode), value);
    }

    /// Returns the xPIE (Previous Interrupt Enable) bit for the given
    /// privilege level.
    pub fn pie(&self, mode: PrivilegeLevel) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::pie(mode)]
    }

    /// Sets the xPIE (Previous Interrupt Enable) bit for the given
    /// privilege level.
    pub fn set_pie(&mut self, mode: PrivilegeLevel, value: bool) {
        self.mstatus
            .view_bits_mut::<Lsb0>()
            .set(idx::pie(mode), value);
    }

    /// Returns the privilege level encoded by the MPP (M-mode Previous
    /// Privilege level) field.
    ///
    /// The MPP field is **WARL**.
    pub fn mpp(&self) -> PrivilegeLevel {
        RawPrivilegeLevel::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le(),
        )
        .try_into()
        .unwrap_or(PrivilegeLevel::Machine)
    }

    /// Sets the MPP field. Reserved values are ignored (**WARL**).
    pub fn set_mpp(&mut self, value: RawPrivilegeLevel) {
        let Ok(value) = PrivilegeLevel::try_from(value) else {
            return;
        };
        self.mstatus.view_bits_mut::<Lsb0>()[idx::MPP..(idx::MPP + 2)].store_le(value as u8);
    }

    /// Returns the privilege level encoded by the SPP (S-mode Previous
    /// Privilege level) field.
    ///
    /// The SPP field is **WARL**.
    pub fn spp(&self) -> PrivilegeLevel {
        match self.mstatus.view_bits::<Lsb0>()[idx::SPP] {
            false => PrivilegeLevel::User,
            true => PrivilegeLevel::Supervisor,
        }
    }

    /// Sets the SPP field. Values above Supervisor are ignored (**WARL**).
    pub fn set_spp(&mut self, value: RawPrivilegeLevel) {
        match PrivilegeLevel::try_from(value) {
            Ok(value) if value <= PrivilegeLevel::Supervisor => {
                let bit = value as u8 != 0;
                self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPP, bit);
            }
            _ => {}
        };
    }

    /// Returns `true` if the MPRV (Modify PRiVilege) bit is set.
    pub fn mprv(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPRV]
    }

    /// Sets the MPRV (Modify PRiVilege) bit to `value`.
    pub fn set_mprv(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPRV, value);
    }

    /// Returns `true` if the MBE (M-mode Big Endian) bit is set.
    pub fn mbe(&self) -> bool {
        self.mstatush.view_bits::<Lsb0>()[hidx::MBE]
    }

    /// Sets the MBE (M-mode Big Endian) bit to `value`.
    pub fn set_mbe(&mut self, value: bool) {
        self.mstatush.view_bits_mut::<Lsb0>().set(hidx::MBE, value);
    }

    /// Returns `true` if the SBE (S-mode Big Endian) bit is set.
    pub fn sbe(&self) -> bool {
        self.mstatush.view_bits::<Lsb0>()[hidx::SBE]
    }

    /// Sets the SBE (S-mode Big Endian) bit to `value`.
    pub fn set_sbe(&mut self, value: bool) {
        self.mstatush.view_bits_mut::<Lsb0>().set(hidx::SBE, value);
    }

    /// Returns `true` if the UBE (U-mode Big Endian) bit is set.
    pub fn ube(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::UBE]
    }

    /// Sets the UBE (U-mode Big Endian) bit to `value`.
    pub fn set_ube(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::UBE, value);
    }

    /// Raw mstatus value.
    pub fn read_mstatus(&self) -> u32 {
        self.mstatus
    }

    /// Masked mstatus write, routed through the field setters so WARL
    /// fields are treated correctly. WPRI bits are ignored.
    pub fn write_mstatus(&mut self, value: u32, mask: u32) {
        let mask_bits = mask.view_bits::<Lsb0>();
        let updated = self.mstatus & !mask | value & mask;
        let updated_bits = updated.view_bits::<Lsb0>();

        for mode in PrivilegeLevel::ALL {
            if mask_bits[idx::ie(mode)] {
                self.set_ie(mode, updated_bits[idx::ie(mode)]);
            }
            if mask_bits[idx::pie(mode)] {
                self.set_pie(mode, updated_bits[idx::pie(mode)]);
            }
        }
        if mask_bits[idx::UBE] {
            self.set_ube(updated_bits[idx::UBE]);
        }
        if mask_bits[idx::SPP] {
            self.set_spp(RawPrivilegeLevel::from_u2(updated_bits[idx::SPP] as u8));
        }
        if mask_bits[idx::MPP] | mask_bits[idx::MPP + 1] {
            self.set_mpp(RawPrivilegeLevel::from_u2(
                updated_bits[idx::MPP..(idx::MPP + 2)].load_le(),
            ));
        }
        if mask_bits[idx::MPRV] {
            self.set_mprv(updated_bits[idx::MPRV]);
        }
    }

    pub fn read_mstatush(&self) -> u32 {
        self.mstatush
    }

    pub fn write_mstatush(&mut self, value: u32, mask: u32) {
        let mask_bits = mask.view_bits::<Lsb0>();
        let value_bits = value.view_bits::<Lsb0>();
        if mask_bits[hidx::MBE] {
            self.set_mbe(value_bits[hidx::MBE]);
        }
        if mask_bits[hidx::SBE] {
            self.set_sbe(value_bits[hidx::SBE]);
        }
    }

    /// sstatus is the S-mode restricted view of mstatus.
    pub fn read_sstatus(&self) -> u32 {
        self.mstatus & SSTATUS_MASK
    }

    pub fn write_sstatus(&mut self, value: u32, mask: u32) {
        self.write_mstatus(value, mask & SSTATUS_MASK);
    }
}

/// Bit indices into the mstatus register.
mod idx {
    use crate::PrivilegeLevel;

    pub const UIE: usize = 0;
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const UPIE: usize = 4;
    pub const SPIE: usize = 5;
    pub const UBE: usize = 6;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const MPP: usize = 11;
    pub const MPRV: usize = 17;

    pub fn ie(mode: PrivilegeLevel) -> usize {
        match mode {
            PrivilegeLevel::User => UIE,
            PrivilegeLevel::Supervisor => SIE,
            PrivilegeLevel::Machine => MIE,
        }
    }

    pub fn pie(mode: PrivilegeLevel) -> usize {
        match mode {
            PrivilegeLevel::User => UPIE,
            PrivilegeLevel::Supervisor => SPIE,
            PrivilegeLevel::Machine => MPIE,
        }
    }
}

/// Bit indices into the mstatush register.
mod hidx {
    pub const SBE: usize = 4;
    pub const MBE: usize = 5;
}
