//! Trap entry and trap return engines.

use log::warn;

use super::{AccessFaultDetail, Hart};
use crate::bus::SystemBus;
use crate::exception::{self, Exception, Trap};
use crate::hart::csr::{DebugCause, IntCtlMode, Xcause};
use crate::{isa, Endianness, PrivilegeLevel, PrivilegeVersion};

impl Hart {
    /// Does this exception code correspond to a retired instruction?
    fn retired_code(&self, trap: Trap) -> bool {
        match trap {
            Trap::Exception(Exception::Breakpoint)
            | Trap::Exception(Exception::EnvironmentCallFromUMode)
            | Trap::Exception(Exception::EnvironmentCallFromSMode)
            | Trap::Exception(Exception::EnvironmentCallFromMMode) => {
                self.config().priv_version < PrivilegeVersion::V1_12
            }
            _ => false,
        }
    }

    /// Take a processor exception or interrupt.
    ///
    /// Computes the target privilege, updates the per-mode trap CSRs and
    /// the mstatus interrupt-enable stack, resolves the handler PC (direct,
    /// vectored, or CLIC-vectored) and redirects execution there.
    pub fn take_exception<B: SystemBus>(&mut self, bus: &mut B, trap: Trap, tval: u32) {
        if self.debug_mode {
            // No further exceptions are taken in Debug mode: any repeated
            // instruction is abandoned and Debug mode is re-entered.
            self.enter_debug(DebugCause::None);
            return;
        }

        let shv = self.clic_sel().shv;
        let is_int = trap.is_interrupt();
        let ecode = trap.code();
        let mut ecode_mod = ecode;
        let epc = self.epc();
        let mode_y = self.current_mode();

        // The trapping instruction does not retire; EBREAK and ECALL did
        // before privilege version 1.12.
        if self.retired_code(trap) && !self.inhibit_instret() {
            self.minstret = self.minstret.wrapping_add(1);
        }
        if !self.inhibit_cycle() {
            self.mcycle = self.mcycle.wrapping_add(1);
        }

        // Latch or clear the access-fault detail depending on the trap,
        // carrying the device-vs-plain distinction to observers.
        self.af_error_out = match trap {
            Trap::Exception(e) if e.is_access_fault() => self.af_error_in,
            _ => AccessFaultDetail::None,
        };

        self.clear_reservation();

        // Trap target mode (X). A CLIC interrupt carries its target mode
        // in the selection; everything else consults the delegation
        // registers.
        let mode_x = match trap {
            Trap::Exception(_) => self.exception_mode_x(ecode),
            Trap::Interrupt(_) if self.pend_enab.is_clic => self.pend_enab.privilege,
            Trap::Interrupt(code) => self.interrupt_mode_x(code),
        };

        // Platforms with an interrupt-ID bus substitute the reported code
        // for external interrupts.
        if is_int && (8..=11).contains(&ecode) {
            let supplied = self.ext_int[(ecode - 8) as usize];
            if supplied != 0 {
                ecode_mod = supplied;
            }
        }

        // Horizontal synchronous traps, which stay within a privilege
        // mode, are serviced at the interrupt level of the trapping
        // instruction. Vertical traps are taken at level 0 in the higher
        // mode.
        let level: i32 = if is_int {
            self.pend_enab.level as i32
        } else if mode_x != mode_y {
            0
        } else {
            -1
        };

        let tval = if self.config().tval_zero { 0 } else { tval };

        let (base, ic_mode) = self.enter_target_mode(mode_x, is_int, ecode_mod, epc, tval, level);

        if mode_x == PrivilegeLevel::Supervisor {
            self.status.set_spp(mode_y.into());
        } else if mode_x == PrivilegeLevel::Machine {
            self.status.set_mpp(mode_y.into());
        }

        self.set_mode(mode_x);
        self.exception = Some(trap);

        let handler_pc = if ic_mode == IntCtlMode::Direct || !is_int {
            base
        } else if ic_mode != IntCtlMode::Clic {
            base.wrapping_add(4 * ecode)
        } else if !shv {
            base & !63
        } else {
            // SHV interrupts are acknowledged automatically, before the
            // vector-table fetch: an edge-triggered source is already
            // deasserted even if the fetch below faults, matching fabric
            // behavior.
            self.acknowledge_clic_int(ecode);
            match self.clic_vectored_handler_pc(bus, mode_x, ecode_mod) {
                Some(pc) => pc,
                // A nested trap during the table fetch has already been
                // delivered; abandon this one.
                None => return,
            }
        };

        self.pc = handler_pc;

        let hart_id = self.config().hart_id;
        for observer in &mut self.observers {
            observer.get_mut().trap(hart_id, mode_x);
        }
    }

    /// Update trap state for entry to mode X: push the interrupt-enable
    /// stack, write xcause/xepc/xtval, snapshot the previous interrupt
    /// level and install the new one, and return the handler base and
    /// dispatch mode from xtvec.
    fn enter_target_mode(
        &mut self,
        mode_x: PrivilegeLevel,
        is_int: bool,
        ecode_mod: u32,
        epc: u32,
        tval: u32,
        level: i32,
    ) -> (u32, IntCtlMode) {
        let ie = self.status.ie(mode_x);
        let il = self.mintstatus.il(mode_x);
        let clic_x = self.use_clic(mode_x);

        self.status.set_pie(mode_x, ie);
        self.status.set_ie(mode_x, false);

        let csrs = self.trap_csrs.get_mut(mode_x);

        // Outside CLIC mode the cause register starts from zero; in CLIC
        // mode the remaining bits are preserved.
        if !clic_x {
            *csrs.cause_mut() = Xcause::default();
        }
        let cause = csrs.cause_mut();
        cause.set_code(ecode_mod);
        cause.set_interrupt(is_int);
        cause.set_pil(il);

        csrs.write_epc(epc, u32::MAX);
        csrs.write_tval(tval, u32::MAX);

        let base = csrs.tvec().base();
        let ic_mode = csrs.tvec().mode();

        if level >= 0 {
            self.mintstatus.set_il(mode_x, level as u8);
        }

        (base, ic_mode)
    }

    /// Fetch a CLIC vector-table entry for hardware-vectored dispatch.
    ///
    /// Returns `None` if the fetch faulted, in which case the nested trap
    /// has already been delivered and the caller must abandon the outer
    /// one.
    fn clic_vectored_handler_pc<B: SystemBus>(
        &mut self,
        bus: &mut B,
        mode_x: PrivilegeLevel,
        int_num: u32,
    ) -> Option<u32> {
        let tbase = self.trap_csrs.get(mode_x).read_tvt();

        // xcause.inhv is set for the duration of the vector lookup so a
        // nested trap records that the handler-address fetch was in
        // progress.
        self.trap_csrs.get_mut(mode_x).cause_mut().set_inhv(true);

        let address = tbase.wrapping_add(4 * int_num);
        let mut entry = [0u8; 4];
        if bus.read(&mut entry, address).is_err() {
            self.take_memory_exception(bus, Exception::LoadAccessFault, address);
            return None;
        }
        let handler_pc = match self.data_endianness(mode_x) {
            Endianness::LE => u32::from_le_bytes(entry),
            Endianness::BE => u32::from_be_bytes(entry),
        };

        self.trap_csrs.get_mut(mode_x).cause_mut().set_inhv(false);

        Some(handler_pc & !1)
    }

    /// Take a memory exception, unless an active first-only-fault vector
    /// instruction suppresses it into a `vl` clamp.
    pub fn take_memory_exception<B: SystemBus>(
        &mut self,
        bus: &mut B,
        exception: Exception,
        tval: u32,
    ) {
        if self.handle_first_only_fault() {
            return;
        }
        self.report_memory_exception(Trap::Exception(exception), tval);
        self.take_exception(bus, Trap::Exception(exception), tval);
    }

    /// Returns whether an active first-only-fault exception was
    /// encountered, in which case no exception should be taken.
    fn handle_first_only_fault(&mut self) -> bool {
        if !self.v_first_fault {
            return false;
        }
        // First-only-fault mode deactivates whether or not the exception
        // is taken.
        self.v_first_fault = false;
        if self.vstart != 0 {
            // Suppress the exception and clamp vl to the current vstart.
            self.vl = self.vstart;
            true
        } else {
            false
        }
    }

    fn report_memory_exception(&self, trap: Trap, tval: u32) {
        warn!(
            "hart {}: {} ({:#010x})",
            self.config().hart_id,
            exception::describe(trap),
            tval
        );
    }

    /// Take an Illegal Instruction exception. xtval carries the
    /// instruction pattern when so configured.
    pub fn illegal_instruction<B: SystemBus>(&mut self, bus: &mut B) {
        let mut tval = 0;
        if self.config().tval_ii_code && !self.config().tval_zero {
            tval = self.read_instruction(bus, self.pc);
        }
        self.take_exception(bus, Trap::Exception(Exception::IllegalInstruction), tval);
    }

    // Instructions are stored as 16-bit little-endian parcels regardless
    // of data endianness.
    fn read_instruction<B: SystemBus>(&mut self, bus: &mut B, address: u32) -> u32 {
        let mut parcel = [0u8; 2];
        if bus.read(&mut parcel, address).is_err() {
            return 0;
        }
        let low = u16::from_le_bytes(parcel) as u32;
        if low & 0b11 != 0b11 {
            return low;
        }
        let mut upper = [0u8; 2];
        if bus.read(&mut upper, address.wrapping_add(2)).is_err() {
            return low;
        }
        low | (u16::from_le_bytes(upper) as u32) << 16
    }

    /// Take an Instruction Address Misaligned exception.
    pub fn instruction_address_misaligned<B: SystemBus>(&mut self, bus: &mut B, tval: u32) {
        let trap = Trap::Exception(Exception::InstructionAddressMisaligned);
        self.report_memory_exception(trap, tval);
        self.take_exception(bus, trap, tval & !1);
    }

    /// Take an ECALL exception for the current privilege mode.
    pub fn ecall<B: SystemBus>(&mut self, bus: &mut B) {
        let exception = Exception::environment_call(self.current_mode());
        self.take_exception(bus, Trap::Exception(exception), 0);
    }

    //
    // Exception return
    //

    /// Return from an M-mode trap handler.
    pub fn mret(&mut self) {
        // Undefined behavior in Debug mode: a NOP in this model.
        if self.debug_mode {
            return;
        }

        let mpp = self.status.mpp();
        let min_mode = self.min_mode();
        let new_mode = if self.has_mode(mpp) { mpp } else { min_mode };

        self.clear_reservation_xret();

        // Restore the previous interrupt level (CLIC mode).
        if self.use_clic(PrivilegeLevel::Machine) {
            let pil = self.trap_csrs.get(PrivilegeLevel::Machine).cause().pil();
            self.mintstatus.set_il(PrivilegeLevel::Machine, pil);
        }

        // Pop the interrupt-enable stack.
        let mpie = self.status.pie(PrivilegeLevel::Machine);
        self.status.set_ie(PrivilegeLevel::Machine, mpie);
        self.status.set_pie(PrivilegeLevel::Machine, true);
        self.status.set_mpp(min_mode.into());

        self.clear_mprv_on_return(new_mode);

        let epc = self.trap_csrs.get(PrivilegeLevel::Machine).read_epc();
        self.eret_common(PrivilegeLevel::Machine, new_mode, epc);
    }

    /// Return from an S-mode trap handler.
    pub fn sret(&mut self) {
        if self.debug_mode {
            return;
        }

        let spp = self.status.spp();
        let min_mode = self.min_mode();
        let new_mode = if self.has_mode(spp) { spp } else { min_mode };

        self.clear_reservation_xret();

        if self.use_clic(PrivilegeLevel::Supervisor) {
            let pil = self
                .trap_csrs
                .get(PrivilegeLevel::Supervisor)
                .cause()
                .pil();
            self.mintstatus.set_il(PrivilegeLevel::Supervisor, pil);
        }

        let spie = self.status.pie(PrivilegeLevel::Supervisor);
        self.status.set_ie(PrivilegeLevel::Supervisor, spie);
        self.status.set_pie(PrivilegeLevel::Supervisor, true);
        self.status.set_spp(min_mode.into());

        self.clear_mprv_on_return(new_mode);

        let epc = self.trap_csrs.get(PrivilegeLevel::Supervisor).read_epc();
        self.eret_common(PrivilegeLevel::Supervisor, new_mode, epc);
    }

    /// Return from a U-mode trap handler (N extension).
    pub fn uret(&mut self) {
        if self.debug_mode {
            return;
        }

        self.clear_reservation_xret();

        if self.use_clic(PrivilegeLevel::User) {
            let pil = self.trap_csrs.get(PrivilegeLevel::User).cause().pil();
            self.mintstatus.set_il(PrivilegeLevel::User, pil);
        }

        let upie = self.status.pie(PrivilegeLevel::User);
        self.status.set_ie(PrivilegeLevel::User, upie);
        self.status.set_pie(PrivilegeLevel::User, true);

        let epc = self.trap_csrs.get(PrivilegeLevel::User).read_epc();
        self.eret_common(PrivilegeLevel::User, PrivilegeLevel::User, epc);
    }

    /// From version 1.12, MRET and SRET clear MPRV when the new mode is
    /// less privileged than M-mode.
    pub(crate) fn clear_mprv_on_return(&mut self, new_mode: PrivilegeLevel) {
        if self.config().priv_version > PrivilegeVersion::V1_11
            && new_mode != PrivilegeLevel::Machine
        {
            self.status.set_mprv(false);
        }
    }

    /// Common actions when returning from a trap handler: switch mode,
    /// jump to the return address, notify observers, and re-poll for
    /// pending interrupts (the interrupt-enable pop may immediately expose
    /// a deliverable one).
    pub(crate) fn eret_common(
        &mut self,
        ret_mode: PrivilegeLevel,
        new_mode: PrivilegeLevel,
        epc: u32,
    ) {
        self.set_mode(new_mode);

        // Mask the return address to a 4-byte boundary if compressed
        // instructions are not enabled.
        self.pc = if self.config().arch & isa::C != 0 {
            epc & !1
        } else {
            epc & !3
        };

        let hart_id = self.config().hart_id;
        for observer in &mut self.observers {
            observer.get_mut().eret(hart_id, ret_mode);
        }

        self.test_interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::{ClicConfig, Config, FetchOutcome};
    use crate::observer::HartObserver;
    use crate::testing::TestBus;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn bus() -> TestBus {
        TestBus::new(0x1_0000)
    }

    #[test]
    fn test_delegated_timer_interrupt_to_supervisor() {
        let mut bus = bus();
        let mut hart = Hart::new(Config::default());
        hart.write_mideleg(1 << 5, u32::MAX);
        hart.write_mie(1 << 5, u32::MAX);
        hart.status_mut().set_ie(PrivilegeLevel::Supervisor, true);
        hart.write_xtvec(PrivilegeLevel::Supervisor, 0x400, u32::MAX);
        hart.set_mode(PrivilegeLevel::User);
        hart.set_pc(0x208);

        hart.set_interrupt(5, true);
        assert_eq!(FetchOutcome::Trap, hart.on_fetch(&mut bus, 0x208));

        assert_eq!(PrivilegeLevel::Supervisor, hart.current_mode());
        let scsrs = hart.trap_csrs(PrivilegeLevel::Supervisor);
        assert_eq!(0x8000_0005, scsrs.read_cause());
        assert_eq!(0x208, scsrs.read_epc());
        assert!(hart.status().pie(PrivilegeLevel::Supervisor));
        assert!(!hart.status().ie(PrivilegeLevel::Supervisor));
        assert_eq!(PrivilegeLevel::User, hart.status().spp());
        assert_eq!(0x400, hart.pc());
    }

    #[test]
    fn test_vectored_machine_external() {
        let mut bus = bus();
        let mut hart = Hart::new(Config::default());
        hart.status_mut().set_ie(PrivilegeLevel::Machine, true);
        hart.write_mie(1 << 11, u32::MAX);
        hart.write_xtvec(PrivilegeLevel::Machine, 0x800 | 1, u32::MAX);
        hart.set_pc(0x100);

        hart.set_interrupt(11, true);
        assert_eq!(FetchOutcome::Trap, hart.on_fetch(&mut bus, 0x100));
        assert_eq!(0x800 + 44, hart.pc());
        assert_eq!(
            0x8000_000B,
            hart.trap_csrs(PrivilegeLevel::Machine).read_cause()
        );
    }

    #[test]
    fn test_synchronous_exception_ignores_vectoring() {
        let mut bus = bus();
        let mut hart = Hart::new(Config::default());
        hart.write_xtvec(PrivilegeLevel::Machine, 0x800 | 1, u32::MAX);
        hart.set_pc(0x100);
        hart.take_exception(&mut bus, Trap::Exception(Exception::LoadAccessFault), 0x44);
        assert_eq!(0x800, hart.pc());
        assert_eq!(5, hart.trap_csrs(PrivilegeLevel::Machine).read_cause());
        assert_eq!(0x44, hart.trap_csrs(PrivilegeLevel::Machine).read_tval());
    }

    fn clic_hart() -> Hart {
        let mut hart = Hart::new(Config {
            clic: Some(ClicConfig::default()),
            local_int_num: 48,
            ..Config::default()
        });
        hart.write_xtvec(PrivilegeLevel::Machine, 0x8000_0003, u32::MAX);
        hart.status_mut().set_ie(PrivilegeLevel::Machine, true);
        let mut cfg = crate::hart::clic::Cliccfg::default();
        cfg.set_nvbits(true);
        cfg.set_nlbits(4);
        hart.set_cliccfg_mirror(cfg);
        hart.test_interrupt();
        hart
    }

    #[test]
    fn test_clic_shv_delivery() {
        let mut bus = bus();
        let mut hart = clic_hart();
        hart.trap_csrs_mut(PrivilegeLevel::Machine)
            .write_tvt(0x1000, u32::MAX);
        bus.store_u32_le(0x1000 + 4 * 42, 0x2001);

        // Interrupt 42: edge-triggered, SHV, M-mode, ctl 0xF0.
        hart.write_clic_attr(42, 0xC3, PrivilegeLevel::Machine);
        hart.write_clic_ctl(42, 0xF0);
        hart.write_clic_enable(42, 1);
        hart.set_interrupt(42, true);
        assert_eq!(Some(42), hart.pend_enab.id);

        hart.set_pc(0x100);
        assert_eq!(FetchOutcome::Trap, hart.on_fetch(&mut bus, 0x100));

        // The fetched entry has its LSB masked off.
        assert_eq!(0x2000, hart.pc());
        let mcause = hart.trap_csrs(PrivilegeLevel::Machine).cause();
        assert_eq!(42, mcause.code());
        assert!(mcause.is_interrupt());
        assert!(!mcause.inhv());
        // ctl 0xF0 with nlbits=4: low bits fill with ones.
        assert_eq!(0xFF, hart.read_mintstatus() >> 24);
        // Edge-triggered SHV interrupts are acknowledged (deasserted)
        // before the vector fetch.
        assert_eq!(None, hart.clic_sel().id);
    }

    #[test]
    fn test_clic_non_shv_aligns_to_64_bytes() {
        let mut bus = bus();
        let mut hart = clic_hart();
        // A base whose bits 2..6 are set, to observe the 64-byte mask.
        hart.write_xtvec(PrivilegeLevel::Machine, 0x0000_0073, u32::MAX);

        hart.write_clic_enable(20, 1);
        hart.write_clic_ctl(20, 0xF0);
        hart.set_interrupt(20, true);
        hart.set_pc(0x100);
        assert_eq!(FetchOutcome::Trap, hart.on_fetch(&mut bus, 0x100));
        assert_eq!(0x0000_0040, hart.pc());
    }

    #[test]
    fn test_clic_shv_nested_fault_abandons_outer() {
        let mut bus = bus();
        let mut hart = clic_hart();
        // Vector table beyond the bus: the entry fetch faults.
        hart.trap_csrs_mut(PrivilegeLevel::Machine)
            .write_tvt(0xFFFF_0000, u32::MAX);

        hart.write_clic_attr(7, 0xC1, PrivilegeLevel::Machine);
        hart.write_clic_ctl(7, 0xF0);
        hart.write_clic_enable(7, 1);
        hart.set_interrupt(7, true);

        hart.set_pc(0x100);
        assert_eq!(FetchOutcome::Trap, hart.on_fetch(&mut bus, 0x100));

        // The nested access fault prevails; the outer interrupt is
        // abandoned.
        assert_eq!(
            Some(Trap::Exception(Exception::LoadAccessFault)),
            hart.exception()
        );
        let mcause = hart.trap_csrs(PrivilegeLevel::Machine).cause();
        assert_eq!(5, mcause.code());
        assert!(!mcause.is_interrupt());
        // The interrupted vector fetch stays recorded.
        assert!(mcause.inhv());
        // Handler PC of the nested trap (CLIC mode, synchronous): base.
        assert_eq!(0x8000_0000, hart.pc());
    }

    #[test]
    fn test_first_only_fault_suppression() {
        let mut bus = bus();
        let mut hart = Hart::new(Config::default());
        hart.set_mode(PrivilegeLevel::User);
        hart.set_first_only_fault();
        hart.set_vstart(3);
        hart.set_vl(16);

        hart.take_memory_exception(&mut bus, Exception::LoadPageFault, 0x5000);

        // No trap: vl clamps to vstart and the flag is consumed.
        assert_eq!(PrivilegeLevel::User, hart.current_mode());
        assert_eq!(3, hart.vl());
        assert_eq!(None, hart.exception());
        assert_eq!(0, hart.trap_csrs(PrivilegeLevel::Machine).read_cause());

        // With vstart == 0 the trap is taken (flag already consumed, so
        // re-arm).
        hart.set_first_only_fault();
        hart.set_vstart(0);
        hart.take_memory_exception(&mut bus, Exception::LoadPageFault, 0x5000);
        assert_eq!(PrivilegeLevel::Machine, hart.current_mode());
        assert_eq!(13, hart.trap_csrs(PrivilegeLevel::Machine).read_cause());
    }

    #[test]
    fn test_mret_clears_mprv_and_pops_stack() {
        let mut bus = bus();
        let mut hart = Hart::new(Config::default());
        hart.status_mut().set_ie(PrivilegeLevel::Machine, true);
        hart.set_pc(0x3000);
        hart.take_exception(&mut bus, Trap::Exception(Exception::IllegalInstruction), 0);
        assert_eq!(PrivilegeLevel::Machine, hart.current_mode());
        assert!(!hart.status().ie(PrivilegeLevel::Machine));
        assert!(hart.status().pie(PrivilegeLevel::Machine));

        // Return to U with MPRV set.
        hart.status_mut().set_mprv(true);
        hart.status_mut()
            .set_mpp(crate::RawPrivilegeLevel::User);
        hart.mret();

        assert_eq!(PrivilegeLevel::User, hart.current_mode());
        assert!(!hart.status().mprv());
        assert_eq!(PrivilegeLevel::User, hart.status().mpp());
        assert!(hart.status().ie(PrivilegeLevel::Machine));
        assert!(hart.status().pie(PrivilegeLevel::Machine));
        assert_eq!(0x3000, hart.pc());
    }

    #[test]
    fn test_mret_keeps_mprv_on_older_privilege_version() {
        let mut bus = bus();
        let mut hart = Hart::new(Config {
            priv_version: PrivilegeVersion::V1_11,
            ..Config::default()
        });
        hart.take_exception(&mut bus, Trap::Exception(Exception::IllegalInstruction), 0);
        hart.status_mut().set_mprv(true);
        hart.status_mut()
            .set_mpp(crate::RawPrivilegeLevel::User);
        hart.mret();
        assert!(hart.status().mprv());
    }

    #[test]
    fn test_sret_pops_stack_and_clears_spp() {
        let mut hart = Hart::new(Config::default());
        hart.set_mode(PrivilegeLevel::Supervisor);
        hart.status_mut().set_pie(PrivilegeLevel::Supervisor, true);
        hart.status_mut()
            .set_spp(crate::RawPrivilegeLevel::Supervisor);
        hart.trap_csrs_mut(PrivilegeLevel::Supervisor)
            .write_epc(0x4444, u32::MAX);

        hart.sret();

        assert_eq!(PrivilegeLevel::Supervisor, hart.current_mode());
        assert!(hart.status().ie(PrivilegeLevel::Supervisor));
        assert!(hart.status().pie(PrivilegeLevel::Supervisor));
        assert_eq!(PrivilegeLevel::User, hart.status().spp());
        assert_eq!(0x4444, hart.pc());
    }

    #[test]
    fn test_xret_return_alignment_without_compressed() {
        let mut hart = Hart::new(Config {
            arch: isa::S | isa::U,
            ..Config::default()
        });
        hart.trap_csrs_mut(PrivilegeLevel::Machine)
            .write_epc(0x1006, u32::MAX);
        hart.status_mut()
            .set_mpp(crate::RawPrivilegeLevel::Machine);
        hart.mret();
        assert_eq!(0x1004, hart.pc());
    }

    #[test]
    fn test_trap_clears_reservation_xret_configurable() {
        let mut bus = bus();
        let mut hart = Hart::new(Config::default());
        hart.set_reservation(0x9000);
        hart.take_exception(&mut bus, Trap::Exception(Exception::Breakpoint), 0);
        assert_eq!(None, hart.reservation());

        hart.set_reservation(0x9000);
        hart.status_mut()
            .set_mpp(crate::RawPrivilegeLevel::Machine);
        hart.mret();
        assert_eq!(None, hart.reservation());

        // With xret_preserves_lr the return keeps the reservation.
        let mut hart = Hart::new(Config {
            xret_preserves_lr: true,
            ..Config::default()
        });
        hart.set_reservation(0x9000);
        hart.status_mut()
            .set_mpp(crate::RawPrivilegeLevel::Machine);
        hart.mret();
        assert_eq!(Some(0x9000), hart.reservation());
    }

    #[test]
    fn test_access_fault_detail_latching() {
        let mut bus = bus();
        let mut hart = Hart::new(Config::default());
        hart.set_access_fault_detail(AccessFaultDetail::Device);
        hart.take_exception(&mut bus, Trap::Exception(Exception::LoadAccessFault), 0x10);
        assert_eq!(AccessFaultDetail::Device, hart.access_fault_detail());

        // A non-access-fault trap clears the latched detail.
        hart.take_exception(&mut bus, Trap::Exception(Exception::IllegalInstruction), 0);
        assert_eq!(AccessFaultDetail::None, hart.access_fault_detail());
    }

    #[test]
    fn test_tval_zero_configuration() {
        let mut bus = bus();
        let mut hart = Hart::new(Config {
            tval_zero: true,
            ..Config::default()
        });
        hart.take_exception(
            &mut bus,
            Trap::Exception(Exception::LoadAccessFault),
            0xABCD,
        );
        assert_eq!(0, hart.trap_csrs(PrivilegeLevel::Machine).read_tval());
    }

    #[test]
    fn test_illegal_instruction_tval_encoding() {
        let mut bus = bus();
        bus.store_u32_le(0x100, 0xDEAD_BEEF);
        let mut hart = Hart::new(Config::default());
        hart.set_pc(0x100);
        hart.illegal_instruction(&mut bus);
        assert_eq!(
            0xDEAD_BEEF,
            hart.trap_csrs(PrivilegeLevel::Machine).read_tval()
        );

        // A compressed encoding reports only the 16-bit parcel.
        bus.store_u32_le(0x200, 0xFFFF_0001);
        let mut hart = Hart::new(Config::default());
        hart.set_pc(0x200);
        hart.illegal_instruction(&mut bus);
        assert_eq!(
            0x0001,
            hart.trap_csrs(PrivilegeLevel::Machine).read_tval()
        );

        // Without tval_ii_code the value is zero.
        let mut hart = Hart::new(Config {
            tval_ii_code: false,
            ..Config::default()
        });
        hart.set_pc(0x100);
        hart.illegal_instruction(&mut bus);
        assert_eq!(0, hart.trap_csrs(PrivilegeLevel::Machine).read_tval());
    }

    #[test]
    fn test_instruction_address_misaligned_masks_tval() {
        let mut bus = bus();
        let mut hart = Hart::new(Config::default());
        hart.instruction_address_misaligned(&mut bus, 0x1001);
        assert_eq!(
            0x1000,
            hart.trap_csrs(PrivilegeLevel::Machine).read_tval()
        );
    }

    #[test]
    fn test_ecall_reports_originating_mode() {
        let mut bus = bus();
        let mut hart = Hart::new(Config::default());
        hart.set_mode(PrivilegeLevel::User);
        hart.ecall(&mut bus);
        assert_eq!(8, hart.trap_csrs(PrivilegeLevel::Machine).read_cause());

        let mut hart = Hart::new(Config::default());
        hart.set_mode(PrivilegeLevel::Machine);
        hart.ecall(&mut bus);
        assert_eq!(11, hart.trap_csrs(PrivilegeLevel::Machine).read_cause());
    }

    #[test]
    fn test_external_interrupt_id_substitution() {
        let mut bus = bus();
        let mut hart = Hart::new(Config {
            external_int_id: true,
            ..Config::default()
        });
        hart.status_mut().set_ie(PrivilegeLevel::Machine, true);
        hart.write_mie(1 << 11, u32::MAX);
        hart.set_external_interrupt_id(PrivilegeLevel::Machine, 0x123);
        hart.set_interrupt(11, true);
        hart.set_pc(0x100);
        assert_eq!(FetchOutcome::Trap, hart.on_fetch(&mut bus, 0x100));
        // The reported code is substituted; delivery is unchanged.
        assert_eq!(
            0x123,
            hart.trap_csrs(PrivilegeLevel::Machine).cause().code()
        );
    }

    #[test]
    fn test_trap_and_eret_notify_observers_in_order() {
        #[derive(Default)]
        struct Recorder(Rc<RefCell<Vec<String>>>, &'static str);
        impl HartObserver for Recorder {
            fn trap(&mut self, _hart_id: u32, mode: PrivilegeLevel) {
                self.0.borrow_mut().push(format!("{}:trap:{mode}", self.1));
            }
            fn eret(&mut self, _hart_id: u32, mode: PrivilegeLevel) {
                self.0.borrow_mut().push(format!("{}:eret:{mode}", self.1));
            }
        }

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = bus();
        let mut hart = Hart::new(Config::default());
        hart.register_observer(Box::new(Recorder(log.clone(), "a")));
        hart.register_observer(Box::new(Recorder(log.clone(), "b")));

        hart.take_exception(&mut bus, Trap::Exception(Exception::Breakpoint), 0);
        hart.mret();

        assert_eq!(
            vec!["a:trap:M", "b:trap:M", "a:eret:M", "b:eret:M"],
            *log.borrow()
        );
    }

    #[test]
    fn test_eret_repolls_pending_interrupts() {
        let mut bus = bus();
        let mut hart = Hart::new(Config::default());
        hart.status_mut().set_ie(PrivilegeLevel::Machine, true);
        hart.write_mie(1 << 7, u32::MAX);
        // Trap entry clears MIE, so the timer interrupt raised inside the
        // handler is not deliverable until MRET pops the stack.
        hart.take_exception(&mut bus, Trap::Exception(Exception::Breakpoint), 0);
        hart.set_interrupt(7, true);
        assert_eq!(None, hart.pend_enab.id);
        hart.mret();
        assert_eq!(Some(7), hart.pend_enab.id);
    }
}
