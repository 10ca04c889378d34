//! Per-hart trap, interrupt and Debug-mode state machine.

pub mod clic;
pub mod csr;
pub mod debug;
pub mod interrupts;
pub mod signals;
pub mod status;
pub mod trap;

use log::trace;

use crate::bus::SystemBus;
use crate::exception::{
    self, implemented_masks, ImplementedMasks, Trap, LOCAL_INTERRUPT_BASE,
};
use crate::observer::{DynHartObserver, ExtraException, HartObserver};
use crate::{isa, Endianness, PrivilegeLevel, PrivilegeVersion};

use clic::{ClicSel, ClicState};
use csr::{Dcsr, Intthresh, Mcountinhibit, Mintstatus, PerMode, TrapCsrs};
use interrupts::{BasicIntState, Interrupts, PendEnab};
use signals::{NetValue, OutputNets};
use status::Status;

/// Host reaction to Debug-mode entry.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum DebugMode {
    /// Debug mode is not implemented; debug CSRs and ports are absent.
    #[default]
    Disabled,
    /// Halt the hart while in Debug mode.
    Halt,
    /// Request an asynchronous host interrupt on entry.
    Interrupt,
    /// Jump to the configured debug vector on entry.
    Vector,
}

/// CLIC configuration; presence of this block makes the CLIC present.
#[derive(Debug, Clone)]
pub struct ClicConfig {
    /// Base address of the cluster's memory-mapped CLIC block.
    pub mclicbase: u32,
    /// Number of writable bits in `cliccfg.nmbits` (CLICCFGMBITS):
    /// 0 = M only, 1 = M/U, 2 = M/S/U.
    pub cfg_mbits: u8,
    /// Number of implemented (writable) bits in `clicintctl`
    /// (CLICINTCTLBITS, `0..=8`). The remaining low bits read as 1.
    pub intctl_bits: u8,
    /// Whether Selective Hardware Vectoring is implemented (CLICSELHVEC);
    /// fixes the read-only `cliccfg.nvbits`.
    pub sel_hvec: bool,
    /// CLIC version reported in `clicinfo`.
    pub version: u8,
}

impl Default for ClicConfig {
    fn default() -> Self {
        Self {
            mclicbase: 0x0200_0000,
            cfg_mbits: 2,
            intctl_bits: 4,
            sel_hvec: true,
            version: 1,
        }
    }
}

/// Immutable per-hart configuration.
///
/// It is not possible to modify the configuration after creation.
#[derive(Debug, Clone)]
pub struct Config {
    /// > The mhartid CSR is an MXLEN-bit read-only register containing the
    /// > integer ID of the hardware thread running the code. Hart IDs must
    /// > be unique within the execution environment.
    pub hart_id: u32,
    /// Implemented single-letter extensions (misa-style, see
    /// [`crate::isa`]). Determines the implemented privilege modes (S, U),
    /// user-level interrupts (N), the LR/SC ports (A) and xRET target
    /// alignment (C).
    pub arch: u32,
    /// Privileged-architecture version the hart implements.
    pub priv_version: PrivilegeVersion,
    /// Address at which execution resumes after reset.
    pub reset_address: u32,
    /// Address of the NMI handler.
    pub nmi_address: u32,
    /// Cause value written to mcause when an NMI is taken.
    pub ecode_nmi: u32,
    /// Number of local interrupts (cause codes 16..16+n, at most 48).
    pub local_int_num: u32,
    /// Mask of standard/local interrupts explicitly absent on this variant.
    pub unimp_int_mask: u64,
    /// Whether per-mode `<X>ExternalInterruptID` inputs exist; when they
    /// carry a nonzero value it replaces the reported external-interrupt
    /// cause code.
    pub external_int_id: bool,
    /// Force xtval to zero on every trap.
    pub tval_zero: bool,
    /// Write the faulting instruction encoding to xtval on Illegal
    /// Instruction (ignored when `tval_zero` is set).
    pub tval_ii_code: bool,
    /// When set, xRET does not clear an active LR/SC reservation.
    pub xret_preserves_lr: bool,
    /// Debug-mode implementation and entry reaction.
    pub debug_mode: DebugMode,
    /// Debug-mode entry vector (DebugMode::Vector, fresh entry).
    pub debug_address: u32,
    /// Debug-mode exception vector (DebugMode::Vector, re-entry).
    pub dexc_address: u32,
    /// Whether the basic (`mip`/`mie`) interrupt controller is present.
    pub basic_present: bool,
    /// CLIC configuration, when a CLIC is present.
    pub clic: Option<ClicConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hart_id: 0,
            arch: isa::A | isa::C | isa::N | isa::S | isa::U,
            priv_version: PrivilegeVersion::V1_12,
            reset_address: 0x0000_1000,
            nmi_address: 0x0000_1100,
            ecode_nmi: 0,
            local_int_num: 0,
            unimp_int_mask: 0,
            external_int_id: false,
            tval_zero: false,
            tval_ii_code: true,
            xret_preserves_lr: false,
            debug_mode: DebugMode::Disabled,
            debug_address: 0,
            dexc_address: 0,
            basic_present: true,
            clic: None,
        }
    }
}

/// Reasons a hart can be halted. Multiple reasons may be active at once;
/// the hart runs only when all are clear.
pub mod disable {
    pub const RESET: u8 = 1 << 0;
    pub const WFI: u8 = 1 << 1;
    pub const DEBUG: u8 = 1 << 2;
}

/// Sub-cause detail attached to access faults, distinguishing device
/// errors from plain faults for downstream observers.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum AccessFaultDetail {
    #[default]
    None,
    Device,
}

/// Verdict of the fetch gate for one instruction fetch.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FetchOutcome {
    /// No exception pending; the executor may fetch and execute.
    Fetch,
    /// A trap, interrupt or Debug-mode entry was delivered; the PC has been
    /// redirected and the fetch must be retried there.
    Trap,
}

/// One hardware execution context.
///
/// > From the perspective of software running in a given execution
/// > environment, a hart is a resource that autonomously fetches and
/// > executes RISC-V instructions within that execution environment.
///
/// This model holds the trap-relevant slice of a hart: privilege state,
/// trap CSRs, both interrupt controllers, Debug-mode state, latched
/// external signals and the architectural counters. The external executor
/// drives it through [`Hart::on_fetch`], the trap entry points in
/// [`trap`](self::trap), and [`Hart::retire_instruction`].
#[derive(Debug)]
pub struct Hart {
    config: Config,
    masks: ImplementedMasks,

    mode: PrivilegeLevel,
    debug_mode: bool,
    disable: u8,
    pc: u32,

    status: Status,
    trap_csrs: PerMode<TrapCsrs>,
    mintstatus: Mintstatus,
    intthresh: PerMode<Intthresh>,
    dcsr: Dcsr,
    dpc: u32,
    mcountinhibit: Mcountinhibit,

    mcycle: u64,
    minstret: u64,

    interrupts: Interrupts,
    /// Externally-asserted (level-latched) pending bits, one per interrupt
    /// cause code.
    ip: Vec<u64>,
    /// Software-asserted pending bits, ORed into mip.
    swip: u64,
    pend_enab: PendEnab,
    /// Externally-supplied external-interrupt codes, indexed by target
    /// privilege (U, S, reserved, M).
    ext_int: [u32; 4],
    clic: Option<ClicState>,

    // Last-reported selector states, for change-only logging.
    int_state: BasicIntState,
    clic_state: ClicSel,

    exception: Option<Trap>,
    exclusive_tag: Option<u32>,
    af_error_in: AccessFaultDetail,
    af_error_out: AccessFaultDetail,
    v_first_fault: bool,
    vstart: u32,
    vl: u32,

    net_value: NetValue,
    outputs: OutputNets,
    step_countdown: Option<u32>,
    host_interrupt_requested: bool,

    observers: Vec<DynHartObserver>,
}

impl Hart {
    pub fn new(config: Config) -> Self {
        let masks = implemented_masks(config.arch, config.local_int_num, config.unimp_int_mask);
        let int_num = Self::int_num_for(&config);
        let ip_dwords = (int_num as usize + 63) / 64;
        let clic = config.clic.as_ref().map(|cc| ClicState::new(cc, int_num));
        Self {
            masks,
            mode: PrivilegeLevel::Machine,
            debug_mode: false,
            disable: 0,
            pc: config.reset_address,
            status: Status::new(),
            trap_csrs: PerMode::default(),
            mintstatus: Mintstatus::default(),
            intthresh: PerMode::default(),
            dcsr: Dcsr::new(),
            dpc: 0,
            mcountinhibit: Mcountinhibit::default(),
            mcycle: 0,
            minstret: 0,
            interrupts: Interrupts::new(),
            ip: vec![0; ip_dwords],
            swip: 0,
            pend_enab: PendEnab::default(),
            ext_int: [0; 4],
            clic,
            int_state: BasicIntState::default(),
            clic_state: ClicSel::default(),
            exception: None,
            exclusive_tag: None,
            af_error_in: AccessFaultDetail::None,
            af_error_out: AccessFaultDetail::None,
            v_first_fault: false,
            vstart: 0,
            vl: 0,
            net_value: NetValue::default(),
            outputs: OutputNets::default(),
            step_countdown: None,
            host_interrupt_requested: false,
            observers: Vec::new(),
            config,
        }
    }

    fn int_num_for(config: &Config) -> u32 {
        LOCAL_INTERRUPT_BASE + config.local_int_num.min(48)
    }

    /// Total number of interrupt cause codes (standard plus local).
    pub fn int_num(&self) -> u32 {
        Self::int_num_for(&self.config)
    }

    /// Provide a read-only view of this hart's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hart_id(&self) -> u32 {
        self.config.hart_id
    }

    /// Append an observer record. Notifications fire in insertion order.
    pub fn register_observer(&mut self, observer: Box<dyn HartObserver>) {
        self.observers.push(DynHartObserver(observer));
    }

    //
    // Privilege/mode utilities
    //

    /// Returns the current privilege mode the hart is in.
    pub fn current_mode(&self) -> PrivilegeLevel {
        self.mode
    }

    /// Whether the hart is in Debug mode.
    pub fn in_debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Whether the hart implements the given privilege mode.
    pub fn has_mode(&self, mode: PrivilegeLevel) -> bool {
        match mode {
            PrivilegeLevel::Machine => true,
            PrivilegeLevel::Supervisor => self.config.arch & isa::S != 0,
            PrivilegeLevel::User => self.config.arch & isa::U != 0,
        }
    }

    /// The least-privileged mode the hart implements.
    pub fn min_mode(&self) -> PrivilegeLevel {
        if self.config.arch & isa::U != 0 {
            PrivilegeLevel::User
        } else {
            PrivilegeLevel::Machine
        }
    }

    pub(crate) fn set_mode(&mut self, mode: PrivilegeLevel) {
        self.mode = mode;
    }

    /// Returns the data endianness for the given privilege level.
    pub fn data_endianness(&self, mode: PrivilegeLevel) -> Endianness {
        let be = match mode {
            PrivilegeLevel::User => self.status.ube(),
            PrivilegeLevel::Supervisor => self.status.sbe(),
            PrivilegeLevel::Machine => self.status.mbe(),
        };
        match be {
            true => Endianness::BE,
            false => Endianness::LE,
        }
    }

    /// Whether the hart implements the exception or interrupt.
    pub fn has_exception(&self, trap: Trap) -> bool {
        match trap {
            Trap::Interrupt(12) => self.clic.is_some(),
            Trap::Exception(e) => self.masks.exceptions & (1 << e.code()) != 0,
            Trap::Interrupt(code) if code < 64 => self.masks.interrupts & (1 << code) != 0,
            Trap::Interrupt(_) => false,
        }
    }

    /// The last taken exception, if any.
    pub fn exception(&self) -> Option<Trap> {
        self.exception
    }

    //
    // Program counter and counters
    //

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    /// PC written to xepc on trap entry: the address of the current
    /// (not-yet-retired) instruction.
    fn epc(&self) -> u32 {
        self.pc
    }

    pub fn read_minstret(&self) -> u64 {
        self.minstret
    }

    pub fn read_mcycle(&self) -> u64 {
        self.mcycle
    }

    fn inhibit_instret(&self) -> bool {
        self.mcountinhibit.ir() || (self.debug_mode && self.dcsr.stopcount())
    }

    fn inhibit_cycle(&self) -> bool {
        self.mcountinhibit.cy() || (self.debug_mode && self.dcsr.stopcount())
    }

    /// Account for one retired instruction. The executor calls this after
    /// each instruction that completes without a trap; the hart advances
    /// counters and the single-step timer.
    pub fn retire_instruction(&mut self) {
        if !self.inhibit_instret() {
            self.minstret = self.minstret.wrapping_add(1);
        }
        if !self.inhibit_cycle() {
            self.mcycle = self.mcycle.wrapping_add(1);
        }
        self.step_timer_tick();
    }

    pub fn read_mcountinhibit(&self) -> u32 {
        self.mcountinhibit.read()
    }

    pub fn write_mcountinhibit(&mut self, value: u32, mask: u32) {
        self.mcountinhibit.write(value, mask);
    }

    //
    // Trap CSR access (routed here by the external CSR file)
    //

    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Direct access to mstatus. Callers that change interrupt enables
    /// should follow up with [`Hart::test_interrupt`].
    pub fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    /// The xepc/xcause/xtval/xtvec/xtvt group of the given privilege
    /// level.
    pub fn trap_csrs(&self, mode: PrivilegeLevel) -> &TrapCsrs {
        self.trap_csrs.get(mode)
    }

    pub fn trap_csrs_mut(&mut self, mode: PrivilegeLevel) -> &mut TrapCsrs {
        self.trap_csrs.get_mut(mode)
    }

    pub fn read_xtvec(&self, mode: PrivilegeLevel) -> u32 {
        self.trap_csrs.get(mode).tvec().as_raw()
    }

    pub fn write_xtvec(&mut self, mode: PrivilegeLevel, value: u32, mask: u32) {
        let clic_present = self.config.clic.is_some();
        self.trap_csrs
            .get_mut(mode)
            .write_tvec(value, mask, clic_present);
        self.test_interrupt();
    }

    pub fn read_mintstatus(&self) -> u32 {
        self.mintstatus.as_raw()
    }

    pub fn read_xintthresh(&self, mode: PrivilegeLevel) -> u32 {
        self.intthresh.get(mode).th() as u32
    }

    pub fn write_xintthresh(&mut self, mode: PrivilegeLevel, value: u32, mask: u32) {
        self.intthresh.get_mut(mode).write(value, mask);
        self.test_interrupt();
    }

    pub fn read_dcsr(&self) -> u32 {
        self.dcsr.as_raw()
    }

    pub fn write_dcsr(&mut self, value: u32, mask: u32) {
        self.dcsr.write(value, mask);
    }

    pub(crate) fn dcsr_mut(&mut self) -> &mut Dcsr {
        &mut self.dcsr
    }

    pub fn read_dpc(&self) -> u32 {
        self.dpc
    }

    pub fn write_dpc(&mut self, value: u32, mask: u32) {
        self.dpc = self.dpc & !mask | value & mask;
    }

    //
    // Halt/restart
    //

    /// Whether the hart is currently halted for any reason.
    pub fn is_halted(&self) -> bool {
        self.disable != 0
    }

    /// Active halt-reason bits ([`disable`]).
    pub fn halt_reasons(&self) -> u8 {
        self.disable
    }

    /// Halt the hart for `reason`. Notifies observers only on the
    /// running-to-halted transition.
    pub(crate) fn halt(&mut self, reason: u8) {
        let disabled = self.disable != 0;
        self.disable |= reason;
        if !disabled {
            self.notify_halt_restart(true);
        }
    }

    /// Clear the given halt reasons, restarting the hart if none remain.
    pub(crate) fn restart(&mut self, reason: u8) {
        if self.disable == 0 {
            return;
        }
        self.disable &= !reason;
        if self.disable == 0 {
            self.notify_halt_restart(false);
        }
    }

    fn notify_halt_restart(&mut self, halted: bool) {
        let hart_id = self.config.hart_id;
        for observer in &mut self.observers {
            observer.get_mut().halt_restart(hart_id, halted);
        }
    }

    //
    // Pending-interrupt bookkeeping
    //

    /// Pending basic-mode interrupts that would cause resumption from WFI
    /// (these may still be masked by global enables or delegation).
    fn pending_basic(&self) -> u64 {
        self.interrupts.mie() & self.interrupts.mip()
    }

    /// Whether any CLIC-mode interrupt is pending.
    fn pending_clic(&self) -> bool {
        self.clic.as_ref().is_some_and(|c| c.sel.id.is_some())
    }

    fn pending(&self) -> bool {
        self.pending_basic() != 0 || self.pending_clic()
    }

    fn pending_and_enabled(&self) -> bool {
        self.pend_enab.id.is_some() && !self.debug_mode && !self.net_value.deferint
    }

    /// Refresh pending and pending-and-enabled interrupt state.
    fn refresh_pending_and_enabled(&mut self) {
        self.pend_enab = PendEnab::default();

        if self.config.basic_present {
            self.refresh_basic();
        }
        if self.clic.is_some() {
            self.refresh_clic();
        }
    }

    /// Check for pending interrupts: refresh selection, wake the hart from
    /// WFI if anything is pending (even if masked).
    pub fn test_interrupt(&mut self) {
        self.refresh_pending_and_enabled();
        if self.pending() {
            self.restart(disable::WFI);
        }
        // A pending-and-enabled interrupt is taken at the next fetch
        // boundary, through the fetch gate.
    }

    /// Halt in WFI state unless something is already pending.
    pub fn wfi(&mut self) {
        if !(self.debug_mode || self.pending()) {
            self.halt(disable::WFI);
        }
    }

    //
    // Reset and NMI
    //

    /// Full hart reset: restart, exit Debug mode, switch to M-mode, reset
    /// CSR state, and resume at the reset vector.
    ///
    /// The cluster-level CLIC configuration is reset by the owning
    /// [`crate::Cluster`], which calls this per hart.
    pub fn reset(&mut self) {
        self.restart(disable::RESET | disable::WFI);

        if self.debug_mode {
            self.leave_debug();
        }

        self.set_mode(PrivilegeLevel::Machine);

        // Reset trap-relevant CSR state.
        self.status = Status::new();
        self.trap_csrs = PerMode::default();
        self.mintstatus = Mintstatus::default();
        self.intthresh = PerMode::default();
        self.dcsr = Dcsr::new();
        self.dpc = 0;
        self.mcountinhibit = Mcountinhibit::default();
        self.interrupts = Interrupts::new();
        self.swip = 0;
        self.update_pending();

        let hart_id = self.config.hart_id;
        for observer in &mut self.observers {
            observer.get_mut().reset(hart_id);
        }

        self.exception = None;
        self.pc = self.config.reset_address;

        // Enter Debug mode out of reset if requested.
        self.net_value.resethaltreq_s = self.net_value.resethaltreq;

        self.test_interrupt();
    }

    /// Take a non-maskable interrupt.
    pub(crate) fn nmi(&mut self) {
        self.restart(disable::WFI);
        self.set_mode(PrivilegeLevel::Machine);

        let cause = csr::Xcause::from_raw(self.config.ecode_nmi);
        *self
            .trap_csrs
            .get_mut(PrivilegeLevel::Machine)
            .cause_mut() = cause;
        let epc = self.epc();
        self.trap_csrs
            .get_mut(PrivilegeLevel::Machine)
            .write_epc(epc, u32::MAX);

        self.exception = None;
        self.pc = self.config.nmi_address;
    }

    //
    // Interrupt delivery pipeline
    //

    /// Fetch gate, called by the executor before fetching from `address`.
    /// This is the only place interrupts are taken.
    pub fn on_fetch<B: SystemBus>(&mut self, bus: &mut B, address: u32) -> FetchOutcome {
        // Fetch addresses are snapped to a 2-byte boundary irrespective of
        // whether compressed instructions are implemented.
        let address = address & !1;

        if self.net_value.resethaltreq_s {
            // Enter Debug mode out of reset.
            self.net_value.resethaltreq_s = false;
            self.enter_debug(csr::DebugCause::ResetHaltReq);
            FetchOutcome::Trap
        } else if self.net_value.haltreq && !self.debug_mode {
            self.enter_debug(csr::DebugCause::HaltReq);
            FetchOutcome::Trap
        } else if self.pending_and_enabled() {
            self.do_interrupt(bus);
            FetchOutcome::Trap
        } else if !self.validate_fetch_address(bus, address) {
            FetchOutcome::Trap
        } else {
            FetchOutcome::Fetch
        }
    }

    /// Take the highest-priority pending-and-enabled interrupt.
    fn do_interrupt<B: SystemBus>(&mut self, bus: &mut B) {
        let Some(id) = self.pend_enab.id.take() else {
            debug_assert!(false, "expected pending-and-enabled interrupt");
            return;
        };
        self.take_exception(bus, Trap::Interrupt(id), 0);
    }

    fn validate_fetch_half<B: SystemBus>(&mut self, bus: &mut B, address: u32) -> bool {
        if bus.is_executable(address) {
            true
        } else {
            // Bus error if the address is not executable. Translation
            // failures were already delivered by the MMU collaborator.
            self.take_exception(
                bus,
                Trap::Exception(exception::Exception::InstructionAccessFault),
                address,
            );
            false
        }
    }

    /// Validate that `address` is a mapped fetch address. Alignment is
    /// validated by the preceding branch instruction, not here. Both halves
    /// of a 4-byte instruction are validated.
    fn validate_fetch_address<B: SystemBus>(&mut self, bus: &mut B, address: u32) -> bool {
        if !self.validate_fetch_half(bus, address) {
            return false;
        }
        // Peek the first parcel to learn the instruction length.
        let mut parcel = [0u8; 2];
        if bus.read(&mut parcel, address).is_err() {
            return true;
        }
        let parcel = u16::from_le_bytes(parcel);
        if parcel & 0b11 != 0b11 {
            // Two-byte instruction.
            return true;
        }
        self.validate_fetch_half(bus, address.wrapping_add(2))
    }

    //
    // LR/SC reservation
    //

    /// Record an active LR reservation tag.
    pub fn set_reservation(&mut self, tag: u32) {
        self.exclusive_tag = Some(tag);
        self.outputs.lr_address = tag;
    }

    pub fn reservation(&self) -> Option<u32> {
        self.exclusive_tag
    }

    /// Clear any active exclusive access.
    pub(crate) fn clear_reservation(&mut self) {
        self.exclusive_tag = None;
    }

    /// Clear any active exclusive access on an xRET, if required.
    pub(crate) fn clear_reservation_xret(&mut self) {
        if !self.config.xret_preserves_lr {
            self.clear_reservation();
        }
    }

    //
    // Access-fault detail side channel
    //

    /// Latch the detail to attach to the next access fault.
    pub fn set_access_fault_detail(&mut self, detail: AccessFaultDetail) {
        self.af_error_in = detail;
    }

    /// Detail latched by the most recent trap entry.
    pub fn access_fault_detail(&self) -> AccessFaultDetail {
        self.af_error_out
    }

    //
    // Vector first-only-fault hook
    //

    /// Arm first-only-fault suppression for the current vector instruction.
    pub fn set_first_only_fault(&mut self) {
        self.v_first_fault = true;
    }

    /// vstart, as maintained by the external vector unit.
    pub fn set_vstart(&mut self, vstart: u32) {
        self.vstart = vstart;
    }

    pub fn vstart(&self) -> u32 {
        self.vstart
    }

    pub fn set_vl(&mut self, vl: u32) {
        self.vl = vl;
    }

    pub fn vl(&self) -> u32 {
        self.vl
    }

    //
    // Host integration
    //

    /// Take and clear a pending asynchronous host-interrupt request
    /// ([`DebugMode::Interrupt`]).
    pub fn take_host_interrupt_request(&mut self) -> bool {
        std::mem::replace(&mut self.host_interrupt_requested, false)
    }

    /// Ask observers to snap a read address; the first one that answers
    /// wins. Invoked by the memory subsystem before unusual-width reads.
    pub fn read_snap(&mut self, address: u32, bytes: u32) -> Option<u32> {
        self.observers
            .iter_mut()
            .find_map(|observer| observer.get_mut().read_snap(address, bytes))
    }

    /// Ask observers to snap a write address; the first one that answers
    /// wins.
    pub fn write_snap(&mut self, address: u32, bytes: u32) -> Option<u32> {
        self.observers
            .iter_mut()
            .find_map(|observer| observer.get_mut().write_snap(address, bytes))
    }

    //
    // Exception catalogue
    //

    /// All exceptions and interrupts implemented on this hart, in catalogue
    /// order: standard descriptors, observer-contributed descriptors, then
    /// local interrupts.
    pub fn exception_descriptors(&self) -> Vec<ExceptionInfo> {
        let mut all = Vec::new();

        for desc in exception::EXCEPTIONS {
            if self.has_exception(desc.trap) {
                all.push(ExceptionInfo {
                    name: desc.name.to_owned(),
                    description: desc.description.to_owned(),
                    code: desc.trap.code(),
                    interrupt: desc.trap.is_interrupt(),
                });
            }
        }

        for observer in &self.observers {
            for extra in observer.extra_exceptions() {
                all.push(ExceptionInfo::from(extra.clone()));
            }
        }

        for i in 0..self.config.local_int_num.min(48) {
            let code = LOCAL_INTERRUPT_BASE + i;
            if self.masks.interrupts & (1 << code) == 0 {
                continue;
            }
            all.push(ExceptionInfo {
                name: format!("LocalInterrupt{i}"),
                description: exception::describe(Trap::Interrupt(code)),
                code,
                interrupt: true,
            });
        }

        all
    }

    pub(crate) fn trace_selector(&mut self) {
        let state = self.int_state;
        trace!(
            "hart {}: PENDING+ENABLED={:#010x} PENDING={:#010x} \
             [EXTERNAL_IP={:#010x},SW_IP={:#010x}] MIDELEG={:#x} SIDELEG={:#x} \
             MSTATUS.[MSU]IE={}{}{}",
            self.config.hart_id,
            state.pending_enabled,
            state.pending,
            state.pending_external,
            state.pending_internal,
            state.mideleg,
            state.sideleg,
            state.mie as u8,
            state.sie as u8,
            state.uie as u8,
        );
    }
}

/// One entry of the enumerable exception catalogue.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExceptionInfo {
    pub name: String,
    pub description: String,
    pub code: u32,
    pub interrupt: bool,
}

impl From<ExtraException> for ExceptionInfo {
    fn from(extra: ExtraException) -> Self {
        Self {
            name: extra.name,
            description: extra.description,
            code: extra.code,
            interrupt: false,
        }
    }
}
