//! Debug-mode controller.
//!
//! Debug mode is entered on halt request, single-step, `EBREAK` (when
//! routed by `dcsr`), or reset-halt-request, and left through `DRET`. The
//! configured [`DebugMode`](super::DebugMode) reaction decides what entry
//! does to the hart: stall it, request a host interrupt, or jump to a
//! debug vector.

use log::warn;

use super::{disable, DebugMode, Hart};
use crate::bus::SystemBus;
use crate::exception::{Exception, Trap};
use crate::hart::csr::DebugCause;
use crate::PrivilegeLevel;

impl Hart {
    fn set_dm(&mut self, dm: bool) {
        self.debug_mode = dm;
        // Indicate the new Debug mode on the DM output net.
        self.outputs.dm = dm;
    }

    fn update_dm_stall(&mut self, stall: bool) {
        // Halt or restart the hart only when Debug mode is configured to
        // stall it.
        if self.config().debug_mode == DebugMode::Halt {
            if stall {
                self.halt(disable::DEBUG);
            } else {
                self.restart(disable::DEBUG);
            }
        }
    }

    /// Enter Debug mode. Entry while already in Debug mode only replays
    /// the configured reaction (with the debug-exception vector instead of
    /// the entry vector).
    pub(crate) fn enter_debug(&mut self, cause: DebugCause) {
        let was_dm = self.debug_mode;

        if !was_dm {
            self.set_dm(true);

            // Save mode, cause and the interrupted instruction address.
            self.dcsr.set_prv(self.current_mode());
            self.dcsr.set_cause(cause);
            self.dpc = self.pc();

            self.set_mode(PrivilegeLevel::Machine);
        }

        match self.config().debug_mode {
            DebugMode::Interrupt => {
                self.host_interrupt_requested = true;
            }
            DebugMode::Vector => {
                self.pc = if was_dm {
                    self.config().dexc_address
                } else {
                    self.config().debug_address
                };
            }
            _ => {
                self.update_dm_stall(true);
            }
        }
    }

    /// Leave Debug mode, returning to the mode and address saved in
    /// dcsr.prv/dpc.
    pub(crate) fn leave_debug(&mut self) {
        let new_mode = self.dcsr.prv();
        let new_mode = if self.has_mode(new_mode) {
            new_mode
        } else {
            self.min_mode()
        };

        self.set_dm(false);

        self.clear_mprv_on_return(new_mode);

        let dpc = self.dpc;
        self.eret_common(PrivilegeLevel::Machine, new_mode, dpc);

        self.update_dm_stall(false);
    }

    /// Enter or leave Debug mode under external (debug-module) control.
    pub fn set_debug_mode(&mut self, dm: bool) {
        if dm == self.debug_mode {
            return;
        }
        if dm {
            self.enter_debug(DebugCause::HaltReq);
        } else {
            self.leave_debug();
        }
    }

    /// Return from Debug mode. Outside Debug mode DRET is an Illegal
    /// Instruction.
    pub fn dret<B: SystemBus>(&mut self, bus: &mut B) {
        if !self.debug_mode {
            warn!(
                "hart {}: illegal instruction - not debug mode",
                self.config().hart_id
            );
            self.illegal_instruction(bus);
        } else {
            self.leave_debug();
        }
    }

    /// Execute EBREAK: enter Debug mode when dcsr routes it there for the
    /// current mode, otherwise deliver a Breakpoint trap.
    pub fn ebreak<B: SystemBus>(&mut self, bus: &mut B) {
        let mode = self.current_mode();
        let use_dm = self.debug_mode || self.dcsr.ebreak(mode);

        if use_dm {
            // The ebreak instruction itself counts as retired unless
            // dcsr.stopcount inhibits it (the normal retirement path is
            // bypassed here).
            if !self.dcsr.stopcount() {
                if !self.inhibit_instret() {
                    self.minstret = self.minstret.wrapping_add(1);
                }
                if !self.inhibit_cycle() {
                    self.mcycle = self.mcycle.wrapping_add(1);
                }
            }
            self.enter_debug(DebugCause::Ebreak);
        } else {
            // From privileged version 1.12, EBREAK no longer sets mtval to
            // the PC.
            let tval = if self.config().priv_version < crate::PrivilegeVersion::V1_12 {
                self.pc()
            } else {
                0
            };
            self.take_exception(bus, Trap::Exception(Exception::Breakpoint), tval);
        }
    }

    //
    // Single-step
    //

    /// Arm the one-shot step timer, if stepping is enabled. Called when
    /// resuming from Debug mode.
    pub fn set_step_breakpoint(&mut self) {
        if !self.debug_mode && self.dcsr.step() {
            self.step_countdown = Some(1);
        }
    }

    /// One-shot step-timer expiry, driven from instruction retirement.
    pub(crate) fn step_timer_tick(&mut self) {
        let Some(remaining) = self.step_countdown else {
            return;
        };
        if remaining > 1 {
            self.step_countdown = Some(remaining - 1);
            return;
        }
        self.step_countdown = None;
        if !self.debug_mode && self.dcsr.step() {
            self.enter_debug(DebugCause::Step);
        }
    }
}
