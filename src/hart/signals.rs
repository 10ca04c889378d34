//! External signal layer: latched input nets, edge detection, output
//! latches and the net-port catalogue.
//!
//! The host invokes the `set_*` entry points synchronously between
//! instructions; they mutate latched signal state and the pending bitmaps.
//! Anything that becomes deliverable is taken at the next fetch boundary
//! by the fetch gate.

use serde::{Deserialize, Serialize};

use super::{disable, Hart};
use crate::exception::{self, Trap};
use crate::isa;
use crate::snapshot::{HartSnapshot, RestoreError};
use crate::PrivilegeLevel;

/// Latched input-signal levels.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct NetValue {
    pub reset: bool,
    pub nmi: bool,
    pub haltreq: bool,
    pub resethaltreq: bool,
    /// resethaltreq as sampled at the last reset; consumed by the fetch
    /// gate to enter Debug mode out of reset.
    pub resethaltreq_s: bool,
    pub deferint: bool,
}

/// Latest values written to the hart's output nets.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct OutputNets {
    /// Echoes Debug mode.
    pub dm: bool,
    pub lr_address: u32,
    pub sc_address: u32,
    pub amo_active: u32,
}

/// Direction of a net port, from the hart's point of view.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Descriptor of one net port.
#[derive(Debug, Clone)]
pub struct NetPortDesc {
    pub name: String,
    pub direction: PortDirection,
    pub description: String,
}

fn posedge(old: bool, new: bool) -> bool {
    !old && new
}

fn negedge(old: bool, new: bool) -> bool {
    old && !new
}

impl Hart {
    /// Latched input-signal levels.
    pub fn net_value(&self) -> NetValue {
        self.net_value
    }

    /// Latest output-net values.
    pub fn outputs(&self) -> OutputNets {
        self.outputs
    }

    /// Reset input. The hart halts while the signal is high and performs a
    /// full reset on the falling edge. Returns whether a reset was
    /// performed, so the cluster can reset shared CLIC configuration.
    pub fn set_reset(&mut self, value: bool) -> bool {
        let old = self.net_value.reset;
        self.net_value.reset = value;

        if posedge(old, value) {
            self.halt(disable::RESET);
            false
        } else if negedge(old, value) {
            self.reset();
            true
        } else {
            false
        }
    }

    /// NMI input: rising edge triggers the NMI unless in Debug mode; the
    /// live value is mirrored in dcsr.nmip.
    pub fn set_nmi(&mut self, value: bool) {
        let old = self.net_value.nmi;

        if !self.debug_mode && posedge(old, value) {
            self.nmi();
        }

        self.dcsr_mut().set_nmip(value);
        self.net_value.nmi = value;
    }

    /// Debug halt request (edge-triggered, honored at the next fetch
    /// boundary).
    pub fn set_haltreq(&mut self, value: bool) {
        let old = self.net_value.haltreq;

        if !self.debug_mode && posedge(old, value) {
            // Make sure a WFI-halted hart reaches its next fetch boundary.
            self.restart(disable::WFI);
        }

        self.net_value.haltreq = value;
    }

    /// Debug halt request sampled at reset.
    pub fn set_resethaltreq(&mut self, value: bool) {
        self.net_value.resethaltreq = value;
    }

    /// SC_valid input: deassertion clears the exclusive reservation.
    pub fn set_sc_valid(&mut self, value: bool) {
        if !value {
            self.clear_reservation();
        }
    }

    /// Artifact input deferring interrupt delivery while high.
    pub fn set_deferint(&mut self, value: bool) {
        self.net_value.deferint = value;
        // On release any pending-and-enabled interrupt is taken at the
        // next fetch boundary; nothing further to do here.
    }

    /// Generic per-interrupt input for the given cause code.
    pub fn set_interrupt(&mut self, index: u32, value: bool) {
        let max_num = self.int_num();
        debug_assert!(index < max_num, "interrupt port index {index} exceeds maximum");
        if index >= max_num {
            return;
        }

        let word = (index / 64) as usize;
        let mask = 1u64 << (index % 64);
        if value {
            self.ip[word] |= mask;
        } else {
            self.ip[word] &= !mask;
        }

        if self.clic.is_some() {
            self.update_clic_input(index as usize, value);
        }
        if self.config().basic_present {
            self.update_pending();
        }
    }

    /// External-interrupt ID input for the given target mode; a nonzero
    /// value replaces the reported external-interrupt cause code.
    pub fn set_external_interrupt_id(&mut self, mode: PrivilegeLevel, value: u32) {
        if !self.config().external_int_id {
            return;
        }
        self.ext_int[mode as usize] = value;
    }

    /// Broadcast the effective address of an LR instruction.
    pub fn set_lr_address_output(&mut self, address: u32) {
        self.outputs.lr_address = address;
    }

    /// Broadcast the effective address of an SC instruction.
    pub fn set_sc_address_output(&mut self, address: u32) {
        self.outputs.sc_address = address;
    }

    /// Broadcast the code of an active AMO.
    pub fn set_amo_active_output(&mut self, code: u32) {
        self.outputs.amo_active = code;
    }

    /// Enumerate this hart's net ports, in creation order.
    pub fn net_ports(&self) -> Vec<NetPortDesc> {
        let mut ports = Vec::new();
        let input = |name: &str, desc: &str| NetPortDesc {
            name: name.to_owned(),
            direction: PortDirection::Input,
            description: desc.to_owned(),
        };
        let output = |name: &str, desc: &str| NetPortDesc {
            name: name.to_owned(),
            direction: PortDirection::Output,
            description: desc.to_owned(),
        };

        ports.push(input("reset", "Reset"));
        ports.push(input("nmi", "NMI"));

        // Implemented standard interrupts, plus the interrupt-ID inputs
        // for external interrupts when configured.
        for desc in exception::EXCEPTIONS {
            let Trap::Interrupt(code) = desc.trap else {
                continue;
            };
            if !self.has_exception(desc.trap) {
                continue;
            }
            ports.push(input(desc.name, desc.description));

            if self.config().external_int_id && (8..=11).contains(&code) {
                let name = match code {
                    8 => "UExternalInterruptID",
                    9 => "SExternalInterruptID",
                    _ => "MExternalInterruptID",
                };
                ports.push(input(name, "External Interrupt ID"));
            }
        }

        for i in 0..self.config().local_int_num.min(48) {
            ports.push(input(
                &format!("LocalInterrupt{i}"),
                &format!("Local Interrupt {i}"),
            ));
        }

        if self.config().debug_mode != super::DebugMode::Disabled {
            ports.push(output("DM", "Debug state indication"));
            ports.push(input("haltreq", "haltreq (Debug halt request)"));
            ports.push(input(
                "resethaltreq",
                "resethaltreq (Debug halt request after reset)",
            ));
        }

        if self.config().arch & isa::A != 0 {
            ports.push(output(
                "LR_address",
                "Port written with effective address for LR instruction",
            ));
            ports.push(output(
                "SC_address",
                "Port written with effective address for SC instruction",
            ));
            ports.push(input("SC_valid", "SC_address valid input signal"));
            ports.push(output(
                "AMO_active",
                "Port written with code indicating active AMO",
            ));
        }

        ports.push(input(
            "deferint",
            "Artifact signal causing interrupts to be held off when high",
        ));

        ports
    }

    //
    // Save/restore
    //

    /// Serialize the volatile interrupt state not covered by the CSR
    /// read/write surface.
    pub(crate) fn save_state(&self) -> HartSnapshot {
        HartSnapshot {
            ip: self.ip.clone(),
            net_value: self.net_value,
            int_state: self.int_state,
            clic_int_state: self
                .clic
                .as_ref()
                .map(|c| c.int_state.iter().map(|st| st.packed()).collect())
                .unwrap_or_default(),
        }
    }

    /// Restore volatile interrupt state, rebuilding the CLIC summary
    /// bitmap and re-running selection.
    pub(crate) fn restore_state(&mut self, snapshot: &HartSnapshot) -> Result<(), RestoreError> {
        if snapshot.ip.len() != self.ip.len() {
            return Err(RestoreError::StateLength);
        }
        self.ip.copy_from_slice(&snapshot.ip);
        self.net_value = snapshot.net_value;
        self.int_state = snapshot.int_state;

        if let Some(clic) = self.clic.as_mut() {
            if snapshot.clic_int_state.len() != clic.int_state.len() {
                return Err(RestoreError::StateLength);
            }
            for (st, &packed) in clic.int_state.iter_mut().zip(&snapshot.clic_int_state) {
                *st = super::clic::ClicIntState::from_packed(packed);
            }
            clic.rebuild_ipe();
        }

        // Recompose mip from the restored external pending bits.
        let mip = self.ip[0] | self.swip;
        self.interrupts.set_mip(mip);

        self.test_interrupt();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::{Config, DebugMode, FetchOutcome, Hart};
    use crate::testing::TestBus;

    #[test]
    fn test_reset_signal_edges() {
        let mut hart = Hart::new(Config::default());
        hart.set_pc(0x9999);

        assert!(!hart.set_reset(true));
        assert!(hart.is_halted());
        // Level held: no further transitions.
        assert!(!hart.set_reset(true));
        assert!(hart.is_halted());

        assert!(hart.set_reset(false));
        assert!(!hart.is_halted());
        assert_eq!(hart.config().reset_address, hart.pc());
    }

    #[test]
    fn test_resethaltreq_sampled_at_reset() {
        let mut bus = TestBus::new(0x1000);
        let mut hart = Hart::new(Config {
            debug_mode: DebugMode::Halt,
            ..Config::default()
        });
        hart.set_resethaltreq(true);
        hart.set_reset(true);
        hart.set_reset(false);

        // First fetch out of reset enters Debug mode.
        assert_eq!(FetchOutcome::Trap, hart.on_fetch(&mut bus, hart.pc()));
        assert!(hart.in_debug_mode());
        assert_eq!(5, (hart.read_dcsr() >> 6) & 0b111); // resethaltreq cause
    }

    #[test]
    fn test_nmi_rising_edge() {
        let mut hart = Hart::new(Config {
            ecode_nmi: 0x10,
            debug_mode: DebugMode::Halt,
            ..Config::default()
        });
        hart.set_mode(PrivilegeLevel::User);
        hart.set_pc(0x600);

        hart.set_nmi(true);
        assert_eq!(PrivilegeLevel::Machine, hart.current_mode());
        assert_eq!(0x10, hart.trap_csrs(PrivilegeLevel::Machine).read_cause());
        assert_eq!(0x600, hart.trap_csrs(PrivilegeLevel::Machine).read_epc());
        assert_eq!(hart.config().nmi_address, hart.pc());
        assert_ne!(0, hart.read_dcsr() & (1 << 3)); // nmip mirror

        // Level held: no re-trigger; falling edge clears the mirror.
        hart.set_pc(0x700);
        hart.set_nmi(true);
        assert_eq!(0x600, hart.trap_csrs(PrivilegeLevel::Machine).read_epc());
        hart.set_nmi(false);
        assert_eq!(0, hart.read_dcsr() & (1 << 3));
    }

    #[test]
    fn test_haltreq_taken_at_fetch_boundary() {
        let mut bus = TestBus::new(0x1000);
        let mut hart = Hart::new(Config {
            debug_mode: DebugMode::Halt,
            ..Config::default()
        });
        hart.set_haltreq(true);
        assert!(!hart.in_debug_mode());
        assert_eq!(FetchOutcome::Trap, hart.on_fetch(&mut bus, 0x0));
        assert!(hart.in_debug_mode());
        assert_eq!(3, (hart.read_dcsr() >> 6) & 0b111); // haltreq cause
    }

    #[test]
    fn test_sc_valid_clears_reservation() {
        let mut hart = Hart::new(Config::default());
        hart.set_reservation(0x8000);
        hart.set_sc_valid(true);
        assert_eq!(Some(0x8000), hart.reservation());
        hart.set_sc_valid(false);
        assert_eq!(None, hart.reservation());
    }

    #[test]
    fn test_deferint_holds_off_delivery() {
        let mut bus = TestBus::new(0x1000);
        let mut hart = Hart::new(Config::default());
        hart.status_mut().set_ie(PrivilegeLevel::Machine, true);
        hart.write_mie(1 << 7, u32::MAX);
        hart.set_deferint(true);
        hart.set_interrupt(7, true);

        assert_eq!(FetchOutcome::Fetch, hart.on_fetch(&mut bus, 0x0));

        hart.set_deferint(false);
        assert_eq!(FetchOutcome::Trap, hart.on_fetch(&mut bus, 0x0));
        assert_eq!(
            Some(crate::exception::Trap::Interrupt(7)),
            hart.exception()
        );
    }

    #[test]
    fn test_out_of_range_interrupt_ignored() {
        let mut hart = Hart::new(Config::default());
        let num = hart.int_num();
        // Release-mode behavior: silently ignored.
        if cfg!(not(debug_assertions)) {
            hart.set_interrupt(num, true);
            assert_eq!(0, hart.read_mip());
        }
    }

    #[test]
    fn test_port_catalogue_follows_config() {
        let hart = Hart::new(Config {
            local_int_num: 2,
            external_int_id: true,
            debug_mode: DebugMode::Halt,
            ..Config::default()
        });
        let ports = hart.net_ports();
        let names: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();

        assert_eq!("reset", names[0]);
        assert_eq!("nmi", names[1]);
        assert!(names.contains(&"MExternalInterrupt"));
        assert!(names.contains(&"MExternalInterruptID"));
        assert!(names.contains(&"LocalInterrupt1"));
        assert!(names.contains(&"DM"));
        assert!(names.contains(&"haltreq"));
        assert!(names.contains(&"LR_address"));
        assert_eq!("deferint", names[names.len() - 1]);

        // Without Debug mode or the A extension the related ports vanish.
        let hart = Hart::new(Config {
            arch: isa::S | isa::U,
            ..Config::default()
        });
        let ports = hart.net_ports();
        assert!(!ports.iter().any(|p| p.name == "DM"));
        assert!(!ports.iter().any(|p| p.name == "SC_valid"));
    }

    #[test]
    fn test_dm_output_net() {
        let mut hart = Hart::new(Config {
            debug_mode: DebugMode::Halt,
            ..Config::default()
        });
        assert!(!hart.outputs().dm);
        hart.set_debug_mode(true);
        assert!(hart.outputs().dm);
        hart.set_debug_mode(false);
        assert!(!hart.outputs().dm);
    }
}
