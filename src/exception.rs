//! Catalogue of architectural exceptions and interrupts.

use crate::{isa, PrivilegeLevel};

/// Cause code of the first local interrupt. Codes `16..` index local
/// interrupt inputs.
pub const LOCAL_INTERRUPT_BASE: u32 = 16;

/// Synchronous exceptions, by cause code.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not aligned to a fetchable boundary.
    InstructionAddressMisaligned,
    InstructionAccessFault,
    /// Undecoded, unimplemented or disabled instruction.
    IllegalInstruction,
    /// EBREAK instruction executed (and not routed to Debug mode).
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreAmoAddressMisaligned,
    StoreAmoAccessFault,
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    InstructionPageFault,
    LoadPageFault,
    StoreAmoPageFault,
}

impl Exception {
    /// Returns the exception code (cause) for this exception.
    pub fn code(self) -> u32 {
        match self {
            Self::InstructionAddressMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreAmoAddressMisaligned => 6,
            Self::StoreAmoAccessFault => 7,
            Self::EnvironmentCallFromUMode => 8,
            Self::EnvironmentCallFromSMode => 9,
            Self::EnvironmentCallFromMMode => 11,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StoreAmoPageFault => 15,
        }
    }

    /// The ECALL exception for the given originating privilege level.
    pub fn environment_call(mode: PrivilegeLevel) -> Self {
        match mode {
            PrivilegeLevel::User => Self::EnvironmentCallFromUMode,
            PrivilegeLevel::Supervisor => Self::EnvironmentCallFromSMode,
            PrivilegeLevel::Machine => Self::EnvironmentCallFromMMode,
        }
    }

    /// Whether this code is one of the three access faults, which carry the
    /// device-vs-plain detail side channel.
    pub fn is_access_fault(self) -> bool {
        matches!(
            self,
            Self::InstructionAccessFault | Self::LoadAccessFault | Self::StoreAmoAccessFault
        )
    }
}

/// Standard interrupts, by cause code. Local interrupts (codes
/// [`LOCAL_INTERRUPT_BASE`]`..`) are referred to by raw code.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Interrupt {
    UserSoftware,
    SupervisorSoftware,
    MachineSoftware,
    UserTimer,
    SupervisorTimer,
    MachineTimer,
    UserExternal,
    SupervisorExternal,
    MachineExternal,
    /// CLIC software interrupt.
    Csip,
}

impl Interrupt {
    /// Returns the exception code (cause) for this interrupt.
    pub fn code(self) -> u32 {
        match self {
            Self::UserSoftware => 0,
            Self::SupervisorSoftware => 1,
            Self::MachineSoftware => 3,
            Self::UserTimer => 4,
            Self::SupervisorTimer => 5,
            Self::MachineTimer => 7,
            Self::UserExternal => 8,
            Self::SupervisorExternal => 9,
            Self::MachineExternal => 11,
            Self::Csip => 12,
        }
    }
}

/// A trap cause: either a synchronous exception or an interrupt identified
/// by its cause code (standard or local).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Trap {
    Exception(Exception),
    Interrupt(u32),
}

impl Trap {
    pub fn is_interrupt(self) -> bool {
        matches!(self, Self::Interrupt(_))
    }

    /// The cause code, without the `Interrupt` bit.
    pub fn code(self) -> u32 {
        match self {
            Self::Exception(e) => e.code(),
            Self::Interrupt(code) => code,
        }
    }
}

/// Descriptor of a standard exception or interrupt, with the architecture
/// extensions it requires.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionDesc {
    pub name: &'static str,
    pub trap: Trap,
    /// Extension bits ([`crate::isa`]) that must all be present for the
    /// hart to implement this exception. Zero means always implemented.
    pub arch: u32,
    pub description: &'static str,
}

/// Table of standard exception and interrupt descriptors, in cause-code
/// order per class.
pub const EXCEPTIONS: &[ExceptionDesc] = &[
    //
    // Exceptions
    //
    ExceptionDesc {
        name: "InstructionAddressMisaligned",
        trap: Trap::Exception(Exception::InstructionAddressMisaligned),
        arch: 0,
        description: "Fetch from unaligned address",
    },
    ExceptionDesc {
        name: "InstructionAccessFault",
        trap: Trap::Exception(Exception::InstructionAccessFault),
        arch: 0,
        description: "No access permission for fetch",
    },
    ExceptionDesc {
        name: "IllegalInstruction",
        trap: Trap::Exception(Exception::IllegalInstruction),
        arch: 0,
        description: "Undecoded, unimplemented or disabled instruction",
    },
    ExceptionDesc {
        name: "Breakpoint",
        trap: Trap::Exception(Exception::Breakpoint),
        arch: 0,
        description: "EBREAK instruction executed",
    },
    ExceptionDesc {
        name: "LoadAddressMisaligned",
        trap: Trap::Exception(Exception::LoadAddressMisaligned),
        arch: 0,
        description: "Load from unaligned address",
    },
    ExceptionDesc {
        name: "LoadAccessFault",
        trap: Trap::Exception(Exception::LoadAccessFault),
        arch: 0,
        description: "No access permission for load",
    },
    ExceptionDesc {
        name: "StoreAMOAddressMisaligned",
        trap: Trap::Exception(Exception::StoreAmoAddressMisaligned),
        arch: 0,
        description: "Store/atomic memory operation at unaligned address",
    },
    ExceptionDesc {
        name: "StoreAMOAccessFault",
        trap: Trap::Exception(Exception::StoreAmoAccessFault),
        arch: 0,
        description: "No access permission for store/atomic memory operation",
    },
    ExceptionDesc {
        name: "EnvironmentCallFromUMode",
        trap: Trap::Exception(Exception::EnvironmentCallFromUMode),
        arch: isa::U,
        description: "ECALL instruction executed in User mode",
    },
    ExceptionDesc {
        name: "EnvironmentCallFromSMode",
        trap: Trap::Exception(Exception::EnvironmentCallFromSMode),
        arch: isa::S,
        description: "ECALL instruction executed in Supervisor mode",
    },
    ExceptionDesc {
        name: "EnvironmentCallFromMMode",
        trap: Trap::Exception(Exception::EnvironmentCallFromMMode),
        arch: 0,
        description: "ECALL instruction executed in Machine mode",
    },
    ExceptionDesc {
        name: "InstructionPageFault",
        trap: Trap::Exception(Exception::InstructionPageFault),
        arch: 0,
        description: "Page fault at fetch address",
    },
    ExceptionDesc {
        name: "LoadPageFault",
        trap: Trap::Exception(Exception::LoadPageFault),
        arch: 0,
        description: "Page fault at load address",
    },
    ExceptionDesc {
        name: "StoreAMOPageFault",
        trap: Trap::Exception(Exception::StoreAmoPageFault),
        arch: 0,
        description: "Page fault at store/atomic memory operation address",
    },
    //
    // Standard interrupts
    //
    ExceptionDesc {
        name: "USWInterrupt",
        trap: Trap::Interrupt(0),
        arch: isa::N,
        description: "User software interrupt",
    },
    ExceptionDesc {
        name: "SSWInterrupt",
        trap: Trap::Interrupt(1),
        arch: isa::S,
        description: "Supervisor software interrupt",
    },
    ExceptionDesc {
        name: "MSWInterrupt",
        trap: Trap::Interrupt(3),
        arch: 0,
        description: "Machine software interrupt",
    },
    ExceptionDesc {
        name: "UTimerInterrupt",
        trap: Trap::Interrupt(4),
        arch: isa::N,
        description: "User timer interrupt",
    },
    ExceptionDesc {
        name: "STimerInterrupt",
        trap: Trap::Interrupt(5),
        arch: isa::S,
        description: "Supervisor timer interrupt",
    },
    ExceptionDesc {
        name: "MTimerInterrupt",
        trap: Trap::Interrupt(7),
        arch: 0,
        description: "Machine timer interrupt",
    },
    ExceptionDesc {
        name: "UExternalInterrupt",
        trap: Trap::Interrupt(8),
        arch: isa::N,
        description: "User external interrupt",
    },
    ExceptionDesc {
        name: "SExternalInterrupt",
        trap: Trap::Interrupt(9),
        arch: isa::S,
        description: "Supervisor external interrupt",
    },
    ExceptionDesc {
        name: "MExternalInterrupt",
        trap: Trap::Interrupt(11),
        arch: 0,
        description: "Machine external interrupt",
    },
    //
    // CLIC interrupts
    //
    ExceptionDesc {
        name: "CSIP",
        trap: Trap::Interrupt(12),
        arch: 0,
        description: "CLIC software interrupt",
    },
];

/// Human-readable description for a trap, synthesizing local-interrupt
/// names on the fly.
pub fn describe(trap: Trap) -> String {
    if let Trap::Interrupt(code) = trap {
        if code >= LOCAL_INTERRUPT_BASE {
            return format!("Local interrupt {}", code - LOCAL_INTERRUPT_BASE);
        }
    }
    EXCEPTIONS
        .iter()
        .find(|desc| desc.trap == trap)
        .map(|desc| desc.description.to_owned())
        .unwrap_or_else(|| format!("Unknown trap {trap:?}"))
}

/// Masks of implemented synchronous exceptions and interrupts, each indexed
/// by cause code.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ImplementedMasks {
    pub exceptions: u64,
    pub interrupts: u64,
}

/// Mask of implemented local interrupts, positioned at their cause codes.
pub fn local_interrupt_mask(local_int_num: u32) -> u64 {
    let shift = local_int_num.min(48);
    ((1u64 << shift) - 1) << LOCAL_INTERRUPT_BASE
}

/// Compose the implemented-exception and implemented-interrupt masks for an
/// architecture. `unimp_int_mask` removes interrupts that are explicitly
/// absent on a variant. CSIP is never part of the interrupt mask; its
/// presence tracks CLIC presence instead.
pub fn implemented_masks(arch: u32, local_int_num: u32, unimp_int_mask: u64) -> ImplementedMasks {
    let mut exceptions = 0u64;
    let mut interrupts = 0u64;

    for desc in EXCEPTIONS {
        if desc.arch & arch != desc.arch {
            continue;
        }
        match desc.trap {
            Trap::Interrupt(12) => {} // CSIP
            Trap::Exception(e) => exceptions |= 1 << e.code(),
            Trap::Interrupt(code) => interrupts |= 1 << code,
        }
    }

    interrupts |= local_interrupt_mask(local_int_num);
    interrupts &= !unimp_int_mask;

    ImplementedMasks {
        exceptions,
        interrupts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_call_codes() {
        assert_eq!(8, Exception::environment_call(PrivilegeLevel::User).code());
        assert_eq!(
            9,
            Exception::environment_call(PrivilegeLevel::Supervisor).code()
        );
        assert_eq!(
            11,
            Exception::environment_call(PrivilegeLevel::Machine).code()
        );
    }

    #[test]
    fn test_masks_follow_architecture() {
        // M-only hart: no S/U ecalls, no S/U interrupts.
        let m_only = implemented_masks(0, 0, 0);
        assert_eq!(0, m_only.exceptions & (1 << 8));
        assert_eq!(0, m_only.exceptions & (1 << 9));
        assert_ne!(0, m_only.exceptions & (1 << 11));
        assert_eq!(0, m_only.interrupts & (1 << 1));
        assert_ne!(0, m_only.interrupts & (1 << 3));

        // M/S/U hart with N: everything standard present.
        let full = implemented_masks(isa::S | isa::U | isa::N, 0, 0);
        for code in [0u32, 1, 3, 4, 5, 7, 8, 9, 11] {
            assert_ne!(0, full.interrupts & (1 << code), "interrupt {code}");
        }
    }

    #[test]
    fn test_local_interrupts_in_mask() {
        let masks = implemented_masks(0, 4, 0);
        for code in 16..20 {
            assert_ne!(0, masks.interrupts & (1 << code));
        }
        assert_eq!(0, masks.interrupts & (1 << 20));

        // Explicitly absent interrupts are removed.
        let masks = implemented_masks(0, 4, 1 << 17);
        assert_eq!(0, masks.interrupts & (1 << 17));
        assert_ne!(0, masks.interrupts & (1 << 16));
    }

    #[test]
    fn test_describe_local_interrupt() {
        assert_eq!("Local interrupt 5", describe(Trap::Interrupt(21)));
        assert_eq!(
            "Machine timer interrupt",
            describe(Trap::Interrupt(Interrupt::MachineTimer.code()))
        );
    }
}
