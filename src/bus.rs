//! Byte-granular interface to the hart's data domain.

use std::fmt::Debug;
use thiserror::Error;

/// Master-side view of the memory system the hart is attached to.
///
/// Accesses can be made for any `(address, size)` pair; addresses are 32
/// bits wide and always correspond to bytes. Values are transferred in
/// memory order — callers that need a particular endianness assemble the
/// bytes themselves (see [`crate::hart::Hart::data_endianness`]).
///
/// The trap core uses this interface for exactly two things: fetching CLIC
/// vector-table entries during hardware-vectored dispatch, and probing
/// executability of fetch addresses. Everything else (instruction fetch,
/// loads/stores, translation) happens in the external executor.
///
/// A failed access returns an [`AccessError`] rather than raising a trap
/// itself; the caller decides which architectural exception to deliver.
pub trait SystemBus: Debug {
    /// Read `buf.len()` bytes starting at `address` into `buf`.
    fn read(&mut self, buf: &mut [u8], address: u32) -> Result<(), AccessError>;

    /// Write `buf.len()` bytes starting at `address` from `buf`.
    fn write(&mut self, address: u32, buf: &[u8]) -> Result<(), AccessError>;

    /// Whether the 2-byte parcel at `address` may be fetched as instruction
    /// text.
    fn is_executable(&self, address: u32) -> bool;
}

/// Failure of a bus access.
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum AccessError {
    /// The address range is unmapped or the device rejected the access.
    #[error("access fault")]
    Fault,
}
