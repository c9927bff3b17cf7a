//! The CPU facade capability (C10/§9): the narrow set of CPU operations the
//! device needs, injected at construction so the device never owns or
//! cycles back into the CPU model itself.

/// Operations the device performs against the host CPU model.
///
/// Implemented by the host runtime's MIPS core facade; `avalanche` only ever
/// calls through this trait, never reaching into CPU internals, so the two
/// can be wired together without an ownership cycle.
pub trait CpuOps {
    /// Assert the single hardware interrupt line this peripheral complex
    /// drives (HW-IRQ0).
    fn raise_hw_irq0(&mut self);
    /// Deassert HW-IRQ0.
    fn clear_hw_irq0(&mut self);
    /// Set or clear CP0 Cause register bit `0x400`, the bit associated with
    /// this interrupt line.
    fn set_cause_bit(&mut self, set: bool);
    /// Request a whole-machine reset (C7, RESET CTRL offset 4).
    fn request_machine_reset(&mut self);
    /// Current program counter, used for diagnostic logging of guest
    /// programming errors.
    fn pc(&self) -> u64;
    /// Current return address, used for diagnostic logging.
    fn ra(&self) -> u64;
    /// 8-bit I/O port read, forwarded from the UART bridge (C9).
    fn port_in8(&mut self, port: u32) -> u8;
    /// 8-bit I/O port write, forwarded from the UART bridge (C9).
    fn port_out8(&mut self, port: u32, v: u8);
}
