//! Device model for the TI AR7 SoC's on-chip peripheral complex
//! ("avalanche"): the MMIO dispatch fabric plus CPMAC, INTC, MDIO/PHY,
//! watchdog, VLYNQ, and reset-controller peripherals.

pub mod addresses;
pub mod cpmac;
pub mod cpu;
pub mod device;
pub mod intc;
pub mod irq_line;
pub mod mdio;
pub mod net;
pub mod regbank;
pub mod reset;
pub mod uart;
pub mod vlynq;
pub mod watchdog;

pub use cpu::CpuOps;
pub use device::Device;
pub use net::{NetOps, NicSlot};
pub use regbank::RegBank;
