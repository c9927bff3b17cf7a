//! Guest physical memory abstractions shared by the avalanche peripheral model.
//!
//! Two traits are exposed: [`GuestMemory`], a bounds-checked interface used by
//! concrete RAM backings such as [`DenseMemory`], and [`PhysMem`], the
//! unchecked read/write-by-physical-address capability that device code holds
//! as a handle and calls during DMA. Keeping them separate mirrors the split
//! between a RAM implementation's own safety story and the narrow interface
//! devices are allowed to see.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum GuestMemoryError {
    #[error("guest memory access out of bounds: addr=0x{addr:x} len={len} size=0x{size:x}")]
    OutOfBounds { addr: u64, len: usize, size: u64 },
}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Bounds-checked guest RAM.
pub trait GuestMemory {
    fn size(&self) -> u64;
    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;
    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()>;
}

/// The narrow physical-memory capability a device holds to perform DMA.
///
/// Unlike [`GuestMemory`] this does not return a `Result`: callers are
/// expected to only ever present addresses the host runtime has already
/// validated (e.g. guest-supplied descriptor pointers are opaque to the
/// device and are never used for anything but a `read`/`write` round trip).
/// An out-of-bounds access is a host-runtime bug, not a guest-triggerable
/// condition, so implementations may panic.
pub trait PhysMem {
    fn read(&mut self, addr: u64, buf: &mut [u8]);
    fn write(&mut self, addr: u64, buf: &[u8]);

    fn read_u32(&mut self, addr: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn write_u32(&mut self, addr: u64, v: u32) {
        self.write(addr, &v.to_le_bytes());
    }

    fn read_u16(&mut self, addr: u64) -> u16 {
        let mut buf = [0u8; 2];
        self.read(addr, &mut buf);
        u16::from_le_bytes(buf)
    }

    fn write_u16(&mut self, addr: u64, v: u16) {
        self.write(addr, &v.to_le_bytes());
    }

    fn read_u8(&mut self, addr: u64) -> u8 {
        let mut buf = [0u8; 1];
        self.read(addr, &mut buf);
        buf[0]
    }

    fn write_u8(&mut self, addr: u64, v: u8) {
        self.write(addr, &[v]);
    }
}

/// A flat, heap-backed guest RAM implementation.
pub struct DenseMemory {
    bytes: Vec<u8>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        let size: usize = size
            .try_into()
            .map_err(|_| GuestMemoryError::OutOfBounds { addr: 0, len: 0, size })?;
        Ok(Self { bytes: vec![0u8; size] })
    }

    fn bounds_check(&self, addr: u64, len: usize) -> GuestMemoryResult<usize> {
        let start: usize = addr
            .try_into()
            .map_err(|_| GuestMemoryError::OutOfBounds { addr, len, size: self.size() })?;
        let end = start
            .checked_add(len)
            .ok_or(GuestMemoryError::OutOfBounds { addr, len, size: self.size() })?;
        if end > self.bytes.len() {
            return Err(GuestMemoryError::OutOfBounds { addr, len, size: self.size() });
        }
        Ok(start)
    }
}

impl GuestMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let start = self.bounds_check(paddr, dst.len())?;
        dst.copy_from_slice(&self.bytes[start..start + dst.len()]);
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let start = self.bounds_check(paddr, src.len())?;
        self.bytes[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl PhysMem for DenseMemory {
    fn read(&mut self, addr: u64, buf: &mut [u8]) {
        self.read_into(addr, buf)
            .unwrap_or_else(|e| panic!("DenseMemory::read: {e}"));
    }

    fn write(&mut self, addr: u64, buf: &[u8]) {
        self.write_from(addr, buf)
            .unwrap_or_else(|e| panic!("DenseMemory::write: {e}"));
    }
}
