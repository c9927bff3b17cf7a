//! The network-backend capability (C8/§9): a small handle each CPMAC
//! instance holds to hand off transmitted frames, decoupling the device from
//! the concrete network backend's ownership.

/// Operations the device performs against an attached virtual NIC backend.
pub trait NetOps {
    /// Hand a fully-assembled frame (post TX descriptor-chain DMA) to the
    /// backend for transmission.
    fn send(&mut self, frame: &[u8]);
}

/// One CPMAC instance's attached network identity: its programmed MAC
/// address and, if bound, the backend handle used to transmit frames.
///
/// Matches spec.md's `nic[i]`: "each an array of 6 bytes (MAC address) + an
/// opaque network-backend handle". The MAC address starts zeroed and is
/// programmed by a MACADDRHI write (§4.8); the backend handle is supplied at
/// construction if a NIC was attached, or left absent (no `send` occurs, but
/// statistics and IRQ behavior are otherwise identical) to accommodate
/// machines with only one network device wired up.
pub struct NicSlot {
    pub mac: [u8; 6],
    pub backend: Option<Box<dyn NetOps>>,
}

impl NicSlot {
    pub fn new(backend: Option<Box<dyn NetOps>>) -> Self {
        Self { mac: [0u8; 6], backend }
    }

    pub fn send(&mut self, frame: &[u8]) {
        if let Some(backend) = self.backend.as_mut() {
            backend.send(frame);
        }
    }
}
