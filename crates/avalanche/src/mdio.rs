//! MDIO master + embedded PHY (C4): single-PHY user-access protocol over the
//! wire-level address 31 (remapped internally to PHY index 0).

use crate::regbank::RegBank;

pub const SIZE: usize = 136;

const IDX_VER: usize = 0;
const IDX_CONTROL: usize = 1;
const IDX_LINK: usize = 8;
const IDX_USERACCESS0: usize = 32;

const USERACCESS_GO: u32 = 1 << 31;
const USERACCESS_WRITE: u32 = 1 << 30;
const USERACCESS_ACK: u32 = 1 << 29;
const USERACCESS_REGADDR_SHIFT: u32 = 21;
const USERACCESS_REGADDR_MASK: u32 = 0x1f << USERACCESS_REGADDR_SHIFT;
const USERACCESS_PHYADDR_SHIFT: u32 = 16;
const USERACCESS_PHYADDR_MASK: u32 = 0x1f << USERACCESS_PHYADDR_SHIFT;
const USERACCESS_DATA_MASK: u32 = 0xffff;

const LIVE_PHY_ADDR: u32 = 31;
const PHY_REG_COUNT: usize = 6;

const PHY_REG_CONTROL: usize = 0;
const PHY_REG_STATUS: usize = 1;
const PHY_REG_ADVERTISE: usize = 4;
const PHY_REG_REMOTE_ADVERTISE: usize = 5;

const CONTROL_RESET: u16 = 0x8000;
const CONTROL_AUTO_NEGOTIATE_EN: u16 = 0x1000;
const CONTROL_RENEGOTIATE: u16 = 0x0200;
const CONTROL_ISOLATE: u16 = 0x0400;

const STATUS_AUTO_NEG_COMPLETE: u16 = 0x0020;
const STATUS_LINK_UP: u16 = 0x0004;
const STATUS_AUTO_NEG_CAPABLE: u16 = 0x0008;

const LINK_UP_AFTER_RENEGOTIATE: u32 = 0x8000_0000;

pub struct Mdio {
    bank: RegBank,
    phy: [u16; PHY_REG_COUNT],
}

impl Mdio {
    pub fn new() -> Self {
        let bank = RegBank::with_defaults(SIZE, &[(0, 0x0007_0101), (2, 0xffff_ffff)]);
        Self { bank, phy: [0u16; PHY_REG_COUNT] }
    }

    pub fn load32(&self, off: u64) -> u32 {
        self.bank.read32(off as usize)
    }

    pub fn store32(&mut self, off: u64, v: u32) {
        let idx = (off as usize) / 4;
        match idx {
            IDX_VER => tracing::warn!("MDIO: write to read-only VER register ignored"),
            IDX_LINK => tracing::warn!("MDIO: write to read-only LINK register ignored"),
            IDX_USERACCESS0 => self.handle_useraccess(v),
            IDX_CONTROL => self.bank.write32(IDX_CONTROL * 4, v),
            _ => self.bank.write32(idx * 4, v),
        }
    }

    fn handle_useraccess(&mut self, v: u32) {
        if v & USERACCESS_GO == 0 {
            self.bank.write32(IDX_USERACCESS0 * 4, v & !USERACCESS_GO);
            return;
        }

        let phyaddr = (v & USERACCESS_PHYADDR_MASK) >> USERACCESS_PHYADDR_SHIFT;
        let regaddr = ((v & USERACCESS_REGADDR_MASK) >> USERACCESS_REGADDR_SHIFT) as usize;
        let write = v & USERACCESS_WRITE != 0;
        let data = (v & USERACCESS_DATA_MASK) as u16;

        let mut result = v & !USERACCESS_GO;

        if phyaddr == LIVE_PHY_ADDR && regaddr < PHY_REG_COUNT {
            if write {
                self.phy[regaddr] = data;
            } else {
                let current = self.phy[regaddr];
                let new_data = if regaddr == PHY_REG_CONTROL && current & CONTROL_RESET != 0 {
                    let v = (current & !CONTROL_RESET) | CONTROL_AUTO_NEGOTIATE_EN;
                    self.phy[PHY_REG_CONTROL] = v;
                    v
                } else if regaddr == PHY_REG_CONTROL && current & CONTROL_RENEGOTIATE != 0 {
                    let v = current & !CONTROL_RENEGOTIATE;
                    self.phy[PHY_REG_CONTROL] = v;
                    self.phy[PHY_REG_STATUS] =
                        STATUS_AUTO_NEG_COMPLETE | STATUS_LINK_UP | STATUS_AUTO_NEG_CAPABLE;
                    self.phy[PHY_REG_REMOTE_ADVERTISE] =
                        self.phy[PHY_REG_ADVERTISE] | CONTROL_ISOLATE | CONTROL_RESET;
                    self.bank.write32(IDX_LINK * 4, LINK_UP_AFTER_RENEGOTIATE);
                    v
                } else {
                    current
                };
                result = (result & !USERACCESS_DATA_MASK) | new_data as u32;
            }
        }

        result |= USERACCESS_ACK;
        self.bank.write32(IDX_USERACCESS0 * 4, result);
    }

    pub fn snapshot_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.bank.as_bytes());
        for reg in self.phy {
            out.extend_from_slice(&reg.to_le_bytes());
        }
    }

    pub fn restore_bytes(&mut self, bytes: &[u8]) {
        self.bank.as_bytes_mut().copy_from_slice(&bytes[..SIZE]);
        for (i, chunk) in bytes[SIZE..SIZE + PHY_REG_COUNT * 2].chunks_exact(2).enumerate() {
            self.phy[i] = u16::from_le_bytes(chunk.try_into().unwrap());
        }
    }
}

impl Default for Mdio {
    fn default() -> Self {
        Self::new()
    }
}
