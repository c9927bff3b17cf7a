//! CPMAC Ethernet MAC (C8): descriptor-ring DMA, MAC filtering, statistics,
//! and per-instance interrupt generation. Two otherwise-identical instances
//! exist (index 0 at MMIO base `0x08610000`, index 1 at `0x08612800`); only
//! RX channel 0's head pointer is ever consulted on receive, per spec's
//! explicit single-RX-channel simplification.

use crate::cpu::CpuOps;
use crate::intc::Intc;
use crate::irq_line;
use crate::net::NicSlot;
use crate::regbank::RegBank;
use avalanche_memory::PhysMem;

pub const SIZE: usize = 2 * 1024;

const RX_MAXLEN: usize = 0x010c;
const TX_INTMASK_SET: usize = 0x0178;
const MAC_IN_VECTOR: usize = 0x0180;
const MACADDRLO_0: usize = 0x01b0;
const MACADDRMID: usize = 0x01d0;
const MACADDRHI: usize = 0x01d4;

const STATS_FIRST: usize = 0x0200;
const STATS_LAST: usize = 0x028c;
const RXGOODFRAMES: usize = 0x0200;
const RXBROADCASTFRAMES: usize = 0x0204;
const RXMULTICASTFRAMES: usize = 0x0208;
const RXUNICASTFRAMES: usize = 0x020c;
const RXUNDERSIZEDFRAMES: usize = 0x0210;
const RXOVERSIZEDFRAMES: usize = 0x0214;
const TXGOODFRAMES: usize = 0x0234;

const TX_HDP_FIRST: usize = 0x0600;
const TX_HDP_LAST: usize = 0x061c;
const RX_HDP_FIRST: usize = 0x0620;
const RX_HDP_LAST: usize = 0x063c;

const DESCRIPTOR_SOF: u32 = 1 << 31;
const DESCRIPTOR_EOF: u32 = 1 << 30;
const DESCRIPTOR_OWNERSHIP: u32 = 1 << 29;
const DESCRIPTOR_EOQ: u32 = 1 << 28;
const DESCRIPTOR_SIZE_MASK: u32 = 0xffff;

const MAX_FRAME_SIZE: usize = 1514;
const MIN_FRAME_SIZE: usize = 64;

/// TX_INT_OR and RX_INT_OR are single flag bits of MAC_IN_VECTOR; the firing
/// channel number is carried separately in its own bits 0-2 (TX) / 8-10
/// (RX), not by shifting the flag bit itself. Matches the source this model
/// is ported from: `MAC_IN_VECTOR_TX_INT_OR = BIT(16)`, `TX_INT_VEC =
/// BITS(2,0)`, `MAC_IN_VECTOR_RX_INT_OR = BIT(17)`, `RX_INT_VEC = BITS(10,8)`.
const RX_INT_OR_BASE_BIT: u32 = 17;
const RX_INT_VEC_SHIFT: u32 = 8;
const TX_INT_OR_BASE_BIT: u32 = 16;

#[derive(Debug, Clone, Copy)]
struct Descriptor {
    next: u32,
    buff: u32,
    length: u32,
    mode: u32,
}

impl Descriptor {
    fn read(phys_mem: &mut dyn PhysMem, addr: u64) -> Self {
        Self {
            next: phys_mem.read_u32(addr),
            buff: phys_mem.read_u32(addr + 4),
            length: phys_mem.read_u32(addr + 8),
            mode: phys_mem.read_u32(addr + 12),
        }
    }

    fn write_mode(phys_mem: &mut dyn PhysMem, addr: u64, mode: u32) {
        phys_mem.write_u32(addr + 12, mode);
    }

    fn write_full(phys_mem: &mut dyn PhysMem, addr: u64, d: &Descriptor) {
        phys_mem.write_u32(addr, d.next);
        phys_mem.write_u32(addr + 4, d.buff);
        phys_mem.write_u32(addr + 8, d.length);
        phys_mem.write_u32(addr + 12, d.mode);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameClass {
    Broadcast,
    Multicast,
    OwnMac,
    Other,
}

fn classify(frame: &[u8], mac: &[u8; 6]) -> FrameClass {
    if frame.len() >= 6 {
        if frame[0..6] == [0xff; 6] {
            return FrameClass::Broadcast;
        }
        if frame[0] & 0x01 != 0 {
            return FrameClass::Multicast;
        }
        if &frame[0..6] == mac {
            return FrameClass::OwnMac;
        }
    }
    FrameClass::Other
}

pub struct Cpmac {
    bank: RegBank,
    index: usize,
}

impl Cpmac {
    pub fn new(index: usize) -> Self {
        Self { bank: RegBank::new(SIZE), index }
    }

    fn irq_line(&self) -> u32 {
        irq_line::cpmac_line(self.index)
    }

    fn assert_irq(&self, intc: &mut Intc, cpu: &mut dyn CpuOps) {
        irq_line::set_irq_line(intc, cpu, self.irq_line(), true);
    }

    pub fn load32(&mut self, off: u64) -> u32 {
        let off = off as usize;
        if off == MAC_IN_VECTOR {
            let v = self.bank.read32(off);
            self.bank.write32(off, 0);
            v
        } else {
            self.bank.read32(off)
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn store32(
        &mut self,
        off: u64,
        v: u32,
        nic: &mut NicSlot,
        phys_mem: &mut dyn PhysMem,
        intc: &mut Intc,
        cpu: &mut dyn CpuOps,
    ) {
        let off = off as usize;
        match off {
            RX_MAXLEN => {
                tracing::debug!(index = self.index, max_len = v, "CPMAC: RX_MAXLEN updated");
                self.bank.write32(off, v);
            }
            TX_INTMASK_SET => {
                self.bank.write32(off, v);
                if v != 0 {
                    let channel = v.trailing_zeros();
                    self.bank.set_bits(MAC_IN_VECTOR, (1 << TX_INT_OR_BASE_BIT) | channel);
                    self.assert_irq(intc, cpu);
                }
            }
            MACADDRHI => {
                self.bank.write32(off, v);
                self.latch_mac_address(nic);
            }
            o if (STATS_FIRST..=STATS_LAST).contains(&o) && o % 4 == 0 => {
                if v == 0xffff_ffff {
                    self.bank.write32(o, 0);
                } else {
                    tracing::warn!(
                        index = self.index,
                        offset = o,
                        value = v,
                        "CPMAC: programming error, statistics register cleared only by 0xffffffff"
                    );
                }
            }
            o if (TX_HDP_FIRST..=TX_HDP_LAST).contains(&o) && o % 4 == 0 => {
                self.bank.write32(o, v);
                let channel = ((o - TX_HDP_FIRST) / 4) as u32;
                self.tx_dma(channel, v as u64, nic, phys_mem, intc, cpu);
            }
            o if (RX_HDP_FIRST..=RX_HDP_LAST).contains(&o) && o % 4 == 0 => {
                self.bank.write32(o, v);
            }
            _ => self.bank.write32(off, v),
        }
    }

    fn latch_mac_address(&mut self, nic: &mut NicSlot) {
        let lo = self.bank.read32(MACADDRLO_0) as u8;
        let mid = self.bank.read32(MACADDRMID) as u8;
        let hi_bytes = self.bank.read32(MACADDRHI).to_le_bytes();
        nic.mac = [hi_bytes[0], hi_bytes[1], hi_bytes[2], hi_bytes[3], mid, lo];
    }

    /// TX DMA walk, kept literal per spec's pseudocode including the
    /// EOQ-means-continue-the-chain semantics: real TI driver convention
    /// treats EOQ as end-of-queue, but the source this model is ported from
    /// uses it to mean "keep draining into the same frame", and that is
    /// what is implemented here rather than the conventional meaning.
    #[allow(clippy::too_many_arguments)]
    fn tx_dma(
        &mut self,
        channel: u32,
        mut p: u64,
        nic: &mut NicSlot,
        phys_mem: &mut dyn PhysMem,
        intc: &mut Intc,
        cpu: &mut dyn CpuOps,
    ) {
        while p != 0 {
            let mut buffer: Vec<u8> = Vec::new();
            let mut aborted = false;
            let next;
            loop {
                let d = Descriptor::read(phys_mem, p);
                let size_field = d.mode & DESCRIPTOR_SIZE_MASK;
                let flags_ok = d.mode & DESCRIPTOR_SOF != 0
                    && d.mode & DESCRIPTOR_EOF != 0
                    && d.mode & DESCRIPTOR_OWNERSHIP != 0;
                if d.length != size_field || !flags_ok {
                    tracing::warn!(
                        index = self.index,
                        channel,
                        addr = p,
                        mode = d.mode,
                        length = d.length,
                        "CPMAC: TX descriptor missing SOF/EOF/OWNERSHIP or length mismatch, aborting frame"
                    );
                    aborted = true;
                    next = d.next as u64;
                    break;
                }

                let mut payload = vec![0u8; d.length as usize];
                phys_mem.read(d.buff as u64, &mut payload);
                buffer.extend_from_slice(&payload);

                Descriptor::write_mode(phys_mem, p, d.mode & !DESCRIPTOR_OWNERSHIP);

                if d.mode & DESCRIPTOR_EOQ != 0 {
                    p = d.next as u64;
                    continue;
                } else {
                    next = d.next as u64;
                    break;
                }
            }

            if aborted {
                return;
            }

            if buffer.len() > MAX_FRAME_SIZE {
                tracing::warn!(
                    index = self.index,
                    channel,
                    len = buffer.len(),
                    "CPMAC: TX assembled frame exceeds maximum size, aborting"
                );
                return;
            }

            nic.send(&buffer);
            self.bank.inc32(TXGOODFRAMES);
            self.bank.set_bits(MAC_IN_VECTOR, (1 << TX_INT_OR_BASE_BIT) | channel);
            self.assert_irq(intc, cpu);

            p = next;
        }
    }

    pub fn can_receive(&self) -> bool {
        self.bank.read32(RX_HDP_FIRST) != 0
    }

    pub fn receive(
        &mut self,
        frame: &[u8],
        nic: &NicSlot,
        phys_mem: &mut dyn PhysMem,
        intc: &mut Intc,
        cpu: &mut dyn CpuOps,
    ) {
        match classify(frame, &nic.mac) {
            FrameClass::Broadcast => self.bank.inc32(RXBROADCASTFRAMES),
            FrameClass::Multicast => self.bank.inc32(RXMULTICASTFRAMES),
            FrameClass::OwnMac => self.bank.inc32(RXUNICASTFRAMES),
            FrameClass::Other => {}
        }

        if frame.len() < MIN_FRAME_SIZE {
            self.bank.inc32(RXUNDERSIZEDFRAMES);
        }
        if frame.len() > MAX_FRAME_SIZE {
            self.bank.inc32(RXOVERSIZEDFRAMES);
        }
        // Known quirk, preserved per spec: this counter increments even when
        // the frame is ultimately dropped below for lack of a free buffer.
        self.bank.inc32(RXGOODFRAMES);

        let hdp = self.bank.read32(RX_HDP_FIRST) as u64;
        if hdp == 0 {
            tracing::debug!(index = self.index, "CPMAC: RX dropped, no buffer posted");
            return;
        }

        let mut d = Descriptor::read(phys_mem, hdp);
        if d.mode & DESCRIPTOR_OWNERSHIP == 0 {
            tracing::warn!(index = self.index, addr = hdp, "CPMAC: RX buffer not free, dropping frame");
            return;
        }

        phys_mem.write(d.buff as u64, frame);
        d.length = frame.len() as u32;
        let mut mode = DESCRIPTOR_SOF | DESCRIPTOR_EOF | (frame.len() as u32 & DESCRIPTOR_SIZE_MASK);
        if d.next == 0 {
            mode |= DESCRIPTOR_EOQ;
        }
        d.mode = mode;
        Descriptor::write_full(phys_mem, hdp, &d);

        self.bank.write32(RX_HDP_FIRST, d.next);
        // RX channel is always 0 (single-RX-channel simplification), carried
        // in bits 8-10 alongside the RX_INT_OR flag bit, same split as TX.
        let rx_channel: u32 = 0;
        self.bank.set_bits(MAC_IN_VECTOR, (1 << RX_INT_OR_BASE_BIT) | (rx_channel << RX_INT_VEC_SHIFT));
        self.assert_irq(intc, cpu);
    }

    pub fn snapshot_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.bank.as_bytes());
    }

    pub fn restore_bytes(&mut self, bytes: &[u8]) {
        self.bank.as_bytes_mut().copy_from_slice(&bytes[..SIZE]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avalanche_memory::DenseMemory;

    struct RecordingCpu {
        irq_asserted: bool,
    }

    impl CpuOps for RecordingCpu {
        fn raise_hw_irq0(&mut self) {
            self.irq_asserted = true;
        }
        fn clear_hw_irq0(&mut self) {
            self.irq_asserted = false;
        }
        fn set_cause_bit(&mut self, _set: bool) {}
        fn request_machine_reset(&mut self) {}
        fn pc(&self) -> u64 {
            0
        }
        fn ra(&self) -> u64 {
            0
        }
        fn port_in8(&mut self, _port: u32) -> u8 {
            0
        }
        fn port_out8(&mut self, _port: u32, _v: u8) {}
    }

    struct RecordingNet {
        frames: Vec<Vec<u8>>,
    }

    impl crate::net::NetOps for RecordingNet {
        fn send(&mut self, frame: &[u8]) {
            self.frames.push(frame.to_vec());
        }
    }

    fn write_descriptor(mem: &mut DenseMemory, addr: u64, next: u32, buff: u32, length: u32, mode: u32) {
        mem.write_u32(addr, next);
        mem.write_u32(addr + 4, buff);
        mem.write_u32(addr + 8, length);
        mem.write_u32(addr + 12, mode);
    }

    #[test]
    fn mac_in_vector_read_clears() {
        let mut cpmac = Cpmac::new(0);
        cpmac.bank.write32(MAC_IN_VECTOR, 0xdead_beef);
        assert_eq!(cpmac.load32(MAC_IN_VECTOR as u64), 0xdead_beef);
        assert_eq!(cpmac.load32(MAC_IN_VECTOR as u64), 0);
    }

    #[test]
    fn mac_address_program_scenario() {
        let mut cpmac = Cpmac::new(0);
        let mut nic = NicSlot::new(None);
        let mut mem = DenseMemory::new(0x1000).unwrap();
        let mut intc = Intc::new();
        let mut cpu = RecordingCpu { irq_asserted: false };

        cpmac.store32(MACADDRLO_0 as u64, 0x66, &mut nic, &mut mem, &mut intc, &mut cpu);
        cpmac.store32(MACADDRMID as u64, 0x55, &mut nic, &mut mem, &mut intc, &mut cpu);
        cpmac.store32(MACADDRHI as u64, 0x1122_3344, &mut nic, &mut mem, &mut intc, &mut cpu);

        assert_eq!(nic.mac, [0x44, 0x33, 0x22, 0x11, 0x55, 0x66]);
    }

    #[test]
    fn tx_one_frame() {
        let mut cpmac = Cpmac::new(0);
        let mut nic = NicSlot::new(Some(Box::new(RecordingNet { frames: Vec::new() })));
        let mut mem = DenseMemory::new(0x20000).unwrap();
        let mut intc = Intc::new();
        let mut cpu = RecordingCpu { irq_asserted: false };

        let payload: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
        mem.write(0x10010, &payload);
        write_descriptor(&mut mem, 0x10000, 0, 0x10010, 64, 0xE000_0040);

        cpmac.store32(TX_HDP_FIRST as u64, 0x10000, &mut nic, &mut mem, &mut intc, &mut cpu);

        assert_eq!(cpmac.bank.read32(TXGOODFRAMES), 1);
        assert_ne!(cpmac.bank.read32(MAC_IN_VECTOR) & (1 << 16), 0);
        assert!(cpu.irq_asserted);
    }

    #[test]
    fn tx_channel1_sets_channel_bits_without_colliding_with_rx_int_or() {
        let mut cpmac = Cpmac::new(0);
        let mut nic = NicSlot::new(Some(Box::new(RecordingNet { frames: Vec::new() })));
        let mut mem = DenseMemory::new(0x20000).unwrap();
        let mut intc = Intc::new();
        let mut cpu = RecordingCpu { irq_asserted: false };

        let payload: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
        mem.write(0x10010, &payload);
        write_descriptor(&mut mem, 0x10000, 0, 0x10010, 64, 0xE000_0040);

        cpmac.store32((TX_HDP_FIRST + 4) as u64, 0x10000, &mut nic, &mut mem, &mut intc, &mut cpu);

        let vector = cpmac.bank.read32(MAC_IN_VECTOR);
        assert_eq!(vector, (1 << 16) | 1, "TX_INT_OR set with channel 1 in bits 0-2, not bit 17");
    }

    #[test]
    fn tx_intmask_set_channel1_does_not_set_rx_int_or_bit() {
        let mut cpmac = Cpmac::new(0);
        let mut nic = NicSlot::new(None);
        let mut mem = DenseMemory::new(0x1000).unwrap();
        let mut intc = Intc::new();
        let mut cpu = RecordingCpu { irq_asserted: false };

        cpmac.store32(TX_INTMASK_SET as u64, 0x0000_0002, &mut nic, &mut mem, &mut intc, &mut cpu);

        let vector = cpmac.bank.read32(MAC_IN_VECTOR);
        assert_eq!(vector, (1 << 16) | 1);
        assert_eq!(vector & (1 << 17), 0, "must not collide with RX_INT_OR");
    }

    #[test]
    fn tx_descriptor_ownership_cleared() {
        let mut cpmac = Cpmac::new(0);
        let mut nic = NicSlot::new(None);
        let mut mem = DenseMemory::new(0x20000).unwrap();
        let mut intc = Intc::new();
        let mut cpu = RecordingCpu { irq_asserted: false };

        mem.write(0x10010, &[0u8; 32]);
        write_descriptor(&mut mem, 0x10000, 0, 0x10010, 32, 0xE000_0020);
        cpmac.store32(TX_HDP_FIRST as u64, 0x10000, &mut nic, &mut mem, &mut intc, &mut cpu);

        let mode = mem.read_u32(0x10000 + 12);
        assert_eq!(mode & DESCRIPTOR_OWNERSHIP, 0);
    }

    #[test]
    fn rx_round_trip() {
        let mut cpmac = Cpmac::new(0);
        let nic = NicSlot::new(None);
        let mut mem = DenseMemory::new(0x20000).unwrap();
        let mut intc = Intc::new();
        let mut cpu = RecordingCpu { irq_asserted: false };

        write_descriptor(&mut mem, 0x12000, 0, 0x12100, 0, DESCRIPTOR_OWNERSHIP);
        cpmac.bank.write32(RX_HDP_FIRST, 0x12000);

        let frame = vec![0xabu8; 1024];
        cpmac.receive(&frame, &nic, &mut mem, &mut intc, &mut cpu);

        let mut got = vec![0u8; 1024];
        mem.read(0x12100, &mut got);
        assert_eq!(got, frame);

        let d = Descriptor::read(&mut mem, 0x12000);
        assert_eq!(d.length, 1024);
        assert_ne!(d.mode & DESCRIPTOR_SOF, 0);
        assert_ne!(d.mode & DESCRIPTOR_EOF, 0);
        assert_eq!(d.mode & DESCRIPTOR_OWNERSHIP, 0);
        assert_eq!(cpmac.bank.read32(RX_HDP_FIRST), 0);
        assert!(cpu.irq_asserted);
    }

    #[test]
    fn rx_with_no_buffer_drops_but_counts() {
        let mut cpmac = Cpmac::new(0);
        let nic = NicSlot::new(None);
        let mut mem = DenseMemory::new(0x20000).unwrap();
        let mut intc = Intc::new();
        let mut cpu = RecordingCpu { irq_asserted: false };

        let frame = vec![0xcdu8; 100];
        cpmac.receive(&frame, &nic, &mut mem, &mut intc, &mut cpu);

        assert_eq!(cpmac.bank.read32(RXGOODFRAMES), 1);
        assert!(!cpu.irq_asserted);
    }
}
