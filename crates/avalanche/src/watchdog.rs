//! Watchdog (C5): three lock/value register pairs (kick, change, prescale)
//! plus the disable register's own four-stage unlock, none of which drive an
//! actual expiry timer (non-goal — the model only records accepted intent).

use crate::regbank::RegBank;

pub const SIZE: usize = 128;

const IDX_KICK_LOCK: usize = 0;
const IDX_KICK_VALUE: usize = 1;
const IDX_CHANGE_LOCK: usize = 2;
const IDX_CHANGE_VALUE: usize = 3;
const IDX_DISABLE_LOCK: usize = 4;
const IDX_PRESCALE_LOCK: usize = 6;
const IDX_PRESCALE_VALUE: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStage {
    Locked,
    Stage1,
    Stage2DisableOnly,
    Unlocked,
}

impl LockStage {
    fn as_u32(self) -> u32 {
        match self {
            LockStage::Locked => 0,
            LockStage::Stage1 => 1,
            LockStage::Stage2DisableOnly => 2,
            LockStage::Unlocked => 3,
        }
    }
}

struct LockSequence {
    stage: LockStage,
}

impl LockSequence {
    fn new() -> Self {
        Self { stage: LockStage::Locked }
    }

    /// Apply a write of `value` to this lock register given its `sequence`
    /// of magic values and the stage each step advances to. Any value that
    /// doesn't match the next expected magic resets the stage to `Locked`
    /// and is logged as unexpected, per §4.5.
    fn apply(&mut self, value: u32, sequence: &[(u32, LockStage)], label: &str) {
        let next_index = match self.stage {
            LockStage::Locked => 0,
            LockStage::Stage1 => 1,
            LockStage::Stage2DisableOnly => 2,
            LockStage::Unlocked => {
                tracing::debug!(label, value, "watchdog: lock write while already unlocked");
                self.stage = LockStage::Locked;
                0
            }
        };

        match sequence.get(next_index) {
            Some(&(magic, resulting_stage)) if magic == value => {
                self.stage = resulting_stage;
            }
            _ => {
                tracing::warn!(label, value, "UNEXPECTED watchdog lock sequence write");
                self.stage = LockStage::Locked;
            }
        }
    }
}

pub struct Watchdog {
    bank: RegBank,
    kick_lock: LockSequence,
    change_lock: LockSequence,
    disable_lock: LockSequence,
    prescale_lock: LockSequence,
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            bank: RegBank::new(SIZE),
            kick_lock: LockSequence::new(),
            change_lock: LockSequence::new(),
            disable_lock: LockSequence::new(),
            prescale_lock: LockSequence::new(),
        }
    }

    pub fn load32(&self, off: u64) -> u32 {
        self.bank.read32(off as usize)
    }

    pub fn store32(&mut self, off: u64, v: u32) {
        let idx = (off as usize) / 4;
        match idx {
            IDX_KICK_LOCK => {
                self.kick_lock.apply(
                    v,
                    &[(0x5555, LockStage::Stage1), (0xAAAA, LockStage::Unlocked)],
                    "kick_lock",
                );
                self.bank.write32(idx * 4, self.kick_lock.stage.as_u32());
            }
            IDX_KICK_VALUE => self.write_guarded(&self.kick_lock.stage, idx, v, "kick"),
            IDX_CHANGE_LOCK => {
                self.change_lock.apply(
                    v,
                    &[(0x6666, LockStage::Stage1), (0xBBBB, LockStage::Unlocked)],
                    "change_lock",
                );
                self.bank.write32(idx * 4, self.change_lock.stage.as_u32());
            }
            IDX_CHANGE_VALUE => self.write_guarded(&self.change_lock.stage, idx, v, "change"),
            IDX_DISABLE_LOCK => {
                self.disable_lock.apply(
                    v,
                    &[
                        (0x7777, LockStage::Stage1),
                        (0xCCCC, LockStage::Stage2DisableOnly),
                        (0xDDDD, LockStage::Unlocked),
                    ],
                    "disable_lock",
                );
                self.bank.write32(idx * 4, self.disable_lock.stage.as_u32());
            }
            IDX_PRESCALE_LOCK => {
                self.prescale_lock.apply(
                    v,
                    &[(0x5A5A, LockStage::Stage1), (0xA5A5, LockStage::Unlocked)],
                    "prescale_lock",
                );
                self.bank.write32(idx * 4, self.prescale_lock.stage.as_u32());
            }
            IDX_PRESCALE_VALUE => self.write_guarded(&self.prescale_lock.stage, idx, v, "prescale"),
            _ => self.bank.write32(idx * 4, v),
        }
    }

    fn write_guarded(&mut self, stage: &LockStage, idx: usize, v: u32, label: &str) {
        if *stage == LockStage::Unlocked {
            self.bank.write32(idx * 4, v);
        } else {
            tracing::warn!(label, v, "UNEXPECTED watchdog value write while locked");
        }
    }

    pub fn snapshot_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.bank.as_bytes());
    }

    pub fn restore_bytes(&mut self, bytes: &[u8]) {
        self.bank.as_bytes_mut().copy_from_slice(&bytes[..SIZE]);
        self.kick_lock.stage = stage_from_raw(self.bank.read32(IDX_KICK_LOCK * 4));
        self.change_lock.stage = stage_from_raw(self.bank.read32(IDX_CHANGE_LOCK * 4));
        self.disable_lock.stage = stage_from_raw(self.bank.read32(IDX_DISABLE_LOCK * 4));
        self.prescale_lock.stage = stage_from_raw(self.bank.read32(IDX_PRESCALE_LOCK * 4));
    }
}

fn stage_from_raw(raw: u32) -> LockStage {
    match raw & 0x3 {
        0 => LockStage::Locked,
        1 => LockStage::Stage1,
        2 => LockStage::Stage2DisableOnly,
        _ => LockStage::Unlocked,
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}
