//! Minimal save/restore-state support for avalanche's peripheral models.
//!
//! Every stateful device implements [`IoSnapshot`] and is saved as a single
//! verbatim byte image behind a small header identifying the device and the
//! layout version that produced it. There is no field-level tagging: version
//! 0 is "whatever bytes `save_state` wrote", and `load_state` refuses to load
//! a blob stamped with a device id or version it does not recognize rather
//! than guessing at a compatible subset.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot too short: need at least {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("snapshot device id mismatch: expected {expected:?}, found {found:?}")]
    DeviceIdMismatch { expected: &'static str, found: String },

    #[error("snapshot version mismatch: device {device} supports {expected}, found {found}")]
    VersionMismatch {
        device: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("snapshot payload length mismatch: expected {expected} bytes, found {found}")]
    PayloadLengthMismatch { expected: usize, found: usize },
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

const MAGIC: &[u8; 4] = b"AVSS";
const DEVICE_ID_FIELD_LEN: usize = 16;

/// A device that can serialize and restore its entire state as a byte blob.
///
/// `DEVICE_ID` and `DEVICE_VERSION` are stamped into every snapshot this
/// device produces; `load_state` must reject any blob whose header does not
/// match both exactly, per [`SnapshotError::DeviceIdMismatch`] /
/// [`SnapshotError::VersionMismatch`].
pub trait IoSnapshot {
    /// Short, stable identifier for this device type. Must fit in
    /// [`DEVICE_ID_FIELD_LEN`] bytes of UTF-8.
    const DEVICE_ID: &'static str;
    /// Layout version of the bytes `save_state` produces. Version 0 means
    /// "verbatim image, no forward compatibility guarantees" -- bump this
    /// whenever the internal layout changes and `load_state` will refuse to
    /// load snapshots from older or newer builds rather than guess.
    const DEVICE_VERSION: u32;

    /// Append this device's verbatim state bytes to `out`.
    fn save_state(&self, out: &mut Vec<u8>);

    /// Restore this device's state from an exact verbatim byte image
    /// previously produced by `save_state` on a device of the same
    /// `DEVICE_ID`/`DEVICE_VERSION`.
    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()>;
}

/// Wraps an [`IoSnapshot`] device's payload with a header naming the device
/// and version, so mismatched snapshots are rejected instead of silently
/// misinterpreted.
pub struct SnapshotWriter {
    buf: Vec<u8>,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Serialize `device` into a self-describing blob: magic, device id,
    /// version, payload length, payload bytes.
    pub fn write_device<D: IoSnapshot>(device: &D) -> Vec<u8> {
        let mut w = SnapshotWriter::new();
        w.buf.extend_from_slice(MAGIC);

        let mut id_field = [0u8; DEVICE_ID_FIELD_LEN];
        let id_bytes = D::DEVICE_ID.as_bytes();
        assert!(
            id_bytes.len() <= DEVICE_ID_FIELD_LEN,
            "DEVICE_ID {:?} exceeds {} bytes",
            D::DEVICE_ID,
            DEVICE_ID_FIELD_LEN
        );
        id_field[..id_bytes.len()].copy_from_slice(id_bytes);
        w.buf.extend_from_slice(&id_field);

        w.buf.extend_from_slice(&D::DEVICE_VERSION.to_le_bytes());

        let mut payload = Vec::new();
        device.save_state(&mut payload);
        w.buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        w.buf.extend_from_slice(&payload);

        w.buf
    }
}

impl Default for SnapshotWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses and validates a blob produced by [`SnapshotWriter::write_device`].
pub struct SnapshotReader<'a> {
    bytes: &'a [u8],
}

impl<'a> SnapshotReader<'a> {
    const HEADER_LEN: usize = 4 + DEVICE_ID_FIELD_LEN + 4 + 4;

    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Validate the header against `D` and hand back the raw payload slice.
    /// Does not call `D::load_state`; callers that already hold a `&mut D`
    /// should prefer [`load_into`].
    pub fn payload_for<D: IoSnapshot>(&self) -> SnapshotResult<&'a [u8]> {
        if self.bytes.len() < Self::HEADER_LEN {
            return Err(SnapshotError::Truncated {
                need: Self::HEADER_LEN,
                have: self.bytes.len(),
            });
        }
        if &self.bytes[0..4] != MAGIC {
            return Err(SnapshotError::DeviceIdMismatch {
                expected: D::DEVICE_ID,
                found: String::from_utf8_lossy(&self.bytes[0..4]).into_owned(),
            });
        }

        let id_field = &self.bytes[4..4 + DEVICE_ID_FIELD_LEN];
        let nul = id_field.iter().position(|&b| b == 0).unwrap_or(id_field.len());
        let found_id = String::from_utf8_lossy(&id_field[..nul]).into_owned();
        if found_id != D::DEVICE_ID {
            return Err(SnapshotError::DeviceIdMismatch {
                expected: D::DEVICE_ID,
                found: found_id,
            });
        }

        let version_off = 4 + DEVICE_ID_FIELD_LEN;
        let found_version = u32::from_le_bytes(
            self.bytes[version_off..version_off + 4].try_into().unwrap(),
        );
        if found_version != D::DEVICE_VERSION {
            return Err(SnapshotError::VersionMismatch {
                device: D::DEVICE_ID,
                expected: D::DEVICE_VERSION,
                found: found_version,
            });
        }

        let len_off = version_off + 4;
        let payload_len = u32::from_le_bytes(
            self.bytes[len_off..len_off + 4].try_into().unwrap(),
        ) as usize;
        let payload_start = len_off + 4;
        let have = self.bytes.len() - payload_start;
        if have != payload_len {
            return Err(SnapshotError::PayloadLengthMismatch {
                expected: payload_len,
                found: have,
            });
        }

        Ok(&self.bytes[payload_start..])
    }
}

/// Validate `bytes` against `device`'s type and, on success, restore its
/// state in place.
pub fn load_into<D: IoSnapshot>(device: &mut D, bytes: &[u8]) -> SnapshotResult<()> {
    let payload = SnapshotReader::new(bytes).payload_for::<D>()?;
    device.load_state(payload)
}

/// Convenience wrapper around [`SnapshotWriter::write_device`].
pub fn save_from<D: IoSnapshot>(device: &D) -> Vec<u8> {
    SnapshotWriter::write_device(device)
}
