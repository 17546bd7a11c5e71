//! The cross-rank wire message and its byte framing.
//!
//! Values are opaque to this layer: by the time a message reaches here it
//! has already been packed into bytes by the caller (via `serde`/`bincode`,
//! the same backend the teacher's `timely` crate uses for its exchange
//! channels). This module only owns the envelope shape and its framing,
//! which corresponds byte-for-byte to the wire format described in the
//! specification:
//!
//! ```text
//! u32  tt_global_id
//! u16  slot_index
//! u32  key_count        (1 for `send`, |keylist| for `broadcast`)
//! [u32 key_len  key_bytes...]  (repeated key_count times)
//! u32  header_len       header_bytes...
//! u64  payload_len      payload_bytes...
//! ```

use std::fmt;
use byteorder::{ByteOrder, LittleEndian};

/// A packed cross-rank message: one key (`send`) or several (`broadcast`)
/// destined for a single `(tt, slot)`, carrying one packed value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Global identifier of the destination template task.
    pub tt_id: u32,
    /// Index of the input slot the value is destined for.
    pub slot: u16,
    /// Packed keys. Exactly one for `send_remote`, several for `broadcast_remote`.
    pub keys: Vec<Vec<u8>>,
    /// Packed value-descriptor header (type name / layout hints); opaque here.
    pub header: Vec<u8>,
    /// Packed value payload.
    pub payload: Vec<u8>,
}

/// Failure to interpret a byte buffer as an `Envelope`.
///
/// Surfaces as `ttg::Error::WireCorruption` on the receiving rank; per
/// the specification's error-propagation model this is fatal.
#[derive(Debug)]
pub struct WireCorruption(pub String);

impl fmt::Display for WireCorruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire corruption: {}", self.0)
    }
}

impl std::error::Error for WireCorruption {}

impl Envelope {
    /// Serializes this envelope to its wire representation.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            4 + 2 + 4 + self.keys.iter().map(|k| 4 + k.len()).sum::<usize>()
                + 4 + self.header.len() + 8 + self.payload.len(),
        );
        let mut u32buf = [0u8; 4];
        let mut u16buf = [0u8; 2];
        let mut u64buf = [0u8; 8];

        LittleEndian::write_u32(&mut u32buf, self.tt_id);
        buf.extend_from_slice(&u32buf);

        LittleEndian::write_u16(&mut u16buf, self.slot);
        buf.extend_from_slice(&u16buf);

        LittleEndian::write_u32(&mut u32buf, self.keys.len() as u32);
        buf.extend_from_slice(&u32buf);
        for key in &self.keys {
            LittleEndian::write_u32(&mut u32buf, key.len() as u32);
            buf.extend_from_slice(&u32buf);
            buf.extend_from_slice(key);
        }

        LittleEndian::write_u32(&mut u32buf, self.header.len() as u32);
        buf.extend_from_slice(&u32buf);
        buf.extend_from_slice(&self.header);

        LittleEndian::write_u64(&mut u64buf, self.payload.len() as u64);
        buf.extend_from_slice(&u64buf);
        buf.extend_from_slice(&self.payload);

        buf
    }

    /// Parses an envelope from its wire representation.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, WireCorruption> {
        let mut pos = 0usize;
        let take = |pos: &mut usize, n: usize, bytes: &[u8]| -> Result<std::ops::Range<usize>, WireCorruption> {
            let end = pos.checked_add(n).ok_or_else(|| WireCorruption("length overflow".into()))?;
            if end > bytes.len() {
                return Err(WireCorruption(format!("truncated message: need {} more bytes", end - bytes.len())));
            }
            let range = *pos..end;
            *pos = end;
            Ok(range)
        };

        let tt_id = LittleEndian::read_u32(&bytes[take(&mut pos, 4, bytes)?]);
        let slot = LittleEndian::read_u16(&bytes[take(&mut pos, 2, bytes)?]);
        let key_count = LittleEndian::read_u32(&bytes[take(&mut pos, 4, bytes)?]) as usize;

        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            let len = LittleEndian::read_u32(&bytes[take(&mut pos, 4, bytes)?]) as usize;
            keys.push(bytes[take(&mut pos, len, bytes)?].to_vec());
        }

        let header_len = LittleEndian::read_u32(&bytes[take(&mut pos, 4, bytes)?]) as usize;
        let header = bytes[take(&mut pos, header_len, bytes)?].to_vec();

        let payload_len = LittleEndian::read_u64(&bytes[take(&mut pos, 8, bytes)?]) as usize;
        let payload = bytes[take(&mut pos, payload_len, bytes)?].to_vec();

        if pos != bytes.len() {
            return Err(WireCorruption(format!("{} trailing bytes after well-formed message", bytes.len() - pos)));
        }

        Ok(Envelope { tt_id, slot, keys, header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_send_shaped_envelope() {
        let env = Envelope {
            tt_id: 7,
            slot: 1,
            keys: vec![vec![1, 2, 3]],
            header: vec![9, 9],
            payload: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let wire = env.to_wire();
        let back = Envelope::from_wire(&wire).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn round_trips_broadcast_shaped_envelope() {
        let env = Envelope {
            tt_id: 1,
            slot: 0,
            keys: vec![vec![1], vec![2], vec![3]],
            header: vec![],
            payload: vec![42],
        };
        let back = Envelope::from_wire(&env.to_wire()).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let env = Envelope { tt_id: 1, slot: 0, keys: vec![vec![1]], header: vec![], payload: vec![1, 2, 3] };
        let mut wire = env.to_wire();
        wire.truncate(wire.len() - 1);
        assert!(Envelope::from_wire(&wire).is_err());
    }

    #[test]
    fn rejects_trailing_garbage() {
        let env = Envelope { tt_id: 1, slot: 0, keys: vec![vec![1]], header: vec![], payload: vec![1, 2, 3] };
        let mut wire = env.to_wire();
        wire.push(0xff);
        assert!(Envelope::from_wire(&wire).is_err());
    }
}
