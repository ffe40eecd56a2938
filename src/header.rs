//! Block header: the external collaborator's wire format plus the two
//! primitives the engine needs from it — `sha256d` and hex (de)serialization.
//!
//! The engine never touches JSON-RPC or Stratum directly; it only needs a
//! `BlockHeader` value, a hash over its "core" fields, and a way to turn the
//! completed header back into the hex string a work-source submits.

use sha2::{Digest, Sha256};

/// `FP48`: difficulty as a fixed-point number. High 16 bits are the integer
/// gap length, low 48 bits are the fraction.
pub const FP48_FRACTION_BITS: u32 = 48;

/// Block header as the engine requires it. `adder` is variable-length because
/// its byte length depends on `shift` (it holds the low `shift` bits of P).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub hash_prev_block: [u8; 32],
    pub hash_merkle_root: [u8; 32],
    pub version: u32,
    pub time: u32,
    pub difficulty: u64,
    pub nonce: u32,
    pub shift: u16,
    pub adder: Vec<u8>,
}

impl BlockHeader {
    /// Bytes hashed to produce the anchor hash: everything except the
    /// mined-in `shift`/`adder` extension, which is appended only once a PoW
    /// has been found.
    pub fn core_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 32 + 32 + 4 + 8 + 4);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.hash_prev_block);
        buf.extend_from_slice(&self.hash_merkle_root);
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.difficulty.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// Double SHA-256 of the core bytes — the anchor hash candidates are
    /// shifted and added onto.
    pub fn anchor_hash(&self) -> [u8; 32] {
        sha256d(&self.core_bytes())
    }

    /// Full wire encoding: core fields, then `shift` and var-length `adder`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.core_bytes();
        buf.extend_from_slice(&self.shift.to_le_bytes());
        buf.extend_from_slice(&(self.adder.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.adder);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderParseError> {
        let mut cursor = Cursor::new(bytes);
        let version = cursor.read_u32()?;
        let hash_prev_block = cursor.read_32()?;
        let hash_merkle_root = cursor.read_32()?;
        let time = cursor.read_u32()?;
        let difficulty = cursor.read_u64()?;
        let nonce = cursor.read_u32()?;
        let shift = cursor.read_u16()?;
        let adder_len = cursor.read_u32()? as usize;
        let adder = cursor.read_vec(adder_len)?;
        Ok(BlockHeader {
            hash_prev_block,
            hash_merkle_root,
            version,
            time,
            difficulty,
            nonce,
            shift,
            adder,
        })
    }

    pub fn to_hex(&self) -> String {
        hex_lower(&self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, HeaderParseError> {
        let bytes = hex_decode(s)?;
        Self::from_bytes(&bytes)
    }
}

/// SHA-256 applied twice, the usual anti-length-extension idiom for
/// Bitcoin-family headers.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderParseError {
    #[error("header truncated: needed {needed} more bytes, had {available}")]
    Truncated { needed: usize, available: usize },
    #[error("invalid hex: {0}")]
    BadHex(String),
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], HeaderParseError> {
        if self.pos + n > self.bytes.len() {
            return Err(HeaderParseError::Truncated {
                needed: n,
                available: self.bytes.len() - self.pos,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, HeaderParseError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, HeaderParseError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_u16(&mut self) -> Result<u16, HeaderParseError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_32(&mut self) -> Result<[u8; 32], HeaderParseError> {
        Ok(self.take(32)?.try_into().unwrap())
    }

    fn read_vec(&mut self, n: usize) -> Result<Vec<u8>, HeaderParseError> {
        Ok(self.take(n)?.to_vec())
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn hex_decode(s: &str) -> Result<Vec<u8>, HeaderParseError> {
    if s.len() % 2 != 0 {
        return Err(HeaderParseError::BadHex("odd-length hex string".into()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| HeaderParseError::BadHex(e.to_string()))
        })
        .collect()
}

/// Encode an `FP48` difficulty from an integer gap length and a fraction in
/// `[0, 1)`.
pub fn encode_fp48(integer_gap: u16, fraction: f64) -> u64 {
    let frac_bits = (fraction.clamp(0.0, 0.999_999_999_999) * (1u64 << FP48_FRACTION_BITS) as f64)
        as u64;
    ((integer_gap as u64) << FP48_FRACTION_BITS) | frac_bits
}

/// Decode an `FP48` difficulty into its float value `integer + fraction`.
pub fn decode_fp48(difficulty: u64) -> f64 {
    let integer = difficulty >> FP48_FRACTION_BITS;
    let frac_mask = (1u64 << FP48_FRACTION_BITS) - 1;
    let frac = difficulty & frac_mask;
    integer as f64 + (frac as f64 / (1u64 << FP48_FRACTION_BITS) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            hash_prev_block: [0xab; 32],
            hash_merkle_root: [0xcd; 32],
            version: 2,
            time: 1_700_000_000,
            difficulty: encode_fp48(10, 0.5),
            nonce: 42,
            shift: 20,
            adder: vec![1, 2, 3, 4, 5],
        }
    }

    #[test]
    fn hex_round_trip_is_identity() {
        let h = sample_header();
        let hex = h.to_hex();
        let back = BlockHeader::from_hex(&hex).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn hex_round_trip_empty_adder() {
        let mut h = sample_header();
        h.adder = Vec::new();
        let back = BlockHeader::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn from_bytes_rejects_truncation() {
        let h = sample_header();
        let bytes = h.to_bytes();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(BlockHeader::from_bytes(truncated).is_err());
    }

    #[test]
    fn sha256d_matches_known_vector() {
        // sha256d("") = sha256(sha256("")).
        let empty_once = Sha256::digest(b"");
        let expected: [u8; 32] = Sha256::digest(empty_once).into();
        assert_eq!(sha256d(b""), expected);
    }

    #[test]
    fn fp48_round_trips_integer_part() {
        let d = encode_fp48(256, 0.0);
        assert_eq!(decode_fp48(d).trunc() as u16, 256);
    }

    #[test]
    fn fp48_fraction_is_approximate() {
        let d = encode_fp48(10, 0.25);
        let decoded = decode_fp48(d);
        assert!((decoded - 10.25).abs() < 1e-9);
    }
}
