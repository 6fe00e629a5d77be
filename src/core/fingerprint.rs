use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-length perceptual fingerprint of one image.
///
/// An N×N hash produces an N²-bit fingerprint, packed into bytes. Two
/// fingerprints can only be compared when they come from the same hash
/// size; distances use the bit length as denominator, not the (possibly
/// padded) byte length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    bits: u32,
    bytes: Box<[u8]>,
}

impl Fingerprint {
    pub fn from_bytes(bits: u32, bytes: impl Into<Box<[u8]>>) -> Self {
        let bytes = bytes.into();
        debug_assert!(bytes.len() * 8 >= bits as usize);
        Self { bits, bytes }
    }

    /// Number of significant bits (`hash_size * hash_size`).
    pub fn bit_len(&self) -> u32 {
        self.bits
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of differing bits between two fingerprints of the same length.
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        debug_assert_eq!(self.bits, other.bits);
        self.bytes
            .iter()
            .zip(other.bytes.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// Fraction of differing bits, in [0, 1].
    pub fn normalized_distance(&self, other: &Self) -> f64 {
        if self.bits == 0 {
            return 0.0;
        }
        f64::from(self.hamming_distance(other)) / f64::from(self.bits)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.bytes.iter() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_fingerprints_have_zero_distance() {
        let a = Fingerprint::from_bytes(64, vec![0xab; 8]);
        let b = Fingerprint::from_bytes(64, vec![0xab; 8]);
        assert_eq!(a.hamming_distance(&b), 0);
        assert_eq!(a.normalized_distance(&b), 0.0);
    }

    #[test]
    fn counts_differing_bits() {
        let a = Fingerprint::from_bytes(64, vec![0x00; 8]);
        let mut raw = vec![0x00u8; 8];
        raw[0] = 0b0000_0111;
        raw[7] = 0b1000_0000;
        let b = Fingerprint::from_bytes(64, raw);
        assert_eq!(a.hamming_distance(&b), 4);
        assert!((a.normalized_distance(&b) - 4.0 / 64.0).abs() < 1e-12);
    }

    #[test]
    fn fully_inverted_is_max_distance() {
        let a = Fingerprint::from_bytes(64, vec![0x00; 8]);
        let b = Fingerprint::from_bytes(64, vec![0xff; 8]);
        assert_eq!(a.hamming_distance(&b), 64);
        assert_eq!(a.normalized_distance(&b), 1.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Fingerprint::from_bytes(16, vec![0b1010_1010, 0b0101_0101]);
        let b = Fingerprint::from_bytes(16, vec![0b1111_0000, 0b0000_1111]);
        assert_eq!(a.hamming_distance(&b), b.hamming_distance(&a));
    }

    #[test]
    fn renders_as_hex() {
        let a = Fingerprint::from_bytes(16, vec![0xde, 0xad]);
        assert_eq!(a.to_string(), "dead");
    }
}
