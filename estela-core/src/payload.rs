use crate::error::{Error, Result};

/// Payload sizes the engine accepts, in bits.
///
/// 128 is the default full-size message; the smaller sizes are only
/// usable in short mode, where the remaining data-region bits carry
/// error-correction parity.
pub const PAYLOAD_SIZES: [usize; 5] = [16, 32, 48, 64, 128];

/// A watermark message of 16 to 128 bits (byte-aligned sizes only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    data: Vec<u8>,
}

impl Payload {
    /// Create a payload from raw bytes. The length must be one of the
    /// supported sizes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bits = bytes.len() * 8;
        if !PAYLOAD_SIZES.contains(&bits) {
            return Err(Error::UnsupportedPayloadSize(bits));
        }
        Ok(Self {
            data: bytes.to_vec(),
        })
    }

    /// Create a payload from a hex string; the string length selects the
    /// payload size.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        if hex.len() % 2 != 0 || !PAYLOAD_SIZES.contains(&(hex.len() * 4)) {
            return Err(Error::UnsupportedPayloadSize(hex.len() * 4));
        }
        let mut data = vec![0u8; hex.len() / 2];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = hex
                .get(i * 2..i * 2 + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| Error::InvalidParameter(format!("message is not hex: {hex:?}")))?;
        }
        Ok(Self { data })
    }

    /// Size of this payload in bits.
    pub fn bits(&self) -> usize {
        self.data.len() * 8
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        self.data.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Get individual bits as a vector of bools (MSB first).
    pub fn to_bits(&self) -> Vec<bool> {
        let mut bits = Vec::with_capacity(self.bits());
        for byte in &self.data {
            for j in (0..8).rev() {
                bits.push((byte >> j) & 1 == 1);
            }
        }
        bits
    }

    /// Reconstruct a payload from bits (MSB first).
    pub fn from_bits(bits: &[bool]) -> Result<Self> {
        if !PAYLOAD_SIZES.contains(&bits.len()) {
            return Err(Error::UnsupportedPayloadSize(bits.len()));
        }
        let mut data = vec![0u8; bits.len() / 8];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                data[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        Ok(Self { data })
    }
}
