use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit};
use rand::RngCore;

use crate::error::{Error, Result};

/// The shared secret seeding every keyed stream.
///
/// Wraps an AES-128 key used as a deterministic PRNG: the same key, stream
/// id and position always produce the same value sequence, across
/// processes and platforms.
#[derive(Clone)]
pub struct Key {
    cipher: Aes128,
    raw: [u8; 16],
}

impl Key {
    /// Create a key from exactly 16 raw bytes.
    pub fn new(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != 16 {
            return Err(Error::InvalidKeyLength(key_bytes.len()));
        }
        let mut raw = [0u8; 16];
        raw.copy_from_slice(key_bytes);
        Ok(Self::from_raw(raw))
    }

    /// Distinguished small-integer key for reproducible fixtures.
    ///
    /// Not for production use: the value occupies the low 8 bytes of an
    /// otherwise zero key, so the keyspace is trivially enumerable.
    pub fn from_test_key(n: u64) -> Self {
        let mut raw = [0u8; 16];
        raw[8..].copy_from_slice(&n.to_be_bytes());
        Self::from_raw(raw)
    }

    /// Generate a fresh random 128-bit key.
    pub fn generate() -> Self {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        Self::from_raw(raw)
    }

    /// Parse the 32-hex-digit text form produced by [`Key::to_hex`].
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        if hex.len() != 32 {
            return Err(Error::InvalidKeyLength(hex.len() / 2));
        }
        let mut raw = [0u8; 16];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = hex
                .get(i * 2..i * 2 + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| Error::MalformedKeyFile(format!("bad hex digit in {hex:?}")))?;
        }
        Ok(Self::from_raw(raw))
    }

    /// Text-encodable form of the key (32 lowercase hex digits).
    pub fn to_hex(&self) -> String {
        self.raw.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse key-file contents: one `key <hex>` line, `#` comments and
    /// blank lines ignored. Duplicate key lines or unknown tokens are
    /// malformed — key material is never best-guessed.
    pub fn parse_key_file(contents: &str) -> Result<Self> {
        let mut key = None;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once(char::is_whitespace) {
                Some(("key", value)) => {
                    if key.is_some() {
                        return Err(Error::MalformedKeyFile("multiple key lines".into()));
                    }
                    key = Some(Self::from_hex(value)?);
                }
                _ => {
                    return Err(Error::MalformedKeyFile(format!(
                        "unrecognized line {line:?}"
                    )));
                }
            }
        }
        key.ok_or_else(|| Error::MalformedKeyFile("no key line found".into()))
    }

    /// The raw 16-byte key.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.raw
    }

    fn from_raw(raw: [u8; 16]) -> Self {
        let cipher = Aes128::new_from_slice(&raw).expect("key length is 16");
        Self { cipher, raw }
    }

    fn encrypt(&self, block: [u8; 16]) -> [u8; 16] {
        let mut block = aes::Block::from(block);
        self.cipher.encrypt_block(&mut block);
        block.into()
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key").field("raw", &"[REDACTED]").finish()
    }
}

/// Named logical purpose of a keyed stream.
///
/// Distinct ids occupy distinct words of the AES input block, so streams
/// derived from one key are statistically independent of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StreamId {
    /// Sign sequence of the sync frames.
    SyncBits = 1,
    /// Bin-pair pattern shared by all sync frames.
    SyncPattern = 2,
    /// Per-position bin-pair patterns of the data frames.
    DataPattern = 3,
    /// Shuffle placing payload bits across the data region.
    BitOrder = 4,
}

/// Deterministic pseudo-random value stream derived from (key, id,
/// position).
///
/// Values come from AES-ECB encryptions of the input block
/// `[stream_id | position | counter]`; the counter advances as values
/// are consumed, so the sequence is infinite and reproducible.
#[derive(Clone)]
pub struct KeyedStream {
    key: Key,
    stream_id: u32,
    position: u32,
    counter: u64,
    block: [u8; 16],
    byte_pos: usize,
}

impl KeyedStream {
    /// Derive the stream for a purpose at position 0.
    pub fn derive(key: &Key, id: StreamId) -> Self {
        Self::derive_at(key, id, 0)
    }

    /// Derive the stream for a purpose at a block-relative position.
    pub fn derive_at(key: &Key, id: StreamId, position: u32) -> Self {
        Self {
            key: key.clone(),
            stream_id: id as u32,
            position,
            counter: 0,
            block: [0u8; 16],
            byte_pos: 16,
        }
    }

    /// Rewind to the start of the sequence.
    pub fn reset(&mut self) {
        self.counter = 0;
        self.byte_pos = 16;
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        for b in &mut bytes {
            if self.byte_pos == 16 {
                self.refill();
            }
            *b = self.block[self.byte_pos];
            self.byte_pos += 1;
        }
        u32::from_le_bytes(bytes)
    }

    /// Uniform-ish value in `0..n`. Modulo bias is negligible for the
    /// small ranges used here (bin indices, shuffle positions).
    pub fn next_range(&mut self, n: u32) -> u32 {
        debug_assert!(n > 0);
        self.next_u32() % n
    }

    pub fn next_bool(&mut self) -> bool {
        self.next_u32() & 1 == 1
    }

    /// The next `count` values as a boolean sequence.
    pub fn bits(&mut self, count: usize) -> Vec<bool> {
        (0..count).map(|_| self.next_bool()).collect()
    }

    fn refill(&mut self) {
        let mut input = [0u8; 16];
        input[0..4].copy_from_slice(&self.stream_id.to_le_bytes());
        input[4..8].copy_from_slice(&self.position.to_le_bytes());
        input[8..16].copy_from_slice(&self.counter.to_le_bytes());
        self.block = self.key.encrypt(input);
        self.counter += 1;
        self.byte_pos = 0;
    }
}
