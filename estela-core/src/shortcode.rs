//! Short-payload error correction.
//!
//! Shortened systematic Reed-Solomon over GF(2^8) with the primitive
//! polynomial 0x11D. The codeword is always 16 bytes — exactly one Block
//! data region — so short payloads trade capacity for correction strength:
//! 2/4/6/8 data bytes leave 14/12/10/8 parity bytes, correcting up to
//! 7/6/5/4 byte errors per Block.

use crate::error::{Error, Result};

/// Codeword size in bits, independent of payload size.
pub const CODEWORD_BITS: usize = 128;

const CODEWORD_BYTES: usize = CODEWORD_BITS / 8;

/// Primitive polynomial for GF(2^8): x^8 + x^4 + x^3 + x^2 + 1.
const PRIM_POLY: u16 = 0x11D;

/// Natural RS block size over GF(2^8); shorter codewords are zero-padded
/// up to this length during decoding.
const N_MAX: usize = 255;

/// Outcome of decoding one received codeword.
///
/// Uncorrectable is a value, not an error: the caller decides how a
/// beyond-bound codeword affects the overall decode outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShortDecode {
    /// Payload bits recovered, with the number of byte errors corrected.
    Corrected { bits: Vec<bool>, errors: usize },
    /// More errors than the parity can correct.
    Uncorrectable,
}

/// Encoder/decoder for one short-payload size.
#[derive(Debug, Clone)]
pub struct ShortCode {
    data_len: usize,
    parity_len: usize,
    /// Generator polynomial, highest-degree coefficient first.
    gen_poly: Vec<u8>,
}

impl ShortCode {
    /// Payload sizes (bits) usable in short mode.
    pub const SUPPORTED_SIZES: [usize; 4] = [16, 32, 48, 64];

    /// Create the code for a payload size. Fails for sizes the 16-byte
    /// codeword cannot carry with useful parity.
    pub fn new(payload_bits: usize) -> Result<Self> {
        if !Self::SUPPORTED_SIZES.contains(&payload_bits) {
            return Err(Error::UnsupportedPayloadSize(payload_bits));
        }
        let data_len = payload_bits / 8;
        let parity_len = CODEWORD_BYTES - data_len;
        Ok(Self {
            data_len,
            parity_len,
            gen_poly: build_gen_poly(parity_len),
        })
    }

    /// Payload size in bits.
    pub fn payload_bits(&self) -> usize {
        self.data_len * 8
    }

    /// Maximum number of correctable byte errors.
    pub fn correctable(&self) -> usize {
        self.parity_len / 2
    }

    /// Systematically encode payload bits into a 128-bit codeword:
    /// the data bytes followed by the RS parity.
    ///
    /// # Panics
    /// Panics if `bits` is not exactly the payload size.
    pub fn encode(&self, bits: &[bool]) -> Vec<bool> {
        assert_eq!(
            bits.len(),
            self.payload_bits(),
            "payload bits {} do not match code size {}",
            bits.len(),
            self.payload_bits()
        );
        let data = pack_bytes(bits);

        // Remainder of data * x^parity_len divided by g(x).
        let mut shift_reg = vec![0u8; self.parity_len];
        for &byte in &data {
            let feedback = byte ^ shift_reg[0];
            for j in 0..self.parity_len - 1 {
                shift_reg[j] = shift_reg[j + 1] ^ gf_mul(feedback, self.gen_poly[j + 1]);
            }
            shift_reg[self.parity_len - 1] = gf_mul(feedback, self.gen_poly[self.parity_len]);
        }

        let mut codeword = data;
        codeword.extend_from_slice(&shift_reg);
        unpack_bits(&codeword)
    }

    /// Decode a received 128-bit codeword, correcting byte errors up to
    /// [`Self::correctable`]. The received word is conceptually
    /// zero-padded at the front to the natural 255-byte RS block.
    ///
    /// # Panics
    /// Panics if `bits` is not exactly [`CODEWORD_BITS`] long.
    pub fn decode(&self, bits: &[bool]) -> ShortDecode {
        assert_eq!(bits.len(), CODEWORD_BITS, "codeword must be {CODEWORD_BITS} bits");
        let received = pack_bytes(bits);

        let padding = N_MAX - CODEWORD_BYTES;
        let mut full_block = vec![0u8; N_MAX];
        full_block[padding..].copy_from_slice(&received);

        let tab = gf_tables();
        let mut syndromes = vec![0u8; self.parity_len];
        for (i, s) in syndromes.iter_mut().enumerate() {
            *s = poly_eval(&full_block, tab.exp[i]);
        }

        if syndromes.iter().all(|&s| s == 0) {
            return ShortDecode::Corrected {
                bits: unpack_bits(&received[..self.data_len]),
                errors: 0,
            };
        }

        let sigma = berlekamp_massey(&syndromes);
        let num_errors = sigma.len() - 1;
        if num_errors > self.correctable() {
            return ShortDecode::Uncorrectable;
        }

        let Some(found) = chien_search(&sigma, N_MAX) else {
            return ShortDecode::Uncorrectable;
        };
        let magnitudes = forney(&sigma, &syndromes, &found);

        let mut corrected = full_block;
        for (&(_, array_pos), &magnitude) in found.iter().zip(&magnitudes) {
            if array_pos < padding {
                // Error located in the virtual zero padding: the received
                // word is not within reach of any shortened codeword.
                return ShortDecode::Uncorrectable;
            }
            corrected[array_pos] ^= magnitude;
        }

        // The corrected word must be a codeword; anything else means the
        // error pattern exceeded the design bound.
        for i in 0..self.parity_len {
            if poly_eval(&corrected, tab.exp[i]) != 0 {
                return ShortDecode::Uncorrectable;
            }
        }

        ShortDecode::Corrected {
            bits: unpack_bits(&corrected[padding..padding + self.data_len]),
            errors: num_errors,
        }
    }
}

fn pack_bytes(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len() / 8];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    bytes
}

fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for byte in bytes {
        for j in (0..8).rev() {
            bits.push((byte >> j) & 1 == 1);
        }
    }
    bits
}

// --- GF(2^8) arithmetic ---

struct GfTables {
    exp: [u8; 512],
    log: [u8; 256],
}

fn gf_tables() -> &'static GfTables {
    use std::sync::OnceLock;
    static TABLES: OnceLock<GfTables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];
        let mut x: u16 = 1;
        for i in 0..255u16 {
            exp[i as usize] = x as u8;
            // wrap-around so log sums index directly
            exp[(i + 255) as usize] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= PRIM_POLY;
            }
        }
        exp[510] = exp[0];
        exp[511] = exp[1];
        GfTables { exp, log }
    })
}

fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = gf_tables();
    t.exp[t.log[a as usize] as usize + t.log[b as usize] as usize]
}

/// Multiplicative inverse; `a` must be non-zero.
fn gf_inv(a: u8) -> u8 {
    debug_assert_ne!(a, 0);
    let t = gf_tables();
    t.exp[255 - t.log[a as usize] as usize]
}

/// Evaluate a polynomial with highest-degree coefficient first.
fn poly_eval(poly: &[u8], x: u8) -> u8 {
    let mut result = 0u8;
    for &coeff in poly {
        result = gf_mul(result, x) ^ coeff;
    }
    result
}

/// Evaluate a polynomial in ascending-power form.
fn eval_asc(poly: &[u8], x: u8) -> u8 {
    let mut result = 0u8;
    let mut x_pow = 1u8;
    for &coeff in poly {
        result ^= gf_mul(coeff, x_pow);
        x_pow = gf_mul(x_pow, x);
    }
    result
}

/// g(x) = prod_{i=0}^{parity_len-1} (x - alpha^i), highest degree first.
fn build_gen_poly(parity_len: usize) -> Vec<u8> {
    let tab = gf_tables();
    let mut gpoly = vec![1u8];
    for i in 0..parity_len {
        let root = tab.exp[i];
        let mut next = vec![0u8; gpoly.len() + 1];
        for (j, &coeff) in gpoly.iter().enumerate() {
            next[j] ^= coeff;
            next[j + 1] ^= gf_mul(coeff, root);
        }
        gpoly = next;
    }
    gpoly
}

/// Berlekamp-Massey: error locator sigma(x) in ascending powers,
/// sigma[0] = 1.
fn berlekamp_massey(syndromes: &[u8]) -> Vec<u8> {
    let n = syndromes.len();

    let mut c = vec![0u8; n + 1];
    c[0] = 1;
    let mut c_len = 1usize;

    let mut b = vec![0u8; n + 1];
    b[0] = 1;
    let mut b_len = 1usize;

    let mut ell = 0usize;
    let mut bval = 1u8;
    let mut m = 1usize;

    for r in 0..n {
        let mut delta = syndromes[r];
        for i in 1..c_len {
            delta ^= gf_mul(c[i], syndromes[r - i]);
        }
        if delta == 0 {
            m += 1;
            continue;
        }

        let factor = gf_mul(delta, gf_inv(bval));
        if 2 * ell <= r {
            let old_c = c.clone();
            let old_c_len = c_len;

            c_len = (b_len + m).max(c_len);
            for j in 0..b_len {
                c[j + m] ^= gf_mul(factor, b[j]);
            }

            b[..old_c_len].copy_from_slice(&old_c[..old_c_len]);
            for slot in b.iter_mut().skip(old_c_len) {
                *slot = 0;
            }
            b_len = old_c_len;
            ell = r + 1 - ell;
            bval = delta;
            m = 1;
        } else {
            c_len = (b_len + m).max(c_len);
            for j in 0..b_len {
                c[j + m] ^= gf_mul(factor, b[j]);
            }
            m += 1;
        }
    }

    c[..c_len].to_vec()
}

/// Find the roots of sigma(x): an error at array index k corresponds to a
/// root at alpha^{-(n-1-k)}. Returns (gf_pos, array_pos) pairs, or None
/// when the root count does not match the locator degree.
fn chien_search(sigma: &[u8], n: usize) -> Option<Vec<(usize, usize)>> {
    let tab = gf_tables();
    let num_errors = sigma.len() - 1;
    let mut found = Vec::with_capacity(num_errors);
    for p in 0..n {
        let x = if p == 0 {
            1u8
        } else {
            tab.exp[(255 - (p % 255)) % 255]
        };
        if eval_asc(sigma, x) == 0 {
            found.push((p, n - 1 - p));
        }
    }
    (found.len() == num_errors).then_some(found)
}

/// Error magnitudes via Forney: e_l = X_l * Omega(X_l^{-1}) / sigma'(X_l^{-1}).
fn forney(sigma: &[u8], syndromes: &[u8], found: &[(usize, usize)]) -> Vec<u8> {
    let tab = gf_tables();
    let two_t = syndromes.len();

    // Omega(x) = S(x) * sigma(x) mod x^{2t}, ascending powers.
    let mut omega = vec![0u8; two_t];
    for (i, &sc) in sigma.iter().enumerate().take(two_t) {
        for (j, &sy) in syndromes.iter().enumerate() {
            if i + j < two_t {
                omega[i + j] ^= gf_mul(sc, sy);
            }
        }
    }

    // Formal derivative over GF(2^m): even-power terms vanish.
    let mut sigma_prime = vec![0u8; sigma.len().saturating_sub(1)];
    for i in (1..sigma.len()).step_by(2) {
        sigma_prime[i - 1] = sigma[i];
    }

    let mut magnitudes = Vec::with_capacity(found.len());
    for &(gf_pos, _) in found {
        let x_val = if gf_pos == 0 { 1 } else { tab.exp[gf_pos % 255] };
        let x_inv = if gf_pos == 0 {
            1
        } else {
            tab.exp[(255 - (gf_pos % 255)) % 255]
        };
        let omega_val = eval_asc(&omega, x_inv);
        let sp_val = eval_asc(&sigma_prime, x_inv);
        if sp_val == 0 {
            magnitudes.push(0);
            continue;
        }
        magnitudes.push(gf_mul(x_val, gf_mul(omega_val, gf_inv(sp_val))));
    }
    magnitudes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bits(len: usize) -> Vec<bool> {
        (0..len).map(|i| (i * 7 + i / 3) % 3 == 0).collect()
    }

    fn flip_byte(bits: &mut [bool], byte: usize) {
        for bit in &mut bits[byte * 8..byte * 8 + 8] {
            *bit = !*bit;
        }
    }

    #[test]
    fn gf_mul_identity_and_inverse() {
        for a in 1..=255u16 {
            let a = a as u8;
            assert_eq!(gf_mul(a, 1), a);
            assert_eq!(gf_mul(a, gf_inv(a)), 1, "a={a}");
        }
        assert_eq!(gf_mul(0, 123), 0);
    }

    #[test]
    fn generator_poly_has_expected_roots() {
        let code = ShortCode::new(32).unwrap();
        assert_eq!(code.gen_poly.len(), code.parity_len + 1);
        assert_eq!(code.gen_poly[0], 1);
        let tab = gf_tables();
        for i in 0..code.parity_len {
            assert_eq!(poly_eval(&code.gen_poly, tab.exp[i]), 0, "root alpha^{i}");
        }
    }

    #[test]
    fn rejects_unsupported_sizes() {
        assert!(ShortCode::new(0).is_err());
        assert!(ShortCode::new(24).is_err());
        assert!(ShortCode::new(80).is_err());
        assert!(ShortCode::new(128).is_err());
    }

    #[test]
    fn encode_decode_every_size() {
        for bits in ShortCode::SUPPORTED_SIZES {
            let code = ShortCode::new(bits).unwrap();
            let payload = test_bits(bits);
            let codeword = code.encode(&payload);
            assert_eq!(codeword.len(), CODEWORD_BITS);
            // systematic: data bits lead the codeword
            assert_eq!(&codeword[..bits], &payload[..]);
            let decoded = code.decode(&codeword);
            assert_eq!(
                decoded,
                ShortDecode::Corrected {
                    bits: payload,
                    errors: 0
                }
            );
        }
    }

    #[test]
    fn corrects_and_counts_byte_errors() {
        let code = ShortCode::new(32).unwrap();
        let payload = test_bits(32);
        let mut codeword = code.encode(&payload);
        flip_byte(&mut codeword, 0);
        flip_byte(&mut codeword, 5);
        flip_byte(&mut codeword, 12);
        match code.decode(&codeword) {
            ShortDecode::Corrected { bits, errors } => {
                assert_eq!(bits, payload);
                assert_eq!(errors, 3);
            }
            ShortDecode::Uncorrectable => panic!("3 errors within bound must correct"),
        }
    }

    #[test]
    fn corrects_at_the_design_bound() {
        for bits in ShortCode::SUPPORTED_SIZES {
            let code = ShortCode::new(bits).unwrap();
            let t = code.correctable();
            let payload = test_bits(bits);
            let mut codeword = code.encode(&payload);
            for byte in 0..t {
                flip_byte(&mut codeword, byte * 2);
            }
            match code.decode(&codeword) {
                ShortDecode::Corrected { bits: got, errors } => {
                    assert_eq!(got, payload, "size {bits}");
                    assert_eq!(errors, t, "size {bits}");
                }
                ShortDecode::Uncorrectable => panic!("t={t} errors within bound, size {bits}"),
            }
        }
    }

    #[test]
    fn uncorrectable_beyond_bound() {
        let code = ShortCode::new(16).unwrap();
        let payload = test_bits(16);
        let mut codeword = code.encode(&payload);
        // t = 7; eight byte errors exceed the bound
        for byte in 0..8 {
            flip_byte(&mut codeword, byte);
        }
        assert_eq!(code.decode(&codeword), ShortDecode::Uncorrectable);
    }

    #[test]
    fn parity_errors_still_recover_data() {
        let code = ShortCode::new(64).unwrap();
        let payload = test_bits(64);
        let mut codeword = code.encode(&payload);
        flip_byte(&mut codeword, 9);
        flip_byte(&mut codeword, 15);
        match code.decode(&codeword) {
            ShortDecode::Corrected { bits, errors } => {
                assert_eq!(bits, payload);
                assert_eq!(errors, 2);
            }
            ShortDecode::Uncorrectable => panic!("parity errors within bound must correct"),
        }
    }

    #[test]
    fn correction_capacity_by_size() {
        let expect = [(16, 7), (32, 6), (48, 5), (64, 4)];
        for (bits, t) in expect {
            assert_eq!(ShortCode::new(bits).unwrap().correctable(), t);
        }
    }
}
