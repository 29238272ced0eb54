//! Byte-aligned bit vectors over bucket indices
//!
//! Bit `i` lives in byte `i / 8` at position `i % 8` (LSB first).

/// Bytes needed to hold `num_bits` bits
pub fn request_vector_len(num_bits: usize) -> usize {
    (num_bits + 7) / 8
}

#[inline]
pub fn set_bit(vector: &mut [u8], index: usize) {
    vector[index / 8] |= 1 << (index % 8);
}

#[inline]
pub fn get_bit(vector: &[u8], index: usize) -> bool {
    (vector[index / 8] >> (index % 8)) & 1 == 1
}

/// XOR `src` into `dst` in place
#[inline]
pub fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

/// Copy bits `[start, start + len)` of `vector` into a new vector starting
/// at bit 0. Every source byte in range is touched the same way regardless
/// of its contents.
pub fn extract_bits(vector: &[u8], start: usize, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; request_vector_len(len)];
    let shift = start % 8;
    let first = start / 8;

    for (i, byte) in out.iter_mut().enumerate() {
        let lo = vector.get(first + i).copied().unwrap_or(0);
        let hi = vector.get(first + i + 1).copied().unwrap_or(0);
        let wide = u16::from(lo) | (u16::from(hi) << 8);
        *byte = (wide >> shift) as u8;
    }

    let tail = len % 8;
    if tail != 0 {
        if let Some(last) = out.last_mut() {
            *last &= (1u8 << tail) - 1;
        }
    }
    out
}

/// Indices of all set bits below `num_bits`
pub fn set_bits(vector: &[u8], num_bits: usize) -> Vec<usize> {
    (0..num_bits).filter(|&i| get_bit(vector, i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut v = vec![0u8; request_vector_len(20)];
        assert_eq!(v.len(), 3);
        set_bit(&mut v, 0);
        set_bit(&mut v, 9);
        set_bit(&mut v, 19);
        assert!(get_bit(&v, 0));
        assert!(get_bit(&v, 9));
        assert!(!get_bit(&v, 10));
        assert_eq!(set_bits(&v, 20), vec![0, 9, 19]);
    }

    #[test]
    fn test_extract_aligned() {
        let v = [0xAB, 0xCD, 0xEF];
        assert_eq!(extract_bits(&v, 8, 16), vec![0xCD, 0xEF]);
    }

    #[test]
    fn test_extract_unaligned() {
        let mut v = vec![0u8; 4];
        set_bit(&mut v, 5);
        set_bit(&mut v, 7);
        set_bit(&mut v, 12);
        set_bit(&mut v, 17);

        let out = extract_bits(&v, 5, 10);
        assert_eq!(out.len(), 2);
        // bit 17 is outside the window and must not leak in
        assert_eq!(set_bits(&out, 16), vec![0, 2, 7]);
    }

    #[test]
    fn test_xor_into() {
        let mut a = vec![0b1010u8, 0xFF];
        xor_into(&mut a, &[0b0110, 0x0F]);
        assert_eq!(a, vec![0b1100, 0xF0]);
    }
}
