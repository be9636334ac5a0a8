//! Consistent Overhead Byte Stuffing.
//!
//! GGEP values land in payload areas where a zero byte would terminate the
//! enclosing run, so producers that declared "no nulls allowed" stuff their
//! values with COBS before transmission. Each output group starts with a
//! code byte: code n (1..=254) means n-1 literal non-zero bytes follow and,
//! unless this is the final group or the code is 0xFF, an implicit zero
//! comes after them.

use gwire_core::error::BadGgepBlockError;

/// Encodes `src` so the output contains no zero bytes.
///
/// A zero-free input shorter than 255 bytes costs exactly one extra byte.
pub fn encode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() + 1 + src.len() / 254);
    let mut code_index = 0;
    out.push(0); // placeholder for the first code byte
    let mut code: u8 = 1;

    for &b in src {
        if b == 0 {
            out[code_index] = code;
            code_index = out.len();
            out.push(0);
            code = 1;
        } else {
            out.push(b);
            code += 1;
            if code == 0xFF {
                // 254 literals in this group; start a new one with no
                // implied zero in between.
                out[code_index] = code;
                code_index = out.len();
                out.push(0);
                code = 1;
            }
        }
    }

    out[code_index] = code;
    out
}

/// Reverses [`encode`]. Fails on a zero byte inside the stream or a code
/// that points past the end of the input.
pub fn decode(src: &[u8]) -> Result<Vec<u8>, BadGgepBlockError> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;

    while i < src.len() {
        let code = src[i] as usize;
        if code == 0 {
            return Err(BadGgepBlockError::BadCobs);
        }
        i += 1;
        if i + code - 1 > src.len() {
            return Err(BadGgepBlockError::BadCobs);
        }
        for _ in 0..code - 1 {
            if src[i] == 0 {
                return Err(BadGgepBlockError::BadCobs);
            }
            out.push(src[i]);
            i += 1;
        }
        if code != 0xFF && i < src.len() {
            out.push(0);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_zeros() {
        let data = [1u8, 0, 2, 3, 0, 0, 4];
        let encoded = encode(&data);
        assert!(!encoded.contains(&0));
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn roundtrip_without_zeros_adds_one_byte() {
        let data = [5u8; 100];
        let encoded = encode(&data);
        assert_eq!(encoded.len(), data.len() + 1);
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn roundtrip_empty() {
        let encoded = encode(&[]);
        assert_eq!(encoded, vec![1]);
        assert_eq!(decode(&encoded).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn roundtrip_all_zeros() {
        let data = [0u8; 16];
        let encoded = encode(&data);
        assert!(!encoded.contains(&0));
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn roundtrip_long_zero_free_run() {
        // Forces the 254-literal group split.
        let data: Vec<u8> = (0..600u32).map(|i| (i % 255) as u8 + 1).collect();
        let encoded = encode(&data);
        assert!(!encoded.contains(&0));
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn decode_rejects_embedded_zero_code() {
        assert_eq!(decode(&[0, 1, 2]), Err(BadGgepBlockError::BadCobs));
    }

    #[test]
    fn decode_rejects_code_past_end() {
        assert_eq!(decode(&[5, 1, 2]), Err(BadGgepBlockError::BadCobs));
    }
}
