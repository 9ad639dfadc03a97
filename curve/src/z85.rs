//! Z85 text encoding of binary keys.
//!
//! Every 4 bytes of input become 5 printable characters, so a 32-byte key is written as 40
//! characters. Inputs whose length is not a multiple of 4 (or 5 when decoding) are rejected.

const ALPHABET: &[u8; 85] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ.-:+=^!/*?&<>()[]{}@%$#";

/// Encodes `data` as Z85.
pub fn encode(data: &[u8]) -> Option<String> {
    if data.len() % 4 != 0 {
        return None;
    }
    let mut out = String::with_capacity(data.len() / 4 * 5);
    for chunk in data.chunks_exact(4) {
        let mut value = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let mut digits = [0u8; 5];
        for digit in digits.iter_mut().rev() {
            *digit = ALPHABET[(value % 85) as usize];
            value /= 85;
        }
        out.extend(digits.iter().map(|&d| d as char));
    }
    Some(out)
}

/// Decodes Z85 `text`.
pub fn decode(text: &[u8]) -> Option<Vec<u8>> {
    if text.len() % 5 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(text.len() / 5 * 4);
    for chunk in text.chunks_exact(5) {
        let mut value: u64 = 0;
        for &c in chunk {
            let digit = ALPHABET.iter().position(|&a| a == c)? as u64;
            value = value * 85 + digit;
        }
        let value = u32::try_from(value).ok()?;
        out.extend_from_slice(&value.to_be_bytes());
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_vector() {
        let data = [0x86, 0x4F, 0xD2, 0x6F, 0xB5, 0x59, 0xF7, 0x5B];
        assert_eq!(encode(&data).unwrap(), "HelloWorld");
        assert_eq!(decode(b"HelloWorld").unwrap(), data);
    }

    #[test]
    fn test_key_length() {
        let key = [0xA5u8; 32];
        let text = encode(&key).unwrap();
        assert_eq!(text.len(), 40);
        assert_eq!(decode(text.as_bytes()).unwrap(), key);
    }

    #[test]
    fn test_zero_key() {
        let text = "0".repeat(40);
        assert_eq!(decode(text.as_bytes()).unwrap(), vec![0u8; 32]);
    }

    #[test]
    fn test_invalid_input() {
        // Length not a multiple of 4
        assert!(encode(&[1, 2, 3]).is_none());

        // Length not a multiple of 5
        assert!(decode(b"Hello").is_some());
        assert!(decode(b"Hell").is_none());

        // Character outside of the alphabet
        assert!(decode(b"Hell~").is_none());

        // Value larger than 32 bits
        assert!(decode(b"#####").is_none());
    }
}
