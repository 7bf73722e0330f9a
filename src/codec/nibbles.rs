//! Nibble codec
//!
//! The trie addresses everything in nibbles (4-bit units). A byte `0xAB`
//! becomes the nibbles `[0xA, 0xB]`.

/// Convert a byte key into nibbles, high nibble first
pub fn key_le_to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(key.len() * 2);
    for byte in key {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    nibbles
}

/// Pack nibbles back into bytes
///
/// With an odd count, the first output byte carries only the first nibble in
/// its low half: `[a, a, f, f, 0, 1, c]` packs to `[0x0a, 0xaf, 0xf0, 0x1c]`.
pub fn nibbles_to_key_le(nibbles: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(nibbles.len() / 2 + 1);
    let pairs = if nibbles.len() % 2 == 1 {
        key.push(nibbles[0] & 0x0F);
        &nibbles[1..]
    } else {
        nibbles
    };
    for pair in pairs.chunks_exact(2) {
        key.push((pair[0] << 4) | (pair[1] & 0x0F));
    }
    key
}

/// Length of the common prefix between two nibble sequences
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Render nibbles as a hex string, one character per nibble
pub fn nibbles_to_hex(nibbles: &[u8]) -> String {
    nibbles
        .iter()
        .map(|n| char::from_digit(u32::from(*n & 0x0F), 16).unwrap_or('?'))
        .collect()
}
