use rand::RngExt;

use super::types::ROOM_CODE_LENGTH;

/// Room code alphabet: uppercase letters and digits with the easily-confused
/// characters (I, O, 0, 1) removed. 32 symbols, so a 6-character code carries
/// 30 bits.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a room code of the default length.
pub fn generate_room_code() -> String {
    generate_room_code_of_length(ROOM_CODE_LENGTH)
}

/// Generate a room code of the requested length.
pub fn generate_room_code_of_length(length: usize) -> String {
    if length == 0 {
        return String::new();
    }
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..ROOM_CODE_ALPHABET.len());
            // SAFETY: `idx` is produced by `random_range(0..len)`, so it is
            // always within [0, len).
            #[allow(clippy::indexing_slicing)]
            let ch = ROOM_CODE_ALPHABET[idx] as char;
            ch
        })
        .collect()
}

/// Whether a candidate string is a well-formed room code.
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LENGTH
        && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
}
