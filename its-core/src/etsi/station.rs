//! Station identifier derivation.

use sha2::{Digest, Sha256};

/// `station_id = first 24 bits of SHA-256(uuid bytes)`, as an unsigned
/// integer in `[0, 2^24)`.
pub fn station_id(uuid: &str) -> u32 {
    let digest = Sha256::digest(uuid.as_bytes());
    u32::from_be_bytes([0, digest[0], digest[1], digest[2]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_id_matches_sha256_prefix() {
        // sha256("1234").hexdigest()[:6] == "03ac67" == 240743 decimal.
        assert_eq!(station_id("1234"), 240_743);
    }

    #[test]
    fn station_id_is_deterministic_and_bounded() {
        let a = station_id("some-uuid");
        let b = station_id("some-uuid");
        assert_eq!(a, b);
        assert!(a < (1 << 24));
    }
}
