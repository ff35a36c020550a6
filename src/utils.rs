//! Small helpers shared across components.

use rand::Rng;

/// `-BT0010-` followed by 12 random ASCII digits (Azureus style).
pub fn generate_peer_id() -> [u8; 20] {
    const PREFIX: &[u8; 8] = b"-BT0010-";
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(PREFIX);
    let mut rng = rand::thread_rng();
    for slot in &mut id[8..] {
        *slot = b'0' + rng.gen_range(0..10);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_has_azureus_prefix_and_digit_suffix() {
        let id = generate_peer_id();
        assert_eq!(&id[..8], b"-BT0010-");
        for &byte in &id[8..] {
            assert!(byte.is_ascii_digit());
        }
    }
}
