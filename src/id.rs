use rand::rngs::OsRng;
use rand::RngCore;

const PREFIX: &str = "run_";
const RANDOM_BYTES: usize = 4;

/// New run identifier: `run_` followed by 8 lowercase hex digits from the OS RNG.
/// Collisions are left to the store's primary key.
pub fn generate() -> String {
    let mut buf = [0u8; RANDOM_BYTES];
    OsRng.fill_bytes(&mut buf);

    format!("{}{}", PREFIX, hex::encode(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn id_has_fixed_shape() {
        let id = generate();
        assert_eq!(id.len(), 12);
        assert!(id.starts_with("run_"));
        assert!(id[4..]
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn ids_do_not_repeat_in_practice() {
        let ids: HashSet<String> = (0..200).map(|_| generate()).collect();
        assert_eq!(ids.len(), 200);
    }
}
