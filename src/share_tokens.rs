use sha2::{Digest, Sha256};

pub const SHARE_TOKEN_LENGTH: usize = 32;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Random public link token: 32 lowercase hex chars.
pub fn new_share_token() -> String {
    let seed: u64 = rand::random();
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(nanos.to_le_bytes());
    let digest = hasher.finalize();

    let mut token = hex(digest.as_slice());
    token.truncate(SHARE_TOKEN_LENGTH);
    token
}

/// Short random id used to name stored files.
pub fn unique_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

pub fn is_valid_share_token(token: &str) -> bool {
    token.len() == SHARE_TOKEN_LENGTH
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}
