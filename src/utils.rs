use sha2::{Digest, Sha256};

/// Salted, truncated hash of an identifier for privacy-safe log output.
///
/// User and room ids never appear verbatim in logs unless
/// `LOG_USER_IDENTIFIERS` is enabled; this gives operators a stable handle
/// for correlating log lines without exposing the raw id.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let digest = hasher.finalize();

    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_salted() {
        let a = log_safe_id("user-1", "salt-a");
        let b = log_safe_id("user-1", "salt-a");
        let c = log_safe_id("user-1", "salt-b");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
    }
}
