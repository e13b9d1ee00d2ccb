use std::fmt;

/// Token staff present for privileged operations.
#[derive(Clone)]
pub struct SharedSecret {
    secret: Vec<u8>,
}

impl SharedSecret {
    /// `None` for an empty secret: staff operations must never be open.
    pub fn new(secret: &str) -> Option<Self> {
        if secret.is_empty() {
            return None;
        }
        Some(Self {
            secret: secret.as_bytes().to_vec(),
        })
    }

    /// Compares every byte regardless of where the first mismatch is.
    pub fn verify(&self, presented: &str) -> bool {
        let presented = presented.as_bytes();
        let mut diff = self.secret.len() ^ presented.len();
        for (i, b) in self.secret.iter().enumerate() {
            let p = presented.get(i).copied().unwrap_or(0);
            diff |= usize::from(b ^ p);
        }
        diff == 0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_matches_exactly() {
        let secret = SharedSecret::new("hunter2").unwrap();
        assert!(secret.verify("hunter2"));
        assert!(!secret.verify("hunter3"));
        assert!(!secret.verify("hunter"));
        assert!(!secret.verify("hunter22"));
        assert!(!secret.verify(""));
    }

    #[test]
    fn empty_secret_refused() {
        assert!(SharedSecret::new("").is_none());
    }

    #[test]
    fn debug_hides_secret() {
        let secret = SharedSecret::new("hunter2").unwrap();
        assert!(!format!("{secret:?}").contains("hunter2"));
    }
}
