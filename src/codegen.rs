use crate::errors::ServiceError;
use crate::store::LinkStore;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// How many fresh random draws to attempt before giving up. Collisions at
/// the default length are vanishingly rare, so hitting this cap means the
/// store is saturated or something is wrong; either way the caller gets a
/// typed error, never a silent duplicate.
const MAX_RETRIES: usize = 5;

/// Produces short URL-safe identifiers that are not currently present in
/// the link store.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    length: usize,
}

impl CodeGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    /// Draw random codes until one is free, up to the retry cap.
    ///
    /// The store's uniqueness constraint on insert remains the
    /// authoritative guard against two concurrent callers drawing the
    /// same free code; this check only keeps the happy path cheap.
    pub async fn generate(&self, store: &dyn LinkStore) -> Result<String, ServiceError> {
        for _ in 0..MAX_RETRIES {
            let code = random_code(self.length);
            match store.get(&code).await? {
                None => return Ok(code),
                Some(_) => continue,
            }
        }
        Err(ServiceError::GenerationExhausted)
    }
}

/// Validate a user-chosen code: letters, digits, and hyphens only, and a
/// sane length. Uniqueness is checked separately at insert time.
pub fn validate_custom_code(code: &str) -> Result<(), ServiceError> {
    if code.is_empty() || code.len() > 64 {
        return Err(ServiceError::InvalidRequest(
            "custom code must be 1–64 characters".into(),
        ));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ServiceError::InvalidRequest(
            "custom code may only contain letters, numbers, and hyphens".into(),
        ));
    }
    Ok(())
}

/// Generate a random alphanumeric string of the given length.
fn random_code(len: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Link;
    use crate::store::testing::MemoryStore;

    fn link(code: &str) -> Link {
        Link {
            code: code.into(),
            owner_id: "owner-1".into(),
            target_url: "https://example.com".into(),
            created_at: chrono::Utc::now().naive_utc(),
            is_active: true,
        }
    }

    #[test]
    fn codes_use_the_url_safe_alphabet() {
        let code = random_code(7);
        assert_eq!(code.len(), 7);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn generates_a_free_code() {
        let store = MemoryStore::new();
        let generator = CodeGenerator::new(7);

        let code = generator.generate(&store).await.unwrap();
        assert_eq!(code.len(), 7);
        assert!(store.get(&code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exhausts_when_every_code_is_taken() {
        // With length 1 the whole code space is the 62-character alphabet;
        // fill it so every draw collides.
        let store = MemoryStore::new();
        for b in ALPHABET {
            store.put(&link(&(*b as char).to_string())).await.unwrap();
        }

        let generator = CodeGenerator::new(1);
        match generator.generate(&store).await {
            Err(ServiceError::GenerationExhausted) => {}
            other => panic!("expected GenerationExhausted, got {other:?}"),
        }
    }

    #[test]
    fn custom_code_validation() {
        assert!(validate_custom_code("promo-2026").is_ok());
        assert!(validate_custom_code("").is_err());
        assert!(validate_custom_code("has space").is_err());
        assert!(validate_custom_code("emoji🙂").is_err());
    }
}
