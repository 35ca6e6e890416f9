use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

pub const CHALLENGE_METHOD: &str = "S256";

pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let code_verifier = generate_verifier();
        let code_challenge = derive_challenge(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
        }
    }
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("code_challenge", &self.code_challenge)
            .finish_non_exhaustive()
    }
}

fn random_token() -> String {
    let mut buf = [0u8; 32];
    rand::Rng::fill_bytes(&mut rand::rng(), &mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// 32 random bytes, base64url-encoded: 43 chars from the RFC 7636 unreserved set.
pub fn generate_verifier() -> String {
    random_token()
}

pub fn derive_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// CSRF token sent as `state` and expected back on the redirect.
pub fn generate_state() -> String {
    random_token()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_length_within_rfc_bounds() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 43);
        assert!((43..=128).contains(&verifier.len()));
    }

    #[test]
    fn challenge_is_deterministic() {
        let verifier = generate_verifier();
        assert_eq!(derive_challenge(&verifier), derive_challenge(&verifier));
    }

    #[test]
    fn challenge_differs_from_verifier() {
        for _ in 0..16 {
            let verifier = generate_verifier();
            assert_ne!(derive_challenge(&verifier), verifier);
        }
    }

    #[test]
    fn challenge_matches_rfc7636_appendix_b() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            derive_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn generated_pair_is_consistent() {
        let pkce = PkceChallenge::generate();
        assert_eq!(pkce.code_challenge, derive_challenge(&pkce.code_verifier));
    }

    #[test]
    fn state_is_unique_per_call() {
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn verifier_uses_unreserved_chars() {
        let pkce = PkceChallenge::generate();
        for ch in pkce.code_verifier.chars().chain(pkce.code_challenge.chars()) {
            assert!(
                ch.is_ascii_alphanumeric() || ch == '-' || ch == '_',
                "Invalid char: '{ch}'"
            );
        }
    }

    #[test]
    fn debug_hides_verifier() {
        let pkce = PkceChallenge::generate();
        let rendered = format!("{pkce:?}");
        assert!(!rendered.contains(&pkce.code_verifier));
    }
}
