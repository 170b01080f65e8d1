use base64::prelude::*;
use sha2::{Digest as _, Sha256};

use crate::{
    acme::jws::{Jwk, JwkThumb},
    Result,
};

/// Make a P-256 private key (from which we can derive a public key).
pub fn create_p256_key() -> p256::ecdsa::SigningKey {
    let csprng = &mut rand::thread_rng();
    ecdsa::SigningKey::from(p256::SecretKey::random(csprng))
}

/// Key pair identifying an ACME account.
///
/// Issuance runs create a fresh key for every run and never write it anywhere, so the account
/// only lives as long as the run does.
#[derive(Clone)]
pub struct AccountKey {
    signing_key: p256::ecdsa::SigningKey,
}

impl AccountKey {
    /// Generates a new ephemeral P-256 account key.
    pub fn generate() -> Self {
        Self {
            signing_key: create_p256_key(),
        }
    }

    pub(crate) fn signing_key(&self) -> &p256::ecdsa::SigningKey {
        &self.signing_key
    }

    /// JWK thumbprint of the public key, see [RFC 7638].
    ///
    /// [RFC 7638]: https://datatracker.ietf.org/doc/html/rfc7638
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = Jwk::try_from(self)?;
        let jwk_json = serde_json::to_string(&JwkThumb::from(&jwk))?;
        Ok(BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(jwk_json)))
    }

    /// Key authorization for `token`, the body served for an http-01 challenge.
    ///
    /// See [RFC 8555 §8.1](https://datatracker.ietf.org/doc/html/rfc8555#section-8.1).
    pub fn key_authorization(&self, token: &str) -> Result<String> {
        Ok(format!("{token}.{}", self.thumbprint()?))
    }
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbprint_is_stable_per_key() {
        let key = AccountKey::generate();
        assert_eq!(key.thumbprint().unwrap(), key.clone().thumbprint().unwrap());
    }

    #[test]
    fn key_authorization_shape() {
        let key = AccountKey::generate();
        let key_auth = key.key_authorization("tok-123").unwrap();

        let (token, thumb) = key_auth.split_once('.').unwrap();
        assert_eq!(token, "tok-123");
        // base64url of a SHA-256 digest, unpadded
        assert_eq!(thumb.len(), 43);
        assert!(!thumb.contains('='));
    }

    #[test]
    fn fresh_keys_differ() {
        let a = AccountKey::generate().thumbprint().unwrap();
        let b = AccountKey::generate().thumbprint().unwrap();
        assert_ne!(a, b);
    }
}
