//! Request signing, see [RFC 8555 §6.2].
//!
//! [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2

use base64::prelude::*;
use p256::ecdsa::{signature::Signer as _, Signature};
use serde::{Deserialize, Serialize};

use crate::{AccountKey, Error, Result};

/// JWS protected header.
///
/// `newAccount` requests carry the full `jwk`; everything after that carries the account URL as
/// `kid`. The two are mutually exclusive.
#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct ProtectedHeader {
    alg: String,
    nonce: String,
    url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,

    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl ProtectedHeader {
    pub(crate) fn with_jwk(jwk: Jwk, url: &str, nonce: String) -> Self {
        ProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce,
            jwk: Some(jwk),
            ..Default::default()
        }
    }

    pub(crate) fn with_kid(kid: &str, url: &str, nonce: String) -> Self {
        ProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce,
            kid: Some(kid.to_owned()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct Jwk {
    alg: String,
    crv: String,
    kty: String,
    #[serde(rename = "use")]
    _use: String,
    x: String,
    y: String,
}

impl TryFrom<&AccountKey> for Jwk {
    type Error = Error;

    fn try_from(key: &AccountKey) -> Result<Self> {
        let point = key.signing_key().verifying_key().to_encoded_point(false);

        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(Error::Key("account key has no affine coordinates".to_owned()));
        };

        Ok(Jwk {
            alg: "ES256".to_owned(),
            kty: "EC".to_owned(),
            crv: "P-256".to_owned(),
            _use: "sig".to_owned(),
            x: BASE64_URL_SAFE_NO_PAD.encode(x),
            y: BASE64_URL_SAFE_NO_PAD.encode(y),
        })
    }
}

/// Required members of the JWK only.
#[derive(Debug, Serialize, Deserialize, Clone)]
// LEXICAL ORDER OF FIELDS MATTER!
pub(crate) struct JwkThumb {
    crv: String,
    kty: String,
    x: String,
    y: String,
}

impl From<&Jwk> for JwkThumb {
    fn from(jwk: &Jwk) -> Self {
        JwkThumb {
            crv: jwk.crv.clone(),
            kty: jwk.kty.clone(),
            x: jwk.x.clone(),
            y: jwk.y.clone(),
        }
    }
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FlattenedJsonJws {
    protected: String,
    payload: String,
    signature: String,
}

/// Serializes `payload` and signs it under `protected`.
///
/// A payload serializing to `""` (POST-as-GET) is sent as an empty string, not base64url of `""`.
pub(crate) fn sign<T: Serialize + ?Sized>(
    protected: &ProtectedHeader,
    key: &AccountKey,
    payload: &T,
) -> Result<String> {
    let protected = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_string(protected)?);

    let payload = match serde_json::to_string(payload)?.as_str() {
        "\"\"" => String::new(),
        json => BASE64_URL_SAFE_NO_PAD.encode(json),
    };

    let signature: Signature = key
        .signing_key()
        .sign(format!("{protected}.{payload}").as_bytes());

    let jws = FlattenedJsonJws {
        protected,
        payload,
        signature: BASE64_URL_SAFE_NO_PAD.encode(signature.to_bytes()),
    };

    Ok(serde_json::to_string(&jws)?)
}
