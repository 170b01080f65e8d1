//! JSON API payloads.
//!
//! Only the subset of [RFC 8555] objects needed for http-01 issuance is modelled.
//!
//! [RFC 8555]: https://datatracker.ietf.org/doc/html/rfc8555

use std::fmt;

use serde::{
    ser::{SerializeMap as _, Serializer},
    Deserialize, Serialize,
};

/// Serializes to `""`.
///
/// Used as the payload of POST-as-GET requests.
pub struct EmptyString;

impl Serialize for EmptyString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("")
    }
}

/// Serializes to `{}`.
pub struct EmptyObject;

impl Serialize for EmptyObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

/// Problem document returned by the ACME server, see [RFC 7807].
///
/// [RFC 7807]: https://datatracker.ietf.org/doc/html/rfc7807
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub _type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subproblems: Option<Vec<Subproblem>>,
}

impl Problem {
    pub fn new(_type: &str, detail: &str) -> Self {
        Self {
            _type: _type.to_owned(),
            detail: Some(detail.to_owned()),
            subproblems: None,
        }
    }

    fn is_acme_error(&self, name: &str) -> bool {
        self._type
            .strip_prefix("urn:ietf:params:acme:error:")
            .or_else(|| self._type.strip_prefix("urn:acme:error:"))
            .unwrap_or(&self._type)
            == name
    }

    /// Returns true if problem type is "badNonce".
    pub fn is_bad_nonce(&self) -> bool {
        self.is_acme_error("badNonce")
    }

    /// Returns true if problem type is "malformed".
    pub fn is_malformed(&self) -> bool {
        self.is_acme_error("malformed")
    }

    /// Returns true if problem details indicate that JWS verification failed.
    pub fn is_jws_verification_error(&self) -> bool {
        self.is_malformed() && self.detail.as_deref() == Some("JWS verification error")
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self._type)?,
            None => write!(f, "{}", self._type)?,
        }

        for sub in self.subproblems.iter().flatten() {
            let detail = sub.detail.as_deref().unwrap_or_default();
            match &sub.identifier {
                Some(id) => write!(f, "; {} ({}): {detail}", sub._type, id.value)?,
                None => write!(f, "; {}: {detail}", sub._type)?,
            }
        }

        Ok(())
    }
}

impl std::error::Error for Problem {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub _type: String,
    pub detail: Option<String>,
    pub identifier: Option<Identifier>,
}

/// Directory object for ACME client self-configuration.
///
/// See [RFC 8555 §7.1.1](https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,
    pub revoke_cert: String,
    pub key_change: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_account_required: Option<bool>,
}

/// Payload and response of the newAccount resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub _type: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: &str) -> Self {
        Self {
            _type: "dns".to_owned(),
            value: value.to_owned(),
        }
    }
}

/// The status of an [`Order`].
///
/// See [RFC 8555 §7.1.6](https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// An ACME order object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,

    pub identifiers: Vec<Identifier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorizations: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub finalize: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

impl Order {
    pub fn from_domains(domains: &[String]) -> Self {
        Self {
            identifiers: domains.iter().map(|d| Identifier::dns(d)).collect(),
            ..Default::default()
        }
    }
}

/// The status of an [`Authorization`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// An ACME authorization object, the proof obligation for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    /// Returns an `http-01` challenge, if one is present.
    pub fn http_challenge(&self) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c._type == "http-01")
    }
}

/// The status of a [`Challenge`].
///
/// See [RFC 8555 §7.1.6](https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// An ACME challenge object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub _type: String,
    pub url: String,
    pub status: ChallengeStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,

    pub token: String,
}

/// Finalize request carrying the CSR in base64url-encoded DER (not PEM).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalize {
    pub csr: String,
}
