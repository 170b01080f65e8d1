//! Unattended issuance of http-01 validated certificates from ACME (Automatic Certificate
//! Management Environment) providers such as [Let's Encrypt](https://letsencrypt.org/).
//!
//! One run registers a throwaway account, orders a certificate for a list of domains, publishes
//! the [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555) http-01 tokens into a directory
//! served by your web server, waits for the CA to validate them, finalizes the order with a fresh
//! request key and writes the certificate chain and that key to disk.
//!
//! # Usage
//!
//! ```no_run
//! use acme_issue::{HttpDirectoryClient, IssuanceRequest, Issuer, PollingConfig, RuntimeConfig};
//!
//! # async fn run() -> acme_issue::Result<()> {
//! let request = IssuanceRequest::new(["example.org"], "ops@example.org", "example.org", false)?;
//! let config = RuntimeConfig {
//!     challenges_dir: "/var/www/.well-known/acme-challenge".into(),
//!     certificate_path: "/etc/ssl/example.org.pem".into(),
//!     request_key_path: "/etc/ssl/example.org.key".into(),
//!     polling: PollingConfig::default(),
//! };
//!
//! let cert = Issuer::new(HttpDirectoryClient::new()?)
//!     .run(&request, &config)
//!     .await?;
//! println!("{} days left", cert.valid_days_left()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Timing
//!
//! Tokens are given a short settle delay before validation is first requested. Validation is
//! polled with capped exponential backoff, finalization at a fixed interval. Both loops are bounded
//! by deadlines from [`PollingConfig`].
//!
//! ## Use Staging For Development!
//!
//! Let's Encrypt enforces [rate limits] that are much more relaxed on the staging environment.
//! Runs use staging unless [`IssuanceRequest::production`] is set.
//!
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod dir;
mod error;
mod key;

pub mod acme;
pub mod client;
pub mod config;
pub mod hook;
pub mod issue;

#[cfg(test)]
mod test;

pub use crate::{
    acme::{
        api::{AuthorizationStatus, ChallengeStatus, OrderStatus},
        HttpDirectoryClient,
    },
    dir::DirectoryUrl,
    error::{Error, Result},
    issue::{
        IssuanceRequest, IssuedCertificate, Issuer, Phase, PollingConfig, RunState, RuntimeConfig,
    },
    key::{create_p256_key, AccountKey},
};
