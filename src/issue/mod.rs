//! One unattended issuance run.
//!
//! [`Issuer::run`] registers a throwaway account, opens an order, publishes http-01 tokens,
//! waits for validation, finalizes with a fresh request key and writes the certificate chain and
//! the key to disk. Each step only starts after the previous one succeeded; any error ends the
//! run.

use std::{
    collections::BTreeSet,
    io::{BufReader, Cursor},
    path::{Path, PathBuf},
};

use der::Decode as _;
use zeroize::Zeroizing;

use crate::{
    acme::api::Problem,
    client::{AcmeAccount, AcmeDirectoryClient, Challenge, Order},
    create_p256_key, AccountKey, DirectoryUrl, Error, Result,
};

mod finalize;
mod poll;
mod publish;
mod write;

pub use self::{
    finalize::{create_csr, OrderFinalizer},
    poll::{Backoff, Deadline, PollingConfig, ValidationPoller},
    publish::ChallengePublisher,
    write::{expand_path, CertificateWriter},
};

/// What to issue. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRequest {
    domains: Vec<String>,
    account_email: String,
    common_name: String,
    production: bool,
}

impl IssuanceRequest {
    /// Validates and bundles the inputs of a run.
    ///
    /// Domains are trimmed. There has to be at least one and no two may be equal, ignoring case.
    pub fn new(
        domains: impl IntoIterator<Item = impl Into<String>>,
        account_email: impl Into<String>,
        common_name: impl Into<String>,
        production: bool,
    ) -> Result<Self> {
        let domains = domains
            .into_iter()
            .map(|domain| domain.into().trim().to_owned())
            .collect::<Vec<_>>();

        if domains.is_empty() {
            return Err(Error::Config("at least one domain is required".to_owned()));
        }

        let mut seen = BTreeSet::new();
        for domain in &domains {
            if domain.is_empty() {
                return Err(Error::Config("domains must not be empty".to_owned()));
            }

            if !seen.insert(domain.to_ascii_lowercase()) {
                return Err(Error::Config(format!("domain {domain} is listed twice")));
            }
        }

        let account_email = account_email.into().trim().to_owned();
        if account_email.is_empty() {
            return Err(Error::Config("account email is required".to_owned()));
        }

        let common_name = common_name.into().trim().to_owned();
        if common_name.is_empty() {
            return Err(Error::Config("common name is required".to_owned()));
        }

        Ok(Self {
            domains,
            account_email,
            common_name,
            production,
        })
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn account_email(&self) -> &str {
        &self.account_email
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// Production CA when set, staging otherwise.
    pub fn production(&self) -> bool {
        self.production
    }
}

/// Where a run reads and writes, and how it paces itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Served by a web server at `/.well-known/acme-challenge/`.
    pub challenges_dir: PathBuf,
    pub certificate_path: PathBuf,
    pub request_key_path: PathBuf,
    pub polling: PollingConfig,
}

/// Progress of a run. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Account registered and order opened.
    Ordered,
    /// Tokens written to the challenges directory.
    Published,
    /// Every challenge reported valid.
    Validated,
    /// Order valid after submitting the CSR.
    Finalized,
    /// Certificate and request key on disk.
    Written,
}

/// Mutable state of one run, handed from step to step.
#[derive(Debug)]
pub struct RunState<A> {
    phase: Phase,
    pub(crate) account: A,
    pub(crate) order: Order,
    pub(crate) challenges_dir: PathBuf,
    pub(crate) challenges: Vec<Challenge>,
}

impl<A> RunState<A> {
    pub fn new(account: A, order: Order, challenges_dir: impl Into<PathBuf>) -> Self {
        Self {
            phase: Phase::Ordered,
            account,
            order,
            challenges_dir: challenges_dir.into(),
            challenges: Vec::new(),
        }
    }

    pub(crate) fn advance(&mut self, phase: Phase) {
        debug_assert!(phase > self.phase, "{:?} -> {phase:?}", self.phase);
        log::info!("Run state: {:?} -> {phase:?}", self.phase);
        self.phase = phase;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn account(&self) -> &A {
        &self.account
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn challenges_dir(&self) -> &Path {
        &self.challenges_dir
    }

    pub fn challenges(&self) -> &[Challenge] {
        &self.challenges
    }
}

/// Issued certificate chain and request key, as written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    certificate: String,
    private_key_pem: Zeroizing<String>,
    certificate_path: PathBuf,
    private_key_path: PathBuf,
}

impl IssuedCertificate {
    /// The issued certificate chain in PEM format.
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// The request private key in PEM format.
    pub fn private_key(&self) -> &str {
        &self.private_key_pem
    }

    pub fn certificate_path(&self) -> &Path {
        &self.certificate_path
    }

    pub fn private_key_path(&self) -> &Path {
        &self.private_key_path
    }

    /// The issued certificate chain in DER format.
    pub fn certificate_chain(&self) -> Result<Vec<Vec<u8>>> {
        parse_chain(&self.certificate)
    }

    /// Inspect the certificate to count the number of (whole) valid days left.
    ///
    /// It's up to the ACME API provider to decide how long an issued certificate is valid.
    /// Let's Encrypt sets the validity to 90 days. This function reports 89 days for newly
    /// issued cert, since it counts _whole_ days.
    ///
    /// It is possible to get negative days for an expired certificate.
    pub fn valid_days_left(&self) -> Result<i64> {
        let cert_chain = self.certificate_chain()?;
        let cert_ee = cert_chain
            .first() // EE cert is first
            .ok_or_else(empty_chain)?;

        let cert = x509_cert::Certificate::from_der(cert_ee).map_err(bad_chain)?;

        let not_after = cert.tbs_certificate.validity.not_after.to_date_time();
        // X.509 validity times are UTC
        let not_after = time::PrimitiveDateTime::try_from(not_after)
            .map_err(bad_chain)?
            .assume_utc();

        let diff = not_after - time::OffsetDateTime::now_utc();

        Ok(diff.whole_days())
    }
}

fn parse_chain(pem: &str) -> Result<Vec<Vec<u8>>> {
    let mut rdr = BufReader::new(Cursor::new(pem));

    rustls_pemfile::certs(&mut rdr)
        .map(|res| res.map(|cert| cert.to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(bad_chain)
}

fn bad_chain(err: impl std::fmt::Display) -> Error {
    Error::Problem(Problem::new("badCertificateChain", &err.to_string()))
}

fn empty_chain() -> Error {
    Error::Problem(Problem::new(
        "emptyCertificateChain",
        "no certificates in downloaded chain",
    ))
}

/// Runs issuances against a CA reached through `C`.
#[derive(Debug, Clone)]
pub struct Issuer<C> {
    client: C,
    directory_url: Option<String>,
}

impl<C: AcmeDirectoryClient> Issuer<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            directory_url: None,
        }
    }

    /// Talks to the directory at `url` instead of picking Let's Encrypt production or staging.
    pub fn with_directory_url(mut self, url: impl Into<String>) -> Self {
        self.directory_url = Some(url.into());
        self
    }

    /// Runs one issuance from account registration to written files.
    ///
    /// Nothing is retried at this level and nothing is cleaned up on failure; published tokens
    /// stay in the challenges directory until the next run resets it.
    pub async fn run(
        &self,
        request: &IssuanceRequest,
        config: &RuntimeConfig,
    ) -> Result<IssuedCertificate> {
        let directory_url = match &self.directory_url {
            Some(url) => DirectoryUrl::Other(url),
            None => DirectoryUrl::for_mode(request.production()),
        };
        log::info!("Using ACME directory {}", directory_url.as_str());

        let account = self
            .client
            .create_account(
                directory_url.as_str(),
                AccountKey::generate(),
                request.account_email(),
            )
            .await?;
        log::info!("Registered account for {}", request.account_email());

        let order = account.create_order(request.domains()).await?;
        log::info!("Opened order for {}", request.domains().join(", "));

        let mut state = RunState::new(account, order, expand_path(&config.challenges_dir)?);
        let polling = &config.polling;

        ChallengePublisher.publish(&mut state, request.domains()).await?;

        // tokens may take a moment to become visible to the CA; slower paths show up as
        // malformed rejections, which the poller retries
        if !polling.settle_delay.is_zero() {
            log::debug!("Waiting {:?} for tokens to settle", polling.settle_delay);
            tokio::time::sleep(polling.settle_delay).await;
        }

        let deadline = Deadline::after(polling.validation_timeout);
        ValidationPoller::new(polling)
            .await_valid(&mut state, &deadline)
            .await?;

        let request_key = create_p256_key();
        let deadline = Deadline::after(polling.finalize_timeout);
        let private_key_pem = OrderFinalizer::new(polling)
            .finalize(
                &mut state,
                &request_key,
                request.domains(),
                request.common_name(),
                &deadline,
            )
            .await?;

        let certificate = state.account.certificate(&state.order).await?;
        if parse_chain(&certificate)?.is_empty() {
            return Err(empty_chain());
        }
        log::info!("Downloaded certificate");

        // key first, a new chain must never sit next to a stale key
        let writer = CertificateWriter;
        let private_key_path = writer.write_private(&private_key_pem, &config.request_key_path)?;
        let certificate_path = writer.write(&certificate, &config.certificate_path)?;
        state.advance(Phase::Written);

        Ok(IssuedCertificate {
            certificate,
            private_key_pem,
            certificate_path,
            private_key_path,
        })
    }
}
