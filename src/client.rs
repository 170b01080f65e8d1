//! The contract an ACME directory client has to honor to drive an issuance run.
//!
//! [`HttpDirectoryClient`](crate::acme::HttpDirectoryClient) talks to a real CA. Anything else
//! implementing these traits (a scripted fake, a different transport) can be handed to the
//! [`Issuer`](crate::Issuer) instead.

#![allow(async_fn_in_trait)]

use crate::{
    acme::api::{self, AuthorizationStatus, ChallengeStatus, OrderStatus, Problem},
    AccountKey, Result,
};

/// Entry point of an ACME API: registers accounts.
pub trait AcmeDirectoryClient {
    type Account: AcmeAccount;

    /// Registers `account_key` with the directory at `directory_url`, agreeing to the terms of
    /// service and using `contact_email` as `mailto:` contact.
    async fn create_account(
        &self,
        directory_url: &str,
        account_key: AccountKey,
        contact_email: &str,
    ) -> Result<Self::Account>;
}

/// A registered account; every order-level operation goes through it.
pub trait AcmeAccount {
    /// Opens one order covering `domains`.
    async fn create_order(&self, domains: &[String]) -> Result<Order>;

    /// Fetches every authorization of `order`, in the order's listing order.
    async fn list_authorizations(&self, order: &Order) -> Result<Vec<Authorization>>;

    /// Selects the http-01 challenge of `authorization` and computes its file content.
    fn http_challenge(&self, authorization: &Authorization) -> Result<Challenge>;

    /// Asks the CA to fetch the token and validate the challenge.
    ///
    /// A CA rejecting this as malformed returns an error for which
    /// [`Error::is_malformed`](crate::Error::is_malformed) holds.
    async fn request_challenge_validation(&self, challenge: &Challenge) -> Result<()>;

    /// Refreshes `challenge` from the CA and returns its status.
    async fn poll_challenge_status(&self, challenge: &mut Challenge) -> Result<ChallengeStatus>;

    /// Submits the DER encoded CSR.
    async fn finalize_order(&self, order: &Order, csr_der: &[u8]) -> Result<()>;

    /// Refreshes `order` from the CA and returns its status.
    async fn poll_order_status(&self, order: &mut Order) -> Result<OrderStatus>;

    /// Downloads the issued certificate chain as PEM.
    async fn certificate(&self, order: &Order) -> Result<String>;
}

/// CA-assigned handle for one issuance attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub url: String,
    pub status: OrderStatus,
    pub domains: Vec<String>,
    pub authorizations: Vec<String>,
    pub finalize_url: String,
    pub certificate_url: Option<String>,
    pub error: Option<Problem>,
}

impl Order {
    pub(crate) fn from_api(url: String, api_order: api::Order) -> Self {
        let mut order = Order {
            url,
            status: OrderStatus::Pending,
            domains: Vec::new(),
            authorizations: Vec::new(),
            finalize_url: String::new(),
            certificate_url: None,
            error: None,
        };
        order.update(api_order);
        order
    }

    pub(crate) fn update(&mut self, api_order: api::Order) {
        self.status = api_order.status.unwrap_or_default();
        self.domains = api_order
            .identifiers
            .into_iter()
            .map(|id| id.value)
            .collect();
        self.authorizations = api_order.authorizations;
        self.finalize_url = api_order.finalize;
        self.certificate_url = api_order.certificate;
        self.error = api_order.error;
    }
}

/// Proof obligation for one domain of an [`Order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub url: String,
    pub api_auth: api::Authorization,
}

impl Authorization {
    pub fn domain(&self) -> &str {
        &self.api_auth.identifier.value
    }

    pub fn status(&self) -> AuthorizationStatus {
        self.api_auth.status
    }
}

/// An http-01 challenge together with the body that has to be served for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub domain: String,
    pub url: String,
    pub token: String,
    pub file_content: String,
    pub status: ChallengeStatus,
    pub error: Option<Problem>,
}

impl Challenge {
    /// Pending or already being processed by the CA.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.status,
            ChallengeStatus::Pending | ChallengeStatus::Processing
        )
    }

    pub fn is_invalid(&self) -> bool {
        self.status == ChallengeStatus::Invalid
    }
}
