//! Test rig: a scripted in-memory CA and a fake ACME HTTP server.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::Path,
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    acme::api::{self, AuthorizationStatus, Problem},
    client::{AcmeAccount, AcmeDirectoryClient, Authorization, Challenge, Order},
    issue::{ChallengePublisher, RunState},
    AccountKey, ChallengeStatus, Error, OrderStatus, Result,
};


pub use self::server::with_directory_server;

pub const CERT_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBszCCAVmgAwIBAgIUYm9ndXMgY2VydGlmaWNhdGUgZm9yIHRlc3Rz
-----END CERTIFICATE-----
";

/// Collaborator operations as seen by [`MockCa`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateAccount(String),
    CreateOrder,
    ListAuthorizations,
    RequestValidation(String),
    PollChallenge(String),
    Finalize,
    PollOrder,
    Certificate,
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<Call>,
    challenges: HashMap<String, VecDeque<ChallengeStatus>>,
    malformed: HashMap<String, usize>,
    unreachable: HashSet<String>,
    invalid_authorizations: HashSet<String>,
    order: VecDeque<OrderStatus>,
    fail_create_order: bool,
    csr: Option<Vec<u8>>,
    certificate: Option<String>,
}

/// In-memory CA acting as both directory client and account.
///
/// Unscripted challenges and orders report `valid` on their first poll. Clones share state.
#[derive(Debug, Clone)]
pub struct MockCa {
    domains: Vec<String>,
    script: Arc<Mutex<Script>>,
}

impl MockCa {
    pub fn new(domains: &[&str]) -> Self {
        Self {
            domains: domains.iter().map(|&d| d.to_owned()).collect(),
            script: Arc::default(),
        }
    }

    pub fn domains(&self) -> Vec<String> {
        self.domains.clone()
    }

    pub fn token(domain: &str) -> String {
        format!("tok_{}", domain.replace('.', "_"))
    }

    pub fn key_authorization(domain: &str) -> String {
        format!("{}.mock-thumbprint", Self::token(domain))
    }

    /// Statuses returned by successive polls of `domain`'s challenge.
    pub fn script_challenge(&self, domain: &str, statuses: &[ChallengeStatus]) {
        self.script
            .lock()
            .challenges
            .insert(domain.to_owned(), statuses.iter().copied().collect());
    }

    /// Rejects the next `times` validation requests for `domain` as malformed.
    pub fn reject_validation_as_malformed(&self, domain: &str, times: usize) {
        self.script.lock().malformed.insert(domain.to_owned(), times);
    }

    pub fn fail_validation_with_network_error(&self, domain: &str) {
        self.script.lock().unreachable.insert(domain.to_owned());
    }

    /// Lists `domain`'s authorization as already invalid.
    pub fn invalidate_authorization(&self, domain: &str) {
        self.script
            .lock()
            .invalid_authorizations
            .insert(domain.to_owned());
    }

    /// Statuses returned by successive order polls.
    pub fn script_order(&self, statuses: &[OrderStatus]) {
        self.script.lock().order = statuses.iter().copied().collect();
    }

    pub fn fail_create_order(&self) {
        self.script.lock().fail_create_order = true;
    }

    pub fn serve_certificate(&self, pem: &str) {
        self.script.lock().certificate = Some(pem.to_owned());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.script.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// DER of the last submitted CSR.
    pub fn finalized_csr(&self) -> Option<Vec<u8>> {
        self.script.lock().csr.clone()
    }

    /// Opens an order for all domains and publishes its challenges to `dir`.
    pub async fn published_state(&self, dir: &Path) -> RunState<MockCa> {
        let order = self.create_order(&self.domains).await.unwrap();
        let mut state = RunState::new(self.clone(), order, dir);
        ChallengePublisher
            .publish(&mut state, &self.domains)
            .await
            .unwrap();
        state
    }

    fn record(&self, call: Call) {
        self.script.lock().calls.push(call);
    }
}

impl AcmeDirectoryClient for MockCa {
    type Account = MockCa;

    async fn create_account(
        &self,
        directory_url: &str,
        _account_key: AccountKey,
        _contact_email: &str,
    ) -> Result<MockCa> {
        self.record(Call::CreateAccount(directory_url.to_owned()));
        Ok(self.clone())
    }
}

impl AcmeAccount for MockCa {
    async fn create_order(&self, domains: &[String]) -> Result<Order> {
        self.record(Call::CreateOrder);

        if self.script.lock().fail_create_order {
            return Err(Error::Network(eyre::eyre!("connection refused")));
        }

        Ok(Order {
            url: "mock://order/1".to_owned(),
            status: OrderStatus::Pending,
            domains: domains.to_vec(),
            authorizations: self
                .domains
                .iter()
                .map(|d| format!("mock://authz/{d}"))
                .collect(),
            finalize_url: "mock://order/1/finalize".to_owned(),
            certificate_url: None,
            error: None,
        })
    }

    async fn list_authorizations(&self, order: &Order) -> Result<Vec<Authorization>> {
        self.record(Call::ListAuthorizations);

        let script = self.script.lock();

        Ok(order
            .authorizations
            .iter()
            .map(|url| {
                let domain = url.trim_start_matches("mock://authz/");
                let invalid = script.invalid_authorizations.contains(domain);

                let (status, challenge_status, error) = if invalid {
                    (
                        AuthorizationStatus::Invalid,
                        ChallengeStatus::Invalid,
                        Some(Problem::new(
                            "urn:ietf:params:acme:error:unauthorized",
                            "authorization expired",
                        )),
                    )
                } else {
                    (AuthorizationStatus::Pending, ChallengeStatus::Pending, None)
                };

                Authorization {
                    url: url.clone(),
                    api_auth: api::Authorization {
                        identifier: api::Identifier::dns(domain),
                        status,
                        challenges: vec![api::Challenge {
                            _type: "http-01".to_owned(),
                            url: format!("mock://challenge/{domain}"),
                            status: challenge_status,
                            error,
                            token: Self::token(domain),
                        }],
                    },
                }
            })
            .collect())
    }

    fn http_challenge(&self, authorization: &Authorization) -> Result<Challenge> {
        let domain = authorization.domain();
        let challenge = authorization.api_auth.http_challenge().ok_or_else(|| {
            Error::MissingHttpChallenge {
                domain: domain.to_owned(),
            }
        })?;

        Ok(Challenge {
            domain: domain.to_owned(),
            url: challenge.url.clone(),
            token: challenge.token.clone(),
            file_content: Self::key_authorization(domain),
            status: challenge.status,
            error: None,
        })
    }

    async fn request_challenge_validation(&self, challenge: &Challenge) -> Result<()> {
        self.record(Call::RequestValidation(challenge.domain.clone()));

        let mut script = self.script.lock();

        if script.unreachable.contains(&challenge.domain) {
            return Err(Error::Network(eyre::eyre!("connection reset")));
        }

        if let Some(left) = script.malformed.get_mut(&challenge.domain) {
            if *left > 0 {
                *left -= 1;
                return Err(Error::Problem(Problem::new(
                    "urn:ietf:params:acme:error:malformed",
                    "token not yet visible",
                )));
            }
        }

        Ok(())
    }

    async fn poll_challenge_status(&self, challenge: &mut Challenge) -> Result<ChallengeStatus> {
        self.record(Call::PollChallenge(challenge.domain.clone()));

        let status = self
            .script
            .lock()
            .challenges
            .get_mut(&challenge.domain)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ChallengeStatus::Valid);

        challenge.status = status;
        if status == ChallengeStatus::Invalid {
            challenge.error = Some(Problem::new(
                "urn:ietf:params:acme:error:unauthorized",
                "invalid response from token URL",
            ));
        }

        Ok(status)
    }

    async fn finalize_order(&self, _order: &Order, csr_der: &[u8]) -> Result<()> {
        self.record(Call::Finalize);
        self.script.lock().csr = Some(csr_der.to_vec());
        Ok(())
    }

    async fn poll_order_status(&self, order: &mut Order) -> Result<OrderStatus> {
        self.record(Call::PollOrder);

        let status = self
            .script
            .lock()
            .order
            .pop_front()
            .unwrap_or(OrderStatus::Valid);

        order.status = status;
        match status {
            OrderStatus::Valid => {
                order.certificate_url = Some("mock://order/1/certificate".to_owned());
            }
            OrderStatus::Invalid => {
                order.error = Some(Problem::new(
                    "urn:ietf:params:acme:error:badCSR",
                    "CSR rejected",
                ));
            }
            _ => {}
        }

        Ok(status)
    }

    async fn certificate(&self, _order: &Order) -> Result<String> {
        self.record(Call::Certificate);

        Ok(self
            .script
            .lock()
            .certificate
            .clone()
            .unwrap_or_else(|| CERT_PEM.to_owned()))
    }
}
