//! ACME directory client over HTTP.
//!
//! Implements [`AcmeDirectoryClient`] against an [RFC 8555] server such as Let's Encrypt.
//!
//! [RFC 8555]: https://datatracker.ietf.org/doc/html/rfc8555

use std::{sync::Arc, time::Duration};

use base64::prelude::*;
use reqwest::header;

use crate::{
    client::{AcmeAccount, AcmeDirectoryClient, Authorization, Challenge, Order},
    AccountKey, ChallengeStatus, Error, OrderStatus, Result,
};

pub mod api;
pub(crate) mod jws;
mod transport;

use self::transport::{expect_header, expect_success, NoncePool, Transport};

const PEM_CHAIN: &str = "application/pem-certificate-chain";

/// Client for ACME directories reachable over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpDirectoryClient {
    http: reqwest::Client,
}

impl HttpDirectoryClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http })
    }

    async fn fetch_directory(&self, url: &str) -> Result<api::Directory> {
        let res = expect_success(self.http.get(url).send().await?).await?;
        Ok(res.json().await?)
    }
}

impl AcmeDirectoryClient for HttpDirectoryClient {
    type Account = HttpAccount;

    async fn create_account(
        &self,
        directory_url: &str,
        account_key: AccountKey,
        contact_email: &str,
    ) -> Result<HttpAccount> {
        let directory = self.fetch_directory(directory_url).await?;

        if let Some(meta) = &directory.meta {
            if meta.external_account_required == Some(true) {
                log::warn!(
                    "Directory requires external account binding, registration will likely fail"
                );
            }
        }

        let nonces = Arc::new(NoncePool::new(&directory.new_nonce));
        let mut transport = Transport::new(self.http.clone(), nonces, account_key);

        let acc = api::Account {
            contact: Some(vec![format!("mailto:{contact_email}")]),
            terms_of_service_agreed: Some(true),
            ..Default::default()
        };

        let res = transport.post_jwk(&directory.new_account, &acc).await?;
        let kid = expect_header(&res, "location")?;
        log::debug!("Key ID is: {kid}");
        let api_account = res.json::<api::Account>().await?;
        log::debug!("Account status: {:?}", api_account.status);

        // fill in the server returned key ID
        transport.set_key_id(kid);

        Ok(HttpAccount {
            transport,
            directory,
        })
    }
}

/// Account registered through [`HttpDirectoryClient`].
#[derive(Debug, Clone)]
pub struct HttpAccount {
    transport: Transport,
    directory: api::Directory,
}

impl AcmeAccount for HttpAccount {
    async fn create_order(&self, domains: &[String]) -> Result<Order> {
        let new_order = api::Order::from_domains(domains);

        let res = self
            .transport
            .post_kid(&self.directory.new_order, &new_order)
            .await?;
        let order_url = expect_header(&res, "location")?;
        let api_order = res.json::<api::Order>().await?;

        Ok(Order::from_api(order_url, api_order))
    }

    async fn list_authorizations(&self, order: &Order) -> Result<Vec<Authorization>> {
        let mut result = Vec::with_capacity(order.authorizations.len());

        for auth_url in &order.authorizations {
            let res = self.transport.post_as_get(auth_url).await?;
            let api_auth = res.json::<api::Authorization>().await?;

            result.push(Authorization {
                url: auth_url.clone(),
                api_auth,
            });
        }

        Ok(result)
    }

    fn http_challenge(&self, authorization: &Authorization) -> Result<Challenge> {
        let api_challenge = authorization.api_auth.http_challenge().ok_or_else(|| {
            Error::MissingHttpChallenge {
                domain: authorization.domain().to_owned(),
            }
        })?;

        Ok(Challenge {
            domain: authorization.domain().to_owned(),
            url: api_challenge.url.clone(),
            token: api_challenge.token.clone(),
            file_content: self.transport.key().key_authorization(&api_challenge.token)?,
            status: api_challenge.status,
            error: api_challenge.error.clone(),
        })
    }

    async fn request_challenge_validation(&self, challenge: &Challenge) -> Result<()> {
        let res = self
            .transport
            .post_kid(&challenge.url, &api::EmptyObject)
            .await?;

        let api_challenge = res.json::<api::Challenge>().await?;
        log::debug!(
            "Validation of {} requested, challenge is {:?}",
            challenge.domain,
            api_challenge.status
        );

        Ok(())
    }

    async fn poll_challenge_status(&self, challenge: &mut Challenge) -> Result<ChallengeStatus> {
        let res = self.transport.post_as_get(&challenge.url).await?;
        let api_challenge = res.json::<api::Challenge>().await?;

        challenge.status = api_challenge.status;
        challenge.error = api_challenge.error;

        Ok(challenge.status)
    }

    async fn finalize_order(&self, order: &Order, csr_der: &[u8]) -> Result<()> {
        let finalize = api::Finalize {
            csr: BASE64_URL_SAFE_NO_PAD.encode(csr_der),
        };

        // an unacceptable CSR comes back as a 4xx problem
        self.transport.post_kid(&order.finalize_url, &finalize).await?;

        Ok(())
    }

    async fn poll_order_status(&self, order: &mut Order) -> Result<OrderStatus> {
        let res = self.transport.post_as_get(&order.url).await?;
        let api_order = res.json::<api::Order>().await?;

        order.update(api_order);

        Ok(order.status)
    }

    async fn certificate(&self, order: &Order) -> Result<String> {
        let url = order.certificate_url.as_deref().ok_or_else(|| {
            Error::Problem(api::Problem::new(
                "missingCertificateUrl",
                "order has no certificate URL",
            ))
        })?;

        let res = self.transport.post_as_get_accept(url, PEM_CHAIN).await?;

        match res.headers().get(header::CONTENT_TYPE) {
            Some(ct) if ct.as_bytes().starts_with(PEM_CHAIN.as_bytes()) => {}
            ct => log::debug!("Certificate served as {ct:?}"),
        }

        Ok(res.text().await?)
    }
}
