use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use reqwest::{header, Response};
use serde::Serialize;

use crate::{
    acme::{
        api::{self, Problem},
        jws::{self, Jwk, ProtectedHeader},
    },
    AccountKey, Error, Result,
};

/// Attempts per request when the server keeps rejecting nonces.
const MAX_ATTEMPTS: usize = 5;

/// Cached nonces kept from responses.
const NONCE_POOL_SIZE: usize = 10;

const JOSE_JSON: &str = "application/jose+json";
const JSON: &str = "application/json";
const PROBLEM_JSON: &str = "application/problem+json";

/// JWS payload and nonce handling for requests to the API.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `post_jwk()` against the newAccount url
/// 3. `set_key_id()` from the returned `Location` header
/// 4. `post_kid()` / `post_as_get()` for all calls after that
#[derive(Clone, Debug)]
pub(crate) struct Transport {
    http: reqwest::Client,
    key: AccountKey,
    key_id: Option<String>,
    nonces: Arc<NoncePool>,
}

impl Transport {
    pub(crate) fn new(http: reqwest::Client, nonces: Arc<NoncePool>, key: AccountKey) -> Self {
        Transport {
            http,
            key,
            key_id: None,
            nonces,
        }
    }

    pub(crate) fn set_key_id(&mut self, kid: String) {
        self.key_id = Some(kid);
    }

    pub(crate) fn key(&self) -> &AccountKey {
        &self.key
    }

    /// Make call using the full JWK.
    ///
    /// Only needed for the newAccount request.
    pub(crate) async fn post_jwk<T>(&self, url: &str, payload: &T) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        let jwk = Jwk::try_from(&self.key)?;
        self.post(url, payload, JSON, |nonce| {
            ProtectedHeader::with_jwk(jwk.clone(), url, nonce)
        })
        .await
    }

    /// Make call using the account URL as key ID.
    pub(crate) async fn post_kid<T>(&self, url: &str, payload: &T) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        self.post_kid_accept(url, payload, JSON).await
    }

    /// Fetch a resource, the specification calls this "POST-as-GET".
    pub(crate) async fn post_as_get(&self, url: &str) -> Result<Response> {
        self.post_kid(url, &api::EmptyString).await
    }

    /// POST-as-GET asking for a specific media type.
    pub(crate) async fn post_as_get_accept(&self, url: &str, accept: &str) -> Result<Response> {
        self.post_kid_accept(url, &api::EmptyString, accept).await
    }

    async fn post_kid_accept<T>(&self, url: &str, payload: &T, accept: &str) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        let kid = self
            .key_id
            .as_deref()
            .ok_or_else(|| Error::Key("account has no key ID yet".to_owned()))?;

        self.post(url, payload, accept, |nonce| {
            ProtectedHeader::with_kid(kid, url, nonce)
        })
        .await
    }

    async fn post<T, F>(
        &self,
        url: &str,
        payload: &T,
        accept: &str,
        make_header: F,
    ) -> Result<Response>
    where
        T: Serialize + ?Sized,
        F: Fn(String) -> ProtectedHeader,
    {
        let mut attempt = 1;

        // The ACME API may at any point invalidate all nonces.
        loop {
            let nonce = self.nonces.get_nonce(&self.http).await?;
            let body = jws::sign(&make_header(nonce), &self.key, payload)?;

            log::debug!("Call endpoint: {url}");

            let res = self
                .http
                .post(url)
                .header(header::CONTENT_TYPE, JOSE_JSON)
                .header(header::ACCEPT, accept)
                .body(body)
                .send()
                .await?;

            // Regardless of the request being a success or not, there might be a nonce in the
            // response.
            self.nonces.extract_nonce(&res);

            match expect_success(res).await {
                Err(Error::Problem(problem))
                    if attempt < MAX_ATTEMPTS
                        && (problem.is_bad_nonce() || problem.is_jws_verification_error()) =>
                {
                    log::debug!("Retrying on: {problem}");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Shared pool of nonces.
#[derive(Default, Debug)]
pub(crate) struct NoncePool {
    nonce_url: String,
    pool: Mutex<VecDeque<String>>,
}

impl NoncePool {
    pub(crate) fn new(nonce_url: &str) -> Self {
        NoncePool {
            nonce_url: nonce_url.to_owned(),
            ..Default::default()
        }
    }

    fn extract_nonce(&self, res: &Response) {
        let Some(nonce) = replay_nonce(res) else {
            return;
        };

        log::trace!("Extracting new nonce");

        let mut pool = self.pool.lock();
        pool.push_back(nonce);

        if pool.len() > NONCE_POOL_SIZE {
            pool.pop_front();
        }
    }

    async fn get_nonce(&self, http: &reqwest::Client) -> Result<String> {
        if let Some(nonce) = self.pool.lock().pop_front() {
            log::trace!("Use previous nonce");
            return Ok(nonce);
        }

        log::debug!("Request new nonce");
        let res = expect_success(http.head(&self.nonce_url).send().await?).await?;

        replay_nonce(&res).ok_or_else(|| missing_header("replay-nonce"))
    }
}

/// Nonces must be base64url, see [RFC 8555 §6.5.1].
///
/// [RFC 8555 §6.5.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.5.1
fn replay_nonce(res: &Response) -> Option<String> {
    let nonce = res.headers().get("replay-nonce")?.to_str().ok()?;

    let is_base64url = !nonce.is_empty()
        && nonce
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    is_base64url.then(|| nonce.to_owned())
}

/// Turns non-2xx responses into a [`Problem`].
pub(crate) async fn expect_success(res: Response) -> Result<Response> {
    let status = res.status();

    if status.is_success() {
        return Ok(res);
    }

    let is_problem = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .is_some_and(|ct| ct.starts_with(PROBLEM_JSON));

    // letsencrypt sometimes closes the TLS abruptly, keep whatever body we got
    let body = res.text().await.unwrap_or_default();

    let problem = if is_problem {
        serde_json::from_str(&body).unwrap_or_else(|err| Problem {
            _type: "problemJsonFail".to_owned(),
            detail: Some(format!(
                "Failed to deserialize application/problem+json ({err}) body: {body}"
            )),
            subproblems: None,
        })
    } else {
        Problem {
            _type: "httpReqError".to_owned(),
            detail: Some(format!("{status} body: {body}")),
            subproblems: None,
        }
    };

    Err(Error::Problem(problem))
}

pub(crate) fn expect_header(res: &Response, name: &str) -> Result<String> {
    res.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
        .ok_or_else(|| missing_header(name))
}

fn missing_header(name: &str) -> Error {
    Error::Problem(Problem {
        _type: format!("Missing header: {name}"),
        detail: None,
        subproblems: None,
    })
}
