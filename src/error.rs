use std::{io, path::PathBuf, time::Duration};

use crate::{acme::api::Problem, OrderStatus};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can end an issuance run.
///
/// Only [`Error::is_malformed`] problems are tolerated, and only while requesting challenge
/// validation. Every other variant aborts the run where it happens.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to reach ACME server: {0:#}")]
    Network(eyre::Report),

    #[error("ACME server reported a problem: {0}")]
    Problem(Problem),

    #[error("filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no http-01 challenge offered for {domain}")]
    MissingHttpChallenge { domain: String },

    #[error("authorizations {authorized:?} do not match requested domains {requested:?}")]
    AuthorizationMismatch {
        requested: Vec<String>,
        authorized: Vec<String>,
    },

    #[error("challenge for {domain} is invalid{}", display_problem(.problem))]
    ChallengeInvalid {
        domain: String,
        problem: Option<Problem>,
    },

    #[error("challenges still pending after {}s: {pending:?}", .waited.as_secs())]
    ValidationStalled {
        pending: Vec<String>,
        waited: Duration,
    },

    #[error("order is invalid{}", display_problem(.problem))]
    OrderInvalid { problem: Option<Problem> },

    #[error("order left processing in unexpected status {0:?}")]
    UnexpectedOrderStatus(OrderStatus),

    #[error("order still processing after {}s", .waited.as_secs())]
    FinalizationStalled { waited: Duration },

    #[error("key error: {0}")]
    Key(String),

    #[error("success script {} failed: {reason}", .path.display())]
    Script { path: PathBuf, reason: String },
}

impl Error {
    /// Returns true if the ACME server rejected the request as malformed.
    ///
    /// Seen when a challenge is submitted before its token can be fetched.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::Problem(problem) if problem.is_malformed())
    }

    pub(crate) fn fs(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Error {
        let path = path.into();
        move |source| Error::Filesystem { path, source }
    }
}

impl From<Problem> for Error {
    fn from(problem: Problem) -> Self {
        Error::Problem(problem)
    }
}

impl From<eyre::Report> for Error {
    fn from(err: eyre::Report) -> Self {
        // keep CA problems distinguishable when they travelled through eyre
        match err.downcast::<Problem>() {
            Ok(problem) => Error::Problem(problem),
            Err(err) => Error::Network(err),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(eyre::Report::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Network(eyre::Report::new(err).wrap_err("unexpected response body"))
    }
}

fn display_problem(problem: &Option<Problem>) -> String {
    match problem {
        Some(problem) => format!(": {problem}"),
        None => String::new(),
    }
}
