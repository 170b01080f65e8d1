use std::{collections::BTreeSet, fs, path::Path};

use crate::{
    client::AcmeAccount,
    issue::{Phase, RunState},
    AuthorizationStatus, Error, Result,
};

/// Writes http-01 tokens where a web server picks them up.
#[derive(Debug, Default)]
pub struct ChallengePublisher;

impl ChallengePublisher {
    /// Empties the challenges directory, then writes one `<token>` file per authorization of
    /// the order, recording the challenges in `state`.
    ///
    /// The authorizations have to cover exactly `domains`. An authorization the CA already
    /// declared invalid fails the run before any token is written.
    pub async fn publish<A: AcmeAccount>(
        &self,
        state: &mut RunState<A>,
        domains: &[String],
    ) -> Result<()> {
        reset_dir(&state.challenges_dir)?;

        let authorizations = state.account.list_authorizations(&state.order).await?;

        let requested = domains
            .iter()
            .map(|d| d.to_ascii_lowercase())
            .collect::<BTreeSet<_>>();
        let authorized = authorizations
            .iter()
            .map(|a| a.domain().to_ascii_lowercase())
            .collect::<BTreeSet<_>>();

        if authorizations.len() != domains.len() || requested != authorized {
            return Err(Error::AuthorizationMismatch {
                requested: domains.to_vec(),
                authorized: authorizations.iter().map(|a| a.domain().to_owned()).collect(),
            });
        }

        if let Some(invalid) = authorizations
            .iter()
            .find(|a| a.status() == AuthorizationStatus::Invalid)
        {
            return Err(Error::ChallengeInvalid {
                domain: invalid.domain().to_owned(),
                problem: invalid
                    .api_auth
                    .http_challenge()
                    .and_then(|c| c.error.clone()),
            });
        }

        for authorization in &authorizations {
            let challenge = state.account.http_challenge(authorization)?;

            let token_path = state.challenges_dir.join(token_file_name(&challenge.token)?);
            fs::write(&token_path, &challenge.file_content).map_err(Error::fs(&token_path))?;
            log::debug!("Wrote challenge token for {}", challenge.domain);

            state.challenges.push(challenge);
        }

        log::info!(
            "Published {} challenge(s) to {}",
            state.challenges.len(),
            state.challenges_dir.display()
        );
        state.advance(Phase::Published);

        Ok(())
    }
}

/// Creates `dir` if needed and removes everything inside it.
fn reset_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(Error::fs(dir))?;

    for entry in fs::read_dir(dir).map_err(Error::fs(dir))? {
        let path = entry.map_err(Error::fs(dir))?.path();

        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(Error::fs(&path))?;
        } else {
            fs::remove_file(&path).map_err(Error::fs(&path))?;
        }
    }

    Ok(())
}

/// Tokens are base64url, anything else must not escape the challenges directory.
fn token_file_name(token: &str) -> Result<&str> {
    let is_base64url = !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if is_base64url {
        Ok(token)
    } else {
        Err(Error::Problem(crate::acme::api::Problem::new(
            "invalidToken",
            &format!("challenge token {token:?} is not base64url"),
        )))
    }
}
