//! Post-issuance script.

use std::path::Path;

use tokio::process::Command;

use crate::{issue::expand_path, Error, IssuedCertificate, Result};

/// Runs `script` after a successful issuance, e.g. to reload a web server.
///
/// The script sees the written paths in `ACME_ISSUE_CERTIFICATE` and `ACME_ISSUE_PRIVATE_KEY`. A
/// script that does not exist is skipped with a warning.
pub async fn run_success_script(script: &Path, cert: &IssuedCertificate) -> Result<()> {
    let script = expand_path(script)?;

    if !script.exists() {
        log::warn!("Success script {} not found, skipping", script.display());
        return Ok(());
    }

    log::info!("Running success script {}", script.display());

    let status = Command::new(&script)
        .env("ACME_ISSUE_CERTIFICATE", cert.certificate_path())
        .env("ACME_ISSUE_PRIVATE_KEY", cert.private_key_path())
        .status()
        .await
        .map_err(|err| Error::Script {
            path: script.clone(),
            reason: err.to_string(),
        })?;

    if !status.success() {
        return Err(Error::Script {
            path: script,
            reason: format!("exited with {status}"),
        });
    }

    Ok(())
}
