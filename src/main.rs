use std::{fs, path::PathBuf};

use acme_issue::{
    config::{Config, DEFAULT_CONFIG_PATH},
    hook, HttpDirectoryClient, Issuer,
};
use clap::{Parser, Subcommand};
use eyre::{bail, WrapErr as _};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a config file with default values to fill in.
    Init {
        /// Path of the config file.
        #[arg(long, env = "ACME_ISSUE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },

    /// Issue a certificate for the configured domains.
    Issue {
        /// Path of the config file.
        #[arg(long, env = "ACME_ISSUE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Use the production CA regardless of the config file.
        #[arg(long)]
        production: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    match Args::parse().command {
        Command::Init { config, force } => init(config, force),
        Command::Issue { config, production } => {
            tokio::select! {
                res = issue(config, production) => res,
                res = tokio::signal::ctrl_c() => {
                    res.wrap_err("failed to listen for Ctrl-C")?;
                    bail!("interrupted, run cancelled");
                }
            }
        }
    }
}

fn init(path: PathBuf, force: bool) -> eyre::Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }

    fs::write(&path, Config::default().to_yaml()?)
        .wrap_err_with(|| format!("failed to write {}", path.display()))?;
    log::info!("Wrote default config to {}", path.display());

    Ok(())
}

async fn issue(path: PathBuf, production: bool) -> eyre::Result<()> {
    let mut config = Config::load(&path)?;

    // can only switch production on
    config.production |= production;

    let request = config.issuance_request()?;
    let runtime = config.runtime();

    if !request.production() {
        log::warn!("Using the staging CA, the certificate will not be trusted");
    }

    let cert = Issuer::new(HttpDirectoryClient::new()?)
        .run(&request, &runtime)
        .await?;

    match cert.valid_days_left() {
        Ok(days) => log::info!("Certificate valid for {days} more day(s)"),
        Err(err) => log::warn!("Could not read certificate validity: {err}"),
    }

    if let Some(script) = &config.success_callback_script {
        hook::run_success_script(script, &cert).await?;
    }

    Ok(())
}
