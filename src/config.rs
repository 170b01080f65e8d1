//! YAML configuration file.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{Error, IssuanceRequest, PollingConfig, Result, RuntimeConfig};

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG_PATH: &str = ".acme-issue.yml";

/// Contents of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub domains: Vec<String>,
    pub common_name: String,
    pub account_email: String,

    /// Where the request private key is written.
    pub request_key: PathBuf,

    /// Where the certificate chain is written.
    pub certificate_key: PathBuf,

    pub challenges_relative_path: PathBuf,

    /// Run after a successful issuance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_callback_script: Option<PathBuf>,

    #[serde(default)]
    pub production: bool,

    #[serde(default)]
    pub polling: Polling,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domains: vec!["example.com".to_owned()],
            common_name: "Let's Encrypt".to_owned(),
            account_email: "test@account.com".to_owned(),
            request_key: PathBuf::from("request.pem"),
            certificate_key: PathBuf::from("certificate.pem"),
            challenges_relative_path: PathBuf::from("challenges"),
            success_callback_script: Some(PathBuf::from("deploy.sh")),
            production: false,
            polling: Polling::default(),
        }
    }
}

/// Timing knobs in whole seconds. A `null` timeout never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Polling {
    pub settle_delay: u64,
    pub initial_backoff: u64,
    pub max_backoff: u64,
    pub finalize_interval: u64,
    pub validation_timeout: Option<u64>,
    pub finalize_timeout: Option<u64>,
}

impl Default for Polling {
    fn default() -> Self {
        let defaults = PollingConfig::default();

        Self {
            settle_delay: defaults.settle_delay.as_secs(),
            initial_backoff: defaults.initial_backoff.as_secs(),
            max_backoff: defaults.max_backoff.as_secs(),
            finalize_interval: defaults.finalize_interval.as_secs(),
            validation_timeout: defaults.validation_timeout.map(|d| d.as_secs()),
            finalize_timeout: defaults.finalize_timeout.map(|d| d.as_secs()),
        }
    }
}

impl From<&Polling> for PollingConfig {
    fn from(polling: &Polling) -> Self {
        Self {
            settle_delay: Duration::from_secs(polling.settle_delay),
            initial_backoff: Duration::from_secs(polling.initial_backoff),
            max_backoff: Duration::from_secs(polling.max_backoff),
            finalize_interval: Duration::from_secs(polling.finalize_interval),
            validation_timeout: polling.validation_timeout.map(Duration::from_secs),
            finalize_timeout: polling.finalize_timeout.map(Duration::from_secs),
        }
    }
}

impl Config {
    /// Reads and validates the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path).map_err(Error::fs(path))?;

        let config = serde_yaml::from_str::<Self>(&yaml)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config =
            serde_yaml::from_str::<Self>(yaml).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|err| Error::Config(err.to_string()))
    }

    /// Checks everything a run relies on before one is started.
    pub fn validate(&self) -> Result<()> {
        self.issuance_request()?;

        if self.polling.initial_backoff == 0 {
            return Err(Error::Config("polling.initial_backoff must be positive".to_owned()));
        }

        if self.polling.max_backoff < self.polling.initial_backoff {
            return Err(Error::Config(
                "polling.max_backoff must not be below polling.initial_backoff".to_owned(),
            ));
        }

        Ok(())
    }

    pub fn issuance_request(&self) -> Result<IssuanceRequest> {
        IssuanceRequest::new(
            self.domains.iter().cloned(),
            self.account_email.as_str(),
            self.common_name.as_str(),
            self.production,
        )
    }

    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            challenges_dir: self.challenges_relative_path.clone(),
            certificate_path: self.certificate_key.clone(),
            request_key_path: self.request_key.clone(),
            polling: PollingConfig::from(&self.polling),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "
domains: [a.com, www.a.com]
common_name: a.com
account_email: ops@a.com
request_key: /etc/ssl/a.key
certificate_key: /etc/ssl/a.pem
challenges_relative_path: public/.well-known/acme-challenge
";

    #[test]
    fn defaults_survive_yaml() {
        let yaml = Config::default().to_yaml().unwrap();
        assert!(yaml.contains("challenges_relative_path: challenges"));
        assert_eq!(Config::from_yaml(&yaml).unwrap(), Config::default());
    }

    #[test]
    fn optional_keys_fall_back_to_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();

        assert!(!config.production);
        assert_eq!(config.success_callback_script, None);
        assert_eq!(config.runtime().polling, PollingConfig::default());

        let request = config.issuance_request().unwrap();
        assert_eq!(request.domains(), ["a.com", "www.a.com"]);
        assert_eq!(request.common_name(), "a.com");

        let runtime = config.runtime();
        assert_eq!(runtime.certificate_path, Path::new("/etc/ssl/a.pem"));
        assert_eq!(runtime.request_key_path, Path::new("/etc/ssl/a.key"));
    }

    #[test]
    fn null_timeout_is_unbounded() {
        let yaml = format!("{MINIMAL}polling:\n  validation_timeout: null\n  max_backoff: 60\n");
        let polling = Config::from_yaml(&yaml).unwrap().runtime().polling;

        assert_eq!(polling.validation_timeout, None);
        assert_eq!(polling.finalize_timeout, Some(Duration::from_secs(600)));
        assert_eq!(polling.max_backoff, Duration::from_secs(60));
        assert_eq!(polling.initial_backoff, Duration::from_secs(5));
    }

    #[test]
    fn missing_required_key() {
        let yaml = MINIMAL.replace("account_email: ops@a.com\n", "");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("account_email")), "{err}");
    }

    #[test]
    fn invalid_values() {
        let yaml = MINIMAL.replace("[a.com, www.a.com]", "[]");
        assert!(matches!(Config::from_yaml(&yaml), Err(Error::Config(_))));

        let yaml = format!("{MINIMAL}polling:\n  initial_backoff: 0\n");
        assert!(matches!(Config::from_yaml(&yaml), Err(Error::Config(_))));

        let yaml = format!("{MINIMAL}polling:\n  initial_backoff: 10\n  max_backoff: 5\n");
        assert!(matches!(Config::from_yaml(&yaml), Err(Error::Config(_))));

        let yaml = format!("{MINIMAL}colour: blue\n");
        assert!(matches!(Config::from_yaml(&yaml), Err(Error::Config(_))));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_PATH);

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, Error::Filesystem { path: p, .. } if p == path));

        fs::write(&path, MINIMAL).unwrap();
        assert_eq!(Config::load(&path).unwrap().domains, ["a.com", "www.a.com"]);
    }
}
