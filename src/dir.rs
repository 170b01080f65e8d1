const LETSENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Enumeration of known ACME API directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt directory.
    ///
    /// Not appropriate for testing / development.
    LetsEncrypt,

    /// The staging Let's Encrypt directory.
    ///
    /// Use for testing and development. Doesn't issue "valid" certificates. The root signing
    /// certificate is not supposed to be in any trust chains.
    LetsEncryptStaging,

    /// Provide an arbitrary directory URL to connect to.
    Other(&'a str),
}

impl DirectoryUrl<'static> {
    /// Production directory when `production` is set, staging otherwise.
    ///
    /// Nothing else takes part in the choice.
    pub fn for_mode(production: bool) -> Self {
        if production {
            DirectoryUrl::LetsEncrypt
        } else {
            DirectoryUrl::LetsEncryptStaging
        }
    }
}

impl<'a> DirectoryUrl<'a> {
    pub fn as_str(&self) -> &'a str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT_URL,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING_URL,
            DirectoryUrl::Other(url) => *url,
        }
    }
}
