use std::{
    env, fs,
    io::Write as _,
    path::{Path, PathBuf},
};

use crate::{Error, Result};

/// Persists issued PEM material.
#[derive(Debug, Default)]
pub struct CertificateWriter;

impl CertificateWriter {
    /// Writes `content` verbatim to `path`, replacing any existing file.
    ///
    /// Returns the absolute path that was written.
    pub fn write(&self, content: &str, path: &Path) -> Result<PathBuf> {
        let path = expand_path(path)?;
        fs::write(&path, content).map_err(Error::fs(&path))?;
        log::info!("Wrote {}", path.display());
        Ok(path)
    }

    /// Like [`write`](Self::write), but the file is only readable by its owner on Unix.
    pub fn write_private(&self, content: &str, path: &Path) -> Result<PathBuf> {
        let path = expand_path(path)?;

        let mut opts = fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            opts.mode(0o600);
        }

        let mut file = opts.open(&path).map_err(Error::fs(&path))?;

        // mode only applies to new files
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(Error::fs(&path))?;
        }

        file.write_all(content.as_bytes()).map_err(Error::fs(&path))?;
        log::info!("Wrote {}", path.display());

        Ok(path)
    }
}

/// Expands a leading `~` to the home directory and resolves relative paths against the current
/// directory.
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => {
            let home = env::var_os("HOME").ok_or_else(|| {
                Error::Config(format!(
                    "cannot expand {}: HOME is not set",
                    path.display()
                ))
            })?;
            PathBuf::from(home).join(rest)
        }
        Err(_) => path.to_owned(),
    };

    if expanded.is_absolute() {
        return Ok(expanded);
    }

    let cwd = env::current_dir().map_err(Error::fs("."))?;
    Ok(cwd.join(expanded))
}
