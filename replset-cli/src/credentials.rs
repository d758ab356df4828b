//! Credential resolution.
//!
//! Explicit credentials always win. When neither a username nor a password is given, the
//! `[client]` section of an INI style credentials file is consulted:
//!
//! ```ini
//! [client]
//! user = admin
//! pass = secret
//! ```
//!
//! Only a subset of INI is understood. Comments must take up a whole line, and indented
//! continuation lines are not joined onto the previous value: a continuation line without a
//! `=` or `:` makes the document invalid, and one with a delimiter is read as its own key.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use replset_core::Credentials;

/// The name of the credentials file looked up in the home directory.
pub const CREDENTIALS_FILE_NAME: &str = ".mongodb.cnf";
const CLIENT_SECTION: &str = "client";

/// The default location of the credentials file, `~/.mongodb.cnf`.
pub fn default_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(CREDENTIALS_FILE_NAME))
}

/// Resolve the credentials to authenticate with.
///
/// Empty values are treated as absent. When only one of username & password is given, no
/// credentials are resolved and the credentials file is not consulted.
pub fn resolve(username: Option<String>, password: Option<String>, file: Option<&Path>) -> Option<Credentials> {
    let username = username.filter(|val| !val.is_empty());
    let password = password.filter(|val| !val.is_empty());
    match (username, password) {
        (Some(username), Some(password)) => Some(Credentials::new(username, password)),
        (None, None) => file.and_then(|path| match read_file(path) {
            Ok(creds) => {
                tracing::debug!(path = ?path, username = %creds.username, "using credentials from file");
                Some(creds)
            }
            Err(err) => {
                tracing::debug!(path = ?path, error = ?err, "no credentials resolved from file");
                None
            }
        }),
        _ => {
            tracing::warn!("only one of login_user & login_password was given, authentication will be skipped");
            None
        }
    }
}

/// Read credentials from the `[client]` section of the given file.
pub fn read_file(path: &Path) -> Result<Credentials> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("error reading credentials file {:?}", path))?;
    parse(&contents).with_context(|| format!("error parsing credentials file {:?}", path))
}

/// Parse credentials from the `[client]` section of the given INI document.
///
/// Keys are case-insensitive and may be separated from their values by `=` or `:`. Lines
/// starting with `#` or `;` are comments. Any line which is neither a section header, a comment
/// nor a key/value pair renders the whole document invalid.
pub fn parse(contents: &str) -> Result<Credentials> {
    let (mut section, mut username, mut password) = (None, None, None);
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            section = Some(name.trim());
            continue;
        }
        let delim = match line.find(|c: char| c == '=' || c == ':') {
            Some(delim) => delim,
            None => bail!("line {} is not a key/value pair", idx + 1),
        };
        let current = match section {
            Some(current) => current,
            None => bail!("line {} appears before any section header", idx + 1),
        };
        if current != CLIENT_SECTION {
            continue;
        }
        let (key, value) = (line[..delim].trim().to_lowercase(), line[delim + 1..].trim());
        match key.as_str() {
            "user" => username = Some(value.to_string()),
            "pass" => password = Some(value.to_string()),
            _ => (),
        }
    }

    match (username, password) {
        (Some(username), Some(password)) => Ok(Credentials::new(username, password)),
        _ => bail!("the [{}] section must provide both `user` & `pass`", CLIENT_SECTION),
    }
}
