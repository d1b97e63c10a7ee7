//! Multi-source secret resolution. `dsn_file`, `mycnf_file`, `password_file`,
//! and `admin.auth_token_file` each accept a filesystem path or `@-` to read
//! standard input; at most one may consume stdin.

use crate::engine::config::Config;
use crate::error::Error;
use std::fs;
use std::io::Read;

const STDIN_SOURCE: &str = "@-";

/// Reads the secret file sources into their target fields. Called once during
/// config resolution, before validation.
pub(crate) fn resolve(config: &mut Config) -> Result<(), Error> {
    let stdin_keys: Vec<String> = [
        ("database.dsn_file", config.database.dsn_file.as_str()),
        ("database.mycnf_file", config.database.mycnf_file.as_str()),
        (
            "database.password_file",
            config.database.password_file.as_str(),
        ),
        ("admin.auth_token_file", config.admin.auth_token_file.as_str()),
    ]
    .iter()
    .filter(|(_, v)| *v == STDIN_SOURCE)
    .map(|(k, _)| k.to_string())
    .collect();
    if stdin_keys.len() > 1 {
        return Err(Error::StdinSourceConflicted { keys: stdin_keys });
    }

    if !config.database.dsn_file.is_empty() {
        let dsn = read_source(&config.database.dsn_file)?;
        if config.database.dsn.is_empty() {
            config.database.dsn = dsn;
        }
    }
    if !config.database.password_file.is_empty() {
        config.database.password = read_source(&config.database.password_file)?;
    }
    if !config.admin.auth_token_file.is_empty() && config.admin.auth_token_file != STDIN_SOURCE {
        config.admin.auth_token = read_source(&config.admin.auth_token_file)?;
    } else if config.admin.auth_token_file == STDIN_SOURCE {
        config.admin.auth_token = read_source(STDIN_SOURCE)?;
    }
    Ok(())
}

/// Reads one secret source: a path, or standard input for `@-`. Trailing
/// newlines are stripped so `echo secret | tigql` behaves.
pub(crate) fn read_source(source: &str) -> Result<String, Error> {
    let raw = if source == STDIN_SOURCE {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| Error::SecretReadFailed {
                path: STDIN_SOURCE.to_string(),
                source: e,
            })?;
        buf
    } else {
        fs::read_to_string(source).map_err(|e| Error::SecretReadFailed {
            path: source.to_string(),
            source: e,
        })?
    };
    Ok(raw.trim_end_matches(['\n', '\r']).to_string())
}
