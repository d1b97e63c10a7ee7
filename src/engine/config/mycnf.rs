//! Loader for MySQL defaults files (`.my.cnf`). Connection settings are read
//! from the `[client]` section, with `[mysql]` consulted for the database
//! name only.

use crate::error::Error;
use std::fs;

/// Settings extracted from a defaults file. Absent keys stay `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MycnfSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub tls_mode: Option<String>,
}

/// Reads and parses a defaults file from disk.
pub fn load(path: &str) -> Result<MycnfSettings, Error> {
    let text = fs::read_to_string(path).map_err(|e| Error::SecretReadFailed {
        path: path.to_string(),
        source: e,
    })?;
    parse(&text)
}

/// Parses defaults-file text. Unknown keys are ignored; unknown ssl-mode
/// values and out-of-range ports are rejected.
pub fn parse(text: &str) -> Result<MycnfSettings, Error> {
    let mut settings = MycnfSettings::default();
    let mut section = String::new();
    let mut mysql_database: Option<String> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].trim().to_lowercase();
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k.trim().to_lowercase(), v.trim().to_string()),
            // bare flags like `no-beep` carry nothing we consume
            None => continue,
        };
        match section.as_str() {
            "client" => match key.as_str() {
                "host" => settings.host = Some(value),
                "port" => settings.port = Some(parse_port(&value)?),
                "user" => settings.user = Some(value),
                "password" => settings.password = Some(value),
                "database" => settings.database = Some(value),
                "ssl-mode" | "ssl_mode" => settings.tls_mode = Some(map_ssl_mode(&value)?),
                _ => {}
            },
            "mysql" => {
                if key == "database" {
                    mysql_database = Some(value);
                }
            }
            _ => {}
        }
    }

    if settings.database.is_none() {
        settings.database = mysql_database;
    }
    Ok(settings)
}

fn parse_port(value: &str) -> Result<u16, Error> {
    let n: i64 = value.parse().map_err(|_| Error::PortOutOfRange {
        value: i64::MAX,
    })?;
    if !(1..=65535).contains(&n) {
        return Err(Error::PortOutOfRange { value: n });
    }
    Ok(n as u16)
}

/// Maps MySQL client ssl-mode names onto the gateway's TLS modes.
fn map_ssl_mode(mode: &str) -> Result<String, Error> {
    match mode.to_uppercase().as_str() {
        "DISABLED" => Ok("off".to_string()),
        "REQUIRED" | "PREFERRED" => Ok("skip-verify".to_string()),
        "VERIFY_CA" => Ok("verify-ca".to_string()),
        "VERIFY_IDENTITY" => Ok("verify-full".to_string()),
        _ => Err(Error::SslModeNotRecognized {
            mode: mode.to_string(),
        }),
    }
}
