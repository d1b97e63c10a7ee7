//! One-pass configuration validation. Produces structured errors and
//! warnings; startup aborts when any error is present, while warnings are
//! logged and serving proceeds.

use crate::engine::config::Config;
use crate::error::Error;
use glob::Pattern;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

const DB_TLS_MODES: &[&str] = &["off", "preferred", "skip-verify", "verify-ca", "verify-full"];
const SERVER_TLS_MODES: &[&str] = &["off", "enabled"];
const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
const OIDC_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512", "RS256", "RS384", "RS512"];

/// One validation finding, tied to the config key that produced it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationIssue {
    key: String,
    message: String,
}

impl ValidationIssue {
    fn new(key: &str, message: String) -> ValidationIssue {
        ValidationIssue {
            key: key.to_string(),
            message,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ValidationIssue {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Outcome of validating a [`Config`].
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn errors(&self) -> &[ValidationIssue] {
        &self.errors
    }

    pub fn warnings(&self) -> &[ValidationIssue] {
        &self.warnings
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapses the report into the startup error carrying every failure.
    pub fn into_result(self) -> Result<Vec<ValidationIssue>, Error> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(Error::ConfigInvalid {
                failures: self.errors.iter().map(|i| i.to_string()).collect(),
            })
        }
    }

    fn error(&mut self, key: &str, message: String) {
        self.errors.push(ValidationIssue::new(key, message));
    }

    fn warning(&mut self, key: &str, message: String) {
        self.warnings.push(ValidationIssue::new(key, message));
    }
}

/// Validates the whole record in one deterministic pass. Re-running on a
/// config that already passed produces no new findings.
pub fn validate(config: &Config) -> ValidationReport {
    let mut report = ValidationReport::default();

    check_port(&mut report, "server.port", config.server.port);
    check_port(&mut report, "database.port", config.database.port);

    if !SERVER_TLS_MODES.contains(&config.server.tls.mode.as_str()) {
        report.error(
            "server.tls.mode",
            format!(
                "invalid TLS mode {}; valid modes: {}",
                config.server.tls.mode,
                SERVER_TLS_MODES.join(", ")
            ),
        );
    } else if config.server.tls.mode == "enabled"
        && (config.server.tls.cert_file.is_empty() || config.server.tls.key_file.is_empty())
    {
        report.error(
            "server.tls",
            "TLS is enabled but cert_file or key_file is missing".to_string(),
        );
    }

    if !DB_TLS_MODES.contains(&config.database.tls_mode.as_str()) {
        report.error(
            "database.tls_mode",
            format!(
                "invalid TLS mode {}; valid modes: {}",
                config.database.tls_mode,
                DB_TLS_MODES.join(", ")
            ),
        );
    }
    if config.database.tls_mode == "skip-verify" {
        report.warning(
            "database.tls_mode",
            "skip-verify encrypts the connection but does not verify the server certificate"
                .to_string(),
        );
    }

    if !LOG_LEVELS.contains(&config.log.level.as_str()) {
        report.error(
            "log.level",
            format!(
                "invalid log level {}; valid levels: {}",
                config.log.level,
                LOG_LEVELS.join(", ")
            ),
        );
    }

    if config.database.max_idle > config.database.max_open {
        report.warning(
            "database.max_idle",
            format!(
                "max_idle ({}) exceeds max_open ({}); idle connections above the open limit are never kept",
                config.database.max_idle, config.database.max_open
            ),
        );
    }

    if !config.database.mycnf_file.is_empty()
        && (!config.database.dsn.is_empty() || !config.database.dsn_file.is_empty())
    {
        report.error(
            "database.mycnf_file",
            "mycnf_file is mutually exclusive with dsn and dsn_file".to_string(),
        );
    }
    if !config.database.dsn.is_empty() && !config.database.dsn_file.is_empty() {
        report.error(
            "database.dsn_file",
            "dsn and dsn_file are both set; use one".to_string(),
        );
    }
    if let Err(e) = config.effective_database() {
        report.error("database.database", format!("{}", e));
    }

    if config.rate_limit.enabled && config.rate_limit.rps == 0 {
        report.error(
            "rate_limit.rps",
            "rate limiting is enabled with zero requests per second".to_string(),
        );
    }

    if config.auth.oidc.enabled {
        if config.auth.oidc.issuer.is_empty() {
            report.error(
                "auth.oidc.issuer",
                "OIDC is enabled without an issuer".to_string(),
            );
        }
        if config.auth.oidc.audience.is_empty() {
            report.error(
                "auth.oidc.audience",
                "OIDC is enabled without an audience".to_string(),
            );
        }
        let algorithm = config.auth.oidc.algorithm.as_str();
        if !OIDC_ALGORITHMS.contains(&algorithm) {
            report.error(
                "auth.oidc.algorithm",
                format!(
                    "unsupported algorithm {}; valid algorithms: {}",
                    algorithm,
                    OIDC_ALGORITHMS.join(", ")
                ),
            );
        } else if algorithm.starts_with("HS") {
            if config.auth.oidc.secret.is_empty() {
                report.error(
                    "auth.oidc.secret",
                    format!("{} verification requires a shared secret", algorithm),
                );
            }
        } else if config.auth.oidc.public_key_file.is_empty() {
            report.error(
                "auth.oidc.public_key_file",
                format!("{} verification requires a public key file", algorithm),
            );
        }
    }

    if config.auth.db_roles.enabled && config.auth.db_roles.roles.is_empty() {
        report.error(
            "auth.db_roles.roles",
            "role schemas are enabled but no roles are listed".to_string(),
        );
    }
    if config.auth.db_roles.enabled && !config.auth.oidc.enabled {
        report.warning(
            "auth.db_roles.enabled",
            "role schemas without OIDC: role headers can never be validated, so requests always serve the default schema"
                .to_string(),
        );
    }

    if config.admin.enabled
        && config.admin.auth_token.is_empty()
        && config.admin.auth_token_file.is_empty()
        && !config.auth.oidc.enabled
    {
        report.error(
            "admin.auth_token",
            "admin endpoints are enabled without a token or OIDC".to_string(),
        );
    }

    if config.cors.allowed_origins.iter().any(|o| o == "*") {
        report.warning(
            "cors.allowed_origins",
            "wildcard origin serves every site; credentials are not honored for wildcard origins"
                .to_string(),
        );
    }

    if config.refresh.min_interval_secs == 0 {
        report.error(
            "refresh.min_interval_secs",
            "refresh interval must be at least one second".to_string(),
        );
    }
    if config.refresh.max_interval_secs < config.refresh.min_interval_secs {
        report.error(
            "refresh.max_interval_secs",
            "max_interval must be at least min_interval".to_string(),
        );
    }

    check_patterns(&mut report, "schema.filter.allow_tables", &config.schema.filter.allow_tables);
    check_patterns(&mut report, "schema.filter.deny_tables", &config.schema.filter.deny_tables);
    check_pattern_map(
        &mut report,
        "schema.filter.allow_columns",
        &config.schema.filter.allow_columns,
    );
    check_pattern_map(
        &mut report,
        "schema.filter.deny_columns",
        &config.schema.filter.deny_columns,
    );
    check_patterns(
        &mut report,
        "schema.filter.deny_mutation_tables",
        &config.schema.filter.deny_mutation_tables,
    );
    check_pattern_map(
        &mut report,
        "schema.filter.deny_mutation_columns",
        &config.schema.filter.deny_mutation_columns,
    );
    check_patterns(
        &mut report,
        "schema.overrides.tinyint1_boolean_columns",
        &config.schema.overrides.tinyint1_boolean_columns,
    );
    check_patterns(
        &mut report,
        "schema.overrides.tinyint1_int_columns",
        &config.schema.overrides.tinyint1_int_columns,
    );
    check_patterns(
        &mut report,
        "schema.overrides.uuid_columns",
        &config.schema.overrides.uuid_columns,
    );

    report
}

fn check_port(report: &mut ValidationReport, key: &str, port: u32) {
    if port == 0 || port > 65535 {
        report.error(
            key,
            format!("port {} is out of range; valid ports are 1-65535", port),
        );
    }
}

fn check_patterns(report: &mut ValidationReport, key: &str, patterns: &[String]) {
    for p in patterns {
        if let Err(e) = Pattern::new(p) {
            report.error(key, format!("invalid glob pattern {}: {}", p, e));
        }
    }
}

fn check_pattern_map(
    report: &mut ValidationReport,
    key: &str,
    map: &BTreeMap<String, Vec<String>>,
) {
    for (table, patterns) in map {
        if let Err(e) = Pattern::new(table) {
            report.error(key, format!("invalid glob pattern {}: {}", table, e));
        }
        check_patterns(report, key, patterns);
    }
}

#[cfg(test)]
mod tests {
    use super::validate;
    use crate::engine::config::Config;

    /// Passes if the default configuration validates clean of errors
    #[test]
    fn defaults_validate() {
        let report = validate(&Config::default());

        assert!(report.is_ok(), "errors: {:?}", report.errors());
    }

    /// Passes if boundary ports are accepted and out-of-range ports rejected
    #[test]
    fn port_boundaries() {
        let mut config = Config::default();
        config.server.port = 1;
        assert!(validate(&config).is_ok());

        config.server.port = 65535;
        assert!(validate(&config).is_ok());

        config.server.port = 0;
        assert!(!validate(&config).is_ok());

        config.server.port = 65536;
        assert!(!validate(&config).is_ok());
    }

    /// Passes if max_idle above max_open is a warning, not an error
    #[test]
    fn pool_sizing_warns() {
        let mut config = Config::default();
        config.database.max_open = 4;
        config.database.max_idle = 8;

        let report = validate(&config);

        assert!(report.is_ok());
        assert!(report
            .warnings()
            .iter()
            .any(|w| w.key() == "database.max_idle"));
    }

    /// Passes if skip-verify TLS produces a warning
    #[test]
    fn skip_verify_warns() {
        let mut config = Config::default();
        config.database.tls_mode = "skip-verify".to_string();

        let report = validate(&config);

        assert!(report.is_ok());
        assert!(report
            .warnings()
            .iter()
            .any(|w| w.key() == "database.tls_mode"));
    }

    /// Passes if an unknown TLS mode and log level are errors
    #[test]
    fn invalid_enums() {
        let mut config = Config::default();
        config.database.tls_mode = "mystery".to_string();
        config.log.level = "loud".to_string();

        let report = validate(&config);

        assert_eq!(2, report.errors().len());
    }

    /// Passes if rate limiting enabled with zero rps is an error
    #[test]
    fn rate_limit_zero() {
        let mut config = Config::default();
        config.rate_limit.enabled = true;
        config.rate_limit.rps = 0;

        assert!(!validate(&config).is_ok());
    }

    /// Passes if OIDC without issuer, audience, or key material produces an
    /// error for each missing piece
    #[test]
    fn oidc_incomplete() {
        let mut config = Config::default();
        config.auth.oidc.enabled = true;

        let report = validate(&config);
        let keys: Vec<&str> = report.errors().iter().map(|e| e.key()).collect();

        assert!(keys.contains(&"auth.oidc.issuer"));
        assert!(keys.contains(&"auth.oidc.audience"));
        assert!(keys.contains(&"auth.oidc.public_key_file"));
        assert_eq!(3, report.errors().len());
    }

    /// Passes if an HMAC algorithm demands its secret and a bad algorithm is
    /// rejected
    #[test]
    fn oidc_key_material() {
        let mut config = Config::default();
        config.auth.oidc.enabled = true;
        config.auth.oidc.issuer = "https://issuer.test".to_string();
        config.auth.oidc.audience = "tigql".to_string();
        config.auth.oidc.algorithm = "HS256".to_string();

        let report = validate(&config);
        assert!(report.errors().iter().any(|e| e.key() == "auth.oidc.secret"));

        config.auth.oidc.secret = "s3cret".to_string();
        assert!(validate(&config).is_ok());

        config.auth.oidc.algorithm = "ROT13".to_string();
        assert!(validate(&config)
            .errors()
            .iter()
            .any(|e| e.key() == "auth.oidc.algorithm"));
    }

    /// Passes if role schemas without OIDC warn rather than error
    #[test]
    fn roles_without_oidc_warn() {
        let mut config = Config::default();
        config.auth.db_roles.enabled = true;
        config.auth.db_roles.roles = vec!["reporting_ro".to_string()];

        let report = validate(&config);

        assert!(report.is_ok());
        assert!(report
            .warnings()
            .iter()
            .any(|w| w.key() == "auth.db_roles.enabled"));
    }

    /// Passes if invalid glob patterns are rejected
    #[test]
    fn invalid_globs() {
        let mut config = Config::default();
        config
            .schema
            .filter
            .set_deny_tables(vec!["[unclosed".to_string()]);

        assert!(!validate(&config).is_ok());
    }

    /// Passes if validation is deterministic and idempotent: the same config
    /// yields the same report every time
    #[test]
    fn deterministic() {
        let mut config = Config::default();
        config.database.tls_mode = "skip-verify".to_string();

        let first = validate(&config);
        let second = validate(&config);

        assert_eq!(first.errors(), second.errors());
        assert_eq!(first.warnings(), second.warnings());
    }
}
