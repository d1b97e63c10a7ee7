//! Layered configuration for the gateway. Sources are resolved in precedence
//! order: programmatic override, command-line flags, environment variables
//! (prefix `TIGQL_`), the YAML config file, and built-in defaults. The record
//! is built once at startup, validated in one pass, and immutable thereafter.

pub mod mycnf;
pub mod secrets;
pub mod validate;

use crate::error::Error;
use clap::Parser;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::time::Duration;

/// Value `database.database` starts with; treated as unset whenever another
/// source supplies a database name.
pub const DATABASE_PLACEHOLDER: &str = "test";

// Convenience functions for serde default values
fn get_false() -> bool {
    false
}

fn get_true() -> bool {
    true
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u32 {
    8080
}

fn default_database_host() -> String {
    "127.0.0.1".to_string()
}

fn default_database_port() -> u32 {
    4000
}

fn default_database_user() -> String {
    "root".to_string()
}

fn default_database_name() -> String {
    DATABASE_PLACEHOLDER.to_string()
}

fn default_max_open() -> u32 {
    (num_cpus::get() as u32) * 4
}

fn default_max_idle() -> u32 {
    num_cpus::get() as u32
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_db_tls_mode() -> String {
    "preferred".to_string()
}

fn default_server_tls_mode() -> String {
    "off".to_string()
}

fn default_min_interval() -> u64 {
    30
}

fn default_max_interval() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

/// Root configuration record. Passed by value to components after startup.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub(crate) server: ServerConfig,
    #[serde(default)]
    pub(crate) database: DatabaseConfig,
    #[serde(default)]
    pub(crate) schema: SchemaConfig,
    #[serde(default)]
    pub(crate) refresh: RefreshConfig,
    #[serde(default)]
    pub(crate) auth: AuthConfig,
    #[serde(default)]
    pub(crate) admin: AdminConfig,
    #[serde(default)]
    pub(crate) cors: CorsConfig,
    #[serde(default)]
    pub(crate) rate_limit: RateLimitConfig,
    #[serde(default)]
    pub(crate) log: LogConfig,
    #[serde(default)]
    pub(crate) metrics: MetricsConfig,

    /// Database name supplied by the defaults file, if one was loaded.
    #[serde(skip)]
    pub(crate) mycnf_database: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub(crate) host: String,
    #[serde(default = "default_server_port")]
    pub(crate) port: u32,
    #[serde(default = "get_true")]
    pub(crate) playground_enabled: bool,
    #[serde(default)]
    pub(crate) tls: TlsConfig,
}

impl ServerConfig {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u32 {
        self.port
    }

    pub fn playground_enabled(&self) -> bool {
        self.playground_enabled
    }

    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_server_host(),
            port: default_server_port(),
            playground_enabled: true,
            tls: TlsConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    #[serde(default = "default_server_tls_mode")]
    pub(crate) mode: String,
    #[serde(default)]
    pub(crate) cert_file: String,
    #[serde(default)]
    pub(crate) key_file: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            mode: default_server_tls_mode(),
            cert_file: String::new(),
            key_file: String::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_host")]
    pub(crate) host: String,
    #[serde(default = "default_database_port")]
    pub(crate) port: u32,
    #[serde(default = "default_database_user")]
    pub(crate) user: String,
    #[serde(default)]
    pub(crate) password: String,
    #[serde(default)]
    pub(crate) password_file: String,
    #[serde(default = "default_database_name")]
    pub(crate) database: String,
    #[serde(default)]
    pub(crate) dsn: String,
    #[serde(default)]
    pub(crate) dsn_file: String,
    #[serde(default)]
    pub(crate) mycnf_file: String,
    #[serde(default = "default_max_open")]
    pub(crate) max_open: u32,
    #[serde(default = "default_max_idle")]
    pub(crate) max_idle: u32,
    #[serde(default = "default_connection_timeout")]
    pub(crate) connection_timeout_secs: u64,
    #[serde(default = "default_db_tls_mode")]
    pub(crate) tls_mode: String,
}

impl DatabaseConfig {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u32 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    pub fn tls_mode(&self) -> &str {
        &self.tls_mode
    }

    pub fn max_open(&self) -> u32 {
        self.max_open
    }

    pub fn max_idle(&self) -> u32 {
        self.max_idle
    }

    pub fn connection_timeout_secs(&self) -> u64 {
        self.connection_timeout_secs
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: default_database_host(),
            port: default_database_port(),
            user: default_database_user(),
            password: String::new(),
            password_file: String::new(),
            database: default_database_name(),
            dsn: String::new(),
            dsn_file: String::new(),
            mycnf_file: String::new(),
            max_open: default_max_open(),
            max_idle: default_max_idle(),
            connection_timeout_secs: default_connection_timeout(),
            tls_mode: default_db_tls_mode(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    #[serde(default)]
    pub(crate) filter: SchemaFilterConfig,
    #[serde(default)]
    pub(crate) overrides: TypeOverridesConfig,
    #[serde(default)]
    pub(crate) naming: NamingOverridesConfig,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFilterConfig {
    #[serde(default)]
    pub(crate) allow_tables: Vec<String>,
    #[serde(default)]
    pub(crate) deny_tables: Vec<String>,
    #[serde(default = "get_false")]
    pub(crate) scan_views_enabled: bool,
    #[serde(default)]
    pub(crate) allow_columns: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub(crate) deny_columns: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub(crate) deny_mutation_tables: Vec<String>,
    #[serde(default)]
    pub(crate) deny_mutation_columns: BTreeMap<String, Vec<String>>,
}

impl SchemaFilterConfig {
    pub fn allow_tables(&self) -> &[String] {
        &self.allow_tables
    }

    pub fn deny_tables(&self) -> &[String] {
        &self.deny_tables
    }

    pub fn scan_views_enabled(&self) -> bool {
        self.scan_views_enabled
    }

    pub fn allow_columns(&self) -> &BTreeMap<String, Vec<String>> {
        &self.allow_columns
    }

    pub fn deny_columns(&self) -> &BTreeMap<String, Vec<String>> {
        &self.deny_columns
    }

    pub fn deny_mutation_tables(&self) -> &[String] {
        &self.deny_mutation_tables
    }

    pub fn deny_mutation_columns(&self) -> &BTreeMap<String, Vec<String>> {
        &self.deny_mutation_columns
    }

    pub(crate) fn set_allow_tables(&mut self, patterns: Vec<String>) {
        self.allow_tables = patterns;
    }

    pub(crate) fn set_deny_tables(&mut self, patterns: Vec<String>) {
        self.deny_tables = patterns;
    }

    pub(crate) fn set_scan_views_enabled(&mut self, enabled: bool) {
        self.scan_views_enabled = enabled;
    }

    pub(crate) fn set_deny_columns(&mut self, map: BTreeMap<String, Vec<String>>) {
        self.deny_columns = map;
    }

    pub(crate) fn set_deny_mutation_tables(&mut self, patterns: Vec<String>) {
        self.deny_mutation_tables = patterns;
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TypeOverridesConfig {
    #[serde(default)]
    pub(crate) tinyint1_boolean_columns: Vec<String>,
    #[serde(default)]
    pub(crate) tinyint1_int_columns: Vec<String>,
    #[serde(default)]
    pub(crate) uuid_columns: Vec<String>,
}

impl TypeOverridesConfig {
    pub fn tinyint1_boolean_columns(&self) -> &[String] {
        &self.tinyint1_boolean_columns
    }

    pub fn tinyint1_int_columns(&self) -> &[String] {
        &self.tinyint1_int_columns
    }

    pub fn uuid_columns(&self) -> &[String] {
        &self.uuid_columns
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NamingOverridesConfig {
    #[serde(default)]
    pub(crate) pluralize: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) singularize: BTreeMap<String, String>,
}

impl NamingOverridesConfig {
    pub fn pluralize(&self) -> &BTreeMap<String, String> {
        &self.pluralize
    }

    pub fn singularize(&self) -> &BTreeMap<String, String> {
        &self.singularize
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshConfig {
    #[serde(default = "default_min_interval")]
    pub(crate) min_interval_secs: u64,
    #[serde(default = "default_max_interval")]
    pub(crate) max_interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            min_interval_secs: default_min_interval(),
            max_interval_secs: default_max_interval(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default)]
    pub(crate) oidc: OidcConfig,
    #[serde(default)]
    pub(crate) db_roles: DbRolesConfig,
}

fn default_oidc_algorithm() -> String {
    "RS256".to_string()
}

fn default_role_claim() -> String {
    "db_role".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OidcConfig {
    #[serde(default = "get_false")]
    pub(crate) enabled: bool,
    #[serde(default)]
    pub(crate) issuer: String,
    #[serde(default)]
    pub(crate) audience: String,
    /// Signature algorithm: HS256/HS384/HS512 verify with `secret`,
    /// RS256/RS384/RS512 with the PEM in `public_key_file`.
    #[serde(default = "default_oidc_algorithm")]
    pub(crate) algorithm: String,
    #[serde(default)]
    pub(crate) public_key_file: String,
    #[serde(default)]
    pub(crate) secret: String,
    /// Claim carrying the caller's database role.
    #[serde(default = "default_role_claim")]
    pub(crate) role_claim: String,
}

impl OidcConfig {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn public_key_file(&self) -> &str {
        &self.public_key_file
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn role_claim(&self) -> &str {
        &self.role_claim
    }
}

impl Default for OidcConfig {
    fn default() -> Self {
        OidcConfig {
            enabled: false,
            issuer: String::new(),
            audience: String::new(),
            algorithm: default_oidc_algorithm(),
            public_key_file: String::new(),
            secret: String::new(),
            role_claim: default_role_claim(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DbRolesConfig {
    #[serde(default = "get_false")]
    pub(crate) enabled: bool,
    #[serde(default)]
    pub(crate) roles: Vec<String>,
    #[serde(default)]
    pub(crate) introspection_role: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    #[serde(default = "get_false")]
    pub(crate) enabled: bool,
    #[serde(default)]
    pub(crate) auth_token: String,
    #[serde(default)]
    pub(crate) auth_token_file: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    #[serde(default = "default_cors_origins")]
    pub(crate) allowed_origins: Vec<String>,
    #[serde(default = "get_false")]
    pub(crate) allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        CorsConfig {
            allowed_origins: default_cors_origins(),
            allow_credentials: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub(crate) level: String,
}

impl LogConfig {
    pub fn level(&self) -> &str {
        &self.level
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(default = "get_false")]
    pub(crate) enabled: bool,
    #[serde(default)]
    pub(crate) rps: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default = "get_false")]
    pub(crate) enabled: bool,
}

/// Command-line flags. Names are dotted snake_case and every flag can also be
/// set through the matching `TIGQL_` environment variable.
#[derive(Clone, Debug, Default, Parser)]
#[command(name = "tigql", about = "GraphQL gateway for TiDB and MySQL")]
pub struct CliArgs {
    /// Path to the YAML configuration file
    #[arg(long = "config", env = "TIGQL_CONFIG")]
    pub config: Option<String>,

    #[arg(long = "server.host")]
    pub server_host: Option<String>,

    #[arg(long = "server.port")]
    pub server_port: Option<u32>,

    #[arg(long = "database.host")]
    pub database_host: Option<String>,

    #[arg(long = "database.port")]
    pub database_port: Option<u32>,

    #[arg(long = "database.user")]
    pub database_user: Option<String>,

    #[arg(long = "database.password")]
    pub database_password: Option<String>,

    #[arg(long = "database.password_file")]
    pub database_password_file: Option<String>,

    #[arg(long = "database.database")]
    pub database_database: Option<String>,

    #[arg(long = "database.dsn")]
    pub database_dsn: Option<String>,

    #[arg(long = "database.dsn_file")]
    pub database_dsn_file: Option<String>,

    #[arg(long = "database.mycnf_file")]
    pub database_mycnf_file: Option<String>,

    #[arg(long = "log.level")]
    pub log_level: Option<String>,

    #[arg(long = "admin.enabled")]
    pub admin_enabled: Option<bool>,

    #[arg(long = "admin.auth_token_file")]
    pub admin_auth_token_file: Option<String>,
}

impl Config {
    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn database(&self) -> &DatabaseConfig {
        &self.database
    }

    pub fn schema(&self) -> &SchemaConfig {
        &self.schema
    }

    pub fn refresh(&self) -> &RefreshConfig {
        &self.refresh
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    pub fn admin(&self) -> &AdminConfig {
        &self.admin
    }

    pub fn cors(&self) -> &CorsConfig {
        &self.cors
    }

    pub fn rate_limit(&self) -> &RateLimitConfig {
        &self.rate_limit
    }

    pub fn log(&self) -> &LogConfig {
        &self.log
    }

    pub fn metrics(&self) -> &MetricsConfig {
        &self.metrics
    }

    /// Builds the configuration from every source in precedence order, reads
    /// secret sources, and loads the MySQL defaults file if one is named.
    /// Validation is a separate pass so callers can render every failure.
    pub fn load(args: &CliArgs) -> Result<Config, Error> {
        let mut config = match &args.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env();
        config.apply_flags(args);
        secrets::resolve(&mut config)?;
        if !config.database.mycnf_file.is_empty() {
            if !config.database.dsn.is_empty() || !config.database.dsn_file.is_empty() {
                return Err(Error::MycnfConflicted);
            }
            let defaults = if config.database.mycnf_file == "@-" {
                mycnf::parse(&secrets::read_source("@-")?)?
            } else {
                mycnf::load(&config.database.mycnf_file)?
            };
            config.apply_mycnf(defaults);
        }
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Config, Error> {
        let file = File::open(path).map_err(|e| Error::ConfigOpenFailed {
            path: path.to_string(),
            source: e,
        })?;
        let reader = BufReader::new(file);
        Ok(serde_yaml::from_reader(reader)?)
    }

    /// Applies `TIGQL_` environment variables. Key names mirror the config
    /// paths with `.` and `-` replaced by `_`.
    fn apply_env(&mut self) {
        env_string("server.host", &mut self.server.host);
        env_u32("server.port", &mut self.server.port);
        env_bool("server.playground_enabled", &mut self.server.playground_enabled);
        env_string("server.tls.mode", &mut self.server.tls.mode);
        env_string("server.tls.cert_file", &mut self.server.tls.cert_file);
        env_string("server.tls.key_file", &mut self.server.tls.key_file);
        env_string("database.host", &mut self.database.host);
        env_u32("database.port", &mut self.database.port);
        env_string("database.user", &mut self.database.user);
        env_string("database.password", &mut self.database.password);
        env_string("database.password_file", &mut self.database.password_file);
        env_string("database.database", &mut self.database.database);
        env_string("database.dsn", &mut self.database.dsn);
        env_string("database.dsn_file", &mut self.database.dsn_file);
        env_string("database.mycnf_file", &mut self.database.mycnf_file);
        env_u32("database.max_open", &mut self.database.max_open);
        env_u32("database.max_idle", &mut self.database.max_idle);
        env_u64(
            "database.connection_timeout_secs",
            &mut self.database.connection_timeout_secs,
        );
        env_string("database.tls_mode", &mut self.database.tls_mode);
        env_u64("refresh.min_interval_secs", &mut self.refresh.min_interval_secs);
        env_u64("refresh.max_interval_secs", &mut self.refresh.max_interval_secs);
        env_bool("auth.oidc.enabled", &mut self.auth.oidc.enabled);
        env_string("auth.oidc.issuer", &mut self.auth.oidc.issuer);
        env_string("auth.oidc.audience", &mut self.auth.oidc.audience);
        env_string("auth.oidc.algorithm", &mut self.auth.oidc.algorithm);
        env_string(
            "auth.oidc.public_key_file",
            &mut self.auth.oidc.public_key_file,
        );
        env_string("auth.oidc.secret", &mut self.auth.oidc.secret);
        env_string("auth.oidc.role_claim", &mut self.auth.oidc.role_claim);
        env_bool("auth.db_roles.enabled", &mut self.auth.db_roles.enabled);
        env_string(
            "auth.db_roles.introspection_role",
            &mut self.auth.db_roles.introspection_role,
        );
        env_bool("admin.enabled", &mut self.admin.enabled);
        env_string("admin.auth_token", &mut self.admin.auth_token);
        env_string("admin.auth_token_file", &mut self.admin.auth_token_file);
        env_string("log.level", &mut self.log.level);
        env_bool("metrics.enabled", &mut self.metrics.enabled);
        env_bool("rate_limit.enabled", &mut self.rate_limit.enabled);
        env_u32("rate_limit.rps", &mut self.rate_limit.rps);
    }

    fn apply_flags(&mut self, args: &CliArgs) {
        flag(&args.server_host, &mut self.server.host);
        flag(&args.server_port, &mut self.server.port);
        flag(&args.database_host, &mut self.database.host);
        flag(&args.database_port, &mut self.database.port);
        flag(&args.database_user, &mut self.database.user);
        flag(&args.database_password, &mut self.database.password);
        flag(
            &args.database_password_file,
            &mut self.database.password_file,
        );
        flag(&args.database_database, &mut self.database.database);
        flag(&args.database_dsn, &mut self.database.dsn);
        flag(&args.database_dsn_file, &mut self.database.dsn_file);
        flag(&args.database_mycnf_file, &mut self.database.mycnf_file);
        flag(&args.log_level, &mut self.log.level);
        flag(&args.admin_enabled, &mut self.admin.enabled);
        flag(
            &args.admin_auth_token_file,
            &mut self.admin.auth_token_file,
        );
    }

    /// Fills connection fields from the defaults file wherever the discrete
    /// field still holds its built-in default. The database name is kept
    /// aside for effective-database resolution.
    fn apply_mycnf(&mut self, defaults: mycnf::MycnfSettings) {
        if let Some(host) = defaults.host {
            if self.database.host == default_database_host() {
                self.database.host = host;
            }
        }
        if let Some(port) = defaults.port {
            if self.database.port == default_database_port() {
                self.database.port = port as u32;
            }
        }
        if let Some(user) = defaults.user {
            if self.database.user == default_database_user() {
                self.database.user = user;
            }
        }
        if let Some(password) = defaults.password {
            if self.database.password.is_empty() {
                self.database.password = password;
            }
        }
        if let Some(tls_mode) = defaults.tls_mode {
            if self.database.tls_mode == default_db_tls_mode() {
                self.database.tls_mode = tls_mode;
            }
        }
        self.mycnf_database = defaults.database;
    }

    /// Programmatic override used only by the interactive password prompt;
    /// the highest-precedence source.
    pub fn override_password(&mut self, password: String) {
        self.database.password = password;
    }

    /// Resolves the database used for introspection and query execution.
    /// Pure: identical inputs yield identical results, and conflicting inputs
    /// always error rather than silently preferring one source.
    pub fn effective_database(&self) -> Result<(String, &'static str), Error> {
        let dsn_database = if self.database.dsn.is_empty() {
            None
        } else {
            Dsn::parse(&self.database.dsn)?.database
        };
        let other_source_present = dsn_database.is_some() || self.mycnf_database.is_some();
        let discrete = if self.database.database.is_empty() {
            None
        } else if self.database.database == DATABASE_PLACEHOLDER && other_source_present {
            // the placeholder default yields to any explicit source
            None
        } else {
            Some(self.database.database.clone())
        };

        match (discrete, dsn_database, &self.mycnf_database) {
            (Some(d), Some(from_dsn), _) => {
                if d == from_dsn {
                    Ok((d, "database"))
                } else {
                    Err(Error::DatabaseMismatched {
                        discrete: d,
                        dsn: from_dsn,
                    })
                }
            }
            (Some(d), None, _) => Ok((d, "database")),
            (None, Some(from_dsn), _) => Ok((from_dsn, "dsn")),
            (None, None, Some(from_mycnf)) => Ok((from_mycnf.clone(), "mycnf")),
            (None, None, None) => Err(Error::DatabaseNotNamed),
        }
    }

    /// Connection settings for the endpoint, with DSN fields taking over
    /// whenever a DSN is configured.
    pub fn connect_settings(&self) -> Result<crate::engine::database::mysql::ConnectSettings, Error>
    {
        let (database, _) = self.effective_database()?;
        let mut settings = crate::engine::database::mysql::ConnectSettings {
            host: self.database.host.clone(),
            port: self.database.port as u16,
            user: self.database.user.clone(),
            password: self.database.password.clone(),
            database,
            tls_mode: self.database.tls_mode.clone(),
            max_open: self.database.max_open,
            connection_timeout: Duration::from_secs(self.database.connection_timeout_secs),
        };
        if !self.database.dsn.is_empty() {
            let dsn = Dsn::parse(&self.database.dsn)?;
            settings.host = dsn.host;
            settings.port = dsn.port;
            settings.user = dsn.user;
            if !dsn.password.is_empty() {
                settings.password = dsn.password;
            }
            if let Some(tls) = dsn.tls_mode {
                settings.tls_mode = tls;
            }
        }
        Ok(settings)
    }
}

fn env_key(path: &str) -> String {
    format!(
        "TIGQL_{}",
        path.replace(['.', '-'], "_").to_uppercase()
    )
}

fn env_string(path: &str, target: &mut String) {
    if let Ok(v) = std::env::var(env_key(path)) {
        *target = v;
    }
}

fn env_bool(path: &str, target: &mut bool) {
    if let Ok(v) = std::env::var(env_key(path)) {
        match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *target = true,
            "0" | "false" | "no" | "off" => *target = false,
            _ => {}
        }
    }
}

fn env_u32(path: &str, target: &mut u32) {
    if let Ok(v) = std::env::var(env_key(path)) {
        if let Ok(n) = v.parse() {
            *target = n;
        }
    }
}

fn env_u64(path: &str, target: &mut u64) {
    if let Ok(v) = std::env::var(env_key(path)) {
        if let Ok(n) = v.parse() {
            *target = n;
        }
    }
}

fn flag<T: Clone>(source: &Option<T>, target: &mut T) {
    if let Some(v) = source {
        *target = v.clone();
    }
}

lazy_static! {
    static ref DSN_RE: Regex = Regex::new(
        r"^(?P<user>[^:@/]+)(?::(?P<pass>[^@]*))?@tcp\((?P<host>[^:)]+):(?P<port>\d+)\)/(?P<db>[^?]*)(?:\?(?P<params>.*))?$"
    )
    .unwrap();
}

/// Parsed MySQL-driver DSN of the form
/// `user:pass@tcp(host:port)/database?parseTime=true&loc=UTC[&tls=<mode>]`.
#[derive(Clone, Debug)]
pub struct Dsn {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub tls_mode: Option<String>,
}

impl Dsn {
    pub fn parse(dsn: &str) -> Result<Dsn, Error> {
        let caps = DSN_RE.captures(dsn).ok_or_else(|| Error::DsnNotParsed {
            dsn: redact_dsn(dsn),
        })?;
        let port: u16 = caps
            .name("port")
            .map(|m| m.as_str())
            .unwrap_or_default()
            .parse()
            .map_err(|_| Error::DsnNotParsed {
                dsn: redact_dsn(dsn),
            })?;
        let database = match caps.name("db").map(|m| m.as_str()) {
            None | Some("") => None,
            Some(db) => Some(db.to_string()),
        };
        let tls_mode = caps.name("params").and_then(|params| {
            params.as_str().split('&').find_map(|pair| {
                pair.strip_prefix("tls=").map(|mode| mode.to_string())
            })
        });
        Ok(Dsn {
            user: caps
                .name("user")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            password: caps
                .name("pass")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            host: caps
                .name("host")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            port,
            database,
            tls_mode,
        })
    }
}

/// Strips the password from a DSN before it appears in any error message.
fn redact_dsn(dsn: &str) -> String {
    match (dsn.find(':'), dsn.find('@')) {
        (Some(colon), Some(at)) if colon < at => {
            format!("{}:***{}", &dsn[..colon], &dsn[at..])
        }
        _ => dsn.to_string(),
    }
}
