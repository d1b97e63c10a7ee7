//! Provides the [`Error`] type for tigql, along with the machine-readable
//! error codes surfaced to GraphQL clients in `extensions.code`.

use juniper::graphql_value;
use std::fmt::{Display, Formatter};

/// Machine-readable category for an [`Error`], returned to GraphQL callers in
/// the `extensions.code` field of each error entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    /// User input failed parsing or validation: a bad cursor, scalar, or node ID
    InvalidArgument,

    /// The requested row or rows do not exist
    NotFound,

    /// Authentication or database-role failure
    PermissionDenied,

    /// A uniqueness or foreign-key constraint rejected a mutation
    Conflict,

    /// Anything else; details are logged server-side, never echoed to callers
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid-argument",
            ErrorCode::NotFound => "not-found",
            ErrorCode::PermissionDenied => "permission-denied",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Internal => "internal",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error type for tigql
///
/// # Examples
///
/// ```rust
/// use tigql::Error;
///
/// let e = Error::DatabaseNotNamed;
/// ```
#[derive(Debug)]
pub enum Error {
    /// Returned if the SQL catalog cannot be introspected, such as when the
    /// `information_schema` queries fail or the connection drops mid-build
    CatalogQueryFailed { source: sqlx::Error },

    /// Returned if a configuration file cannot be opened, typically because
    /// the file cannot be found on disk. The `path` field names the file.
    ConfigOpenFailed {
        path: String,
        source: std::io::Error,
    },

    /// Returned if a configuration file cannot be deserialized because the
    /// provided data does not match the expected structure
    ConfigDeserializationFailed { source: serde_yaml::Error },

    /// Returned at startup when configuration validation fails. The
    /// `failures` field contains one message per rejected setting.
    ConfigInvalid { failures: Vec<String> },

    /// Returned if a pagination cursor does not match the query it was
    /// submitted to. Each field carries the expected and observed components
    /// so the caller can see exactly what diverged.
    CursorMismatched {
        expected_type: String,
        found_type: String,
        expected_key: String,
        found_key: String,
    },

    /// Returned if a pagination cursor cannot be decoded. The `reason` field
    /// describes what was malformed.
    CursorNotParsed { reason: String },

    /// Returned if `database.database` and a DSN-embedded database name are
    /// both present and disagree
    DatabaseMismatched { discrete: String, dsn: String },

    /// Returned if no configuration source provides a database name
    DatabaseNotNamed,

    /// Returned if a SQL statement fails at execution time
    DatabaseQueryFailed { source: sqlx::Error },

    /// Returned if a DSN string cannot be parsed. The `dsn` field carries a
    /// redacted rendering, never the password.
    DsnNotParsed { dsn: String },

    /// Returned if a GraphQL query is missing an expected argument, or an
    /// input object is missing an expected field
    InputItemNotFound { name: String },

    /// Returned if `mycnf_file` is combined with `dsn` or `dsn_file`, which
    /// are mutually exclusive sources
    MycnfConflicted,

    /// Returned if an opaque node ID cannot be decoded
    NodeIdNotParsed { reason: String },

    /// Returned if the sqlx connection pool cannot be constructed or an
    /// initial connection cannot be established within the configured timeout
    PoolNotBuilt { source: sqlx::Error },

    /// Returned if a port value falls outside 1..=65535. The `value` field
    /// holds the rejected number.
    PortOutOfRange { value: i64 },

    /// Returned if a caller supplies a database role the gateway refuses to
    /// switch to, either because it is not validated or not configured
    RoleNotPermitted { role: String },

    /// Returned if a role name fails the identifier check applied before the
    /// name is used in a `SET ROLE` statement
    RoleNameInvalid { role: String },

    /// Returned if a row expected to exist is missing, such as a `node()`
    /// lookup for a deleted row
    RowNotFound { type_name: String },

    /// Returned if a domain scalar rejects an input value. The `type_name`
    /// names the scalar; `value` is a short rendering of the rejected input.
    ScalarNotParsed { type_name: String, value: String },

    /// Returned if tigql fails to find an element within a schema snapshot,
    /// such as a type or property. This most likely indicates an internal
    /// bug, so if you happen to see it, please open an issue at the tigql
    /// project. The field is the name of the schema element not found.
    SchemaItemNotFound { name: String },

    /// Returned if reading a secret source fails. Secret sources include
    /// `dsn_file`, `mycnf_file`, `password_file`, and the admin token file.
    SecretReadFailed {
        path: String,
        source: std::io::Error,
    },

    /// Returned if the HTTP listener cannot bind or serve
    ServerNotStarted { source: std::io::Error },

    /// Returned when a schema refresh fails and no joined caller can carry
    /// the original error. The `message` field renders the build failure.
    SnapshotNotBuilt { message: String },

    /// Returned if an ssl-mode value in a MySQL defaults file is not one of
    /// the recognized modes
    SslModeNotRecognized { mode: String },

    /// Returned if more than one secret source is set to `@-`, since standard
    /// input can only be consumed once. The `keys` field names every
    /// conflicting setting.
    StdinSourceConflicted { keys: Vec<String> },

    /// Returned if a bearer token fails OIDC verification: bad signature,
    /// wrong issuer or audience, or an expired or malformed token. The
    /// `reason` field carries the verifier's message for the server log.
    TokenNotVerified { reason: String },

    /// Returned if a mutation transaction is used after it was committed or
    /// rolled back
    TransactionFinished,

    /// tigql transforms data between SQL rows, an internal value
    /// representation, and GraphQL wire values. If data fails to convert, this
    /// error is thrown. The `src` field describes the source value and `dst`
    /// the type it could not become.
    TypeConversionFailed { src: String, dst: String },

    /// Returned if a uniqueness or referential constraint rejected a
    /// mutation. The `detail` field carries the driver's constraint message.
    UniquenessViolated { detail: String },
}

impl Error {
    /// Maps the error onto the machine code surfaced in `extensions.code`.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::CursorMismatched { .. }
            | Error::CursorNotParsed { .. }
            | Error::InputItemNotFound { .. }
            | Error::NodeIdNotParsed { .. }
            | Error::PortOutOfRange { .. }
            | Error::ScalarNotParsed { .. } => ErrorCode::InvalidArgument,
            Error::RowNotFound { .. } => ErrorCode::NotFound,
            Error::RoleNotPermitted { .. }
            | Error::RoleNameInvalid { .. }
            | Error::TokenNotVerified { .. } => ErrorCode::PermissionDenied,
            Error::UniquenessViolated { .. } => ErrorCode::Conflict,
            Error::DatabaseQueryFailed { source } => categorize_sqlx(source),
            _ => ErrorCode::Internal,
        }
    }
}

/// Classifies a driver error by its SQLSTATE. Constraint failures surface as
/// `conflict`, privilege failures as `permission-denied`, and everything else
/// as `internal`.
fn categorize_sqlx(source: &sqlx::Error) -> ErrorCode {
    if let sqlx::Error::Database(db_err) = source {
        match db_err.code().as_deref() {
            // ER_DUP_ENTRY, ER_ROW_IS_REFERENCED_2, ER_NO_REFERENCED_ROW_2
            Some("23000") => ErrorCode::Conflict,
            // ER_TABLEACCESS_DENIED_ERROR, ER_ACCESS_DENIED_ERROR
            Some("42000") | Some("28000") => ErrorCode::PermissionDenied,
            _ => ErrorCode::Internal,
        }
    } else if matches!(source, sqlx::Error::RowNotFound) {
        ErrorCode::NotFound
    } else {
        ErrorCode::Internal
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Error::CatalogQueryFailed { source } => {
                write!(f, "Schema catalog introspection failed. Source error: {}", source)
            }
            Error::ConfigOpenFailed { path, source } => {
                write!(f, "Config file {} could not be opened. Source error: {}", path, source)
            }
            Error::ConfigDeserializationFailed { source } => {
                write!(f, "Failed to deserialize configuration. Source error: {}", source)
            }
            Error::ConfigInvalid { failures } => {
                write!(f, "Configuration validation failed: {}", failures.join("; "))
            }
            Error::CursorMismatched {
                expected_type,
                found_type,
                expected_key,
                found_key,
            } => {
                write!(
                    f,
                    "Cursor does not match this query: expected type {} with order key {}, found type {} with order key {}",
                    expected_type, expected_key, found_type, found_key
                )
            }
            Error::CursorNotParsed { reason } => {
                write!(f, "Pagination cursor could not be decoded: {}", reason)
            }
            Error::DatabaseMismatched { discrete, dsn } => {
                write!(
                    f,
                    "Database name mismatch: database.database is {} but the DSN names {}",
                    discrete, dsn
                )
            }
            Error::DatabaseNotNamed => {
                write!(
                    f,
                    "No database selected. Set database.database, embed a database in the DSN, or provide one in the defaults file."
                )
            }
            Error::DatabaseQueryFailed { source } => {
                write!(f, "Database query failed. Source error: {}", source)
            }
            Error::DsnNotParsed { dsn } => {
                write!(f, "DSN could not be parsed: {}", dsn)
            }
            Error::InputItemNotFound { name } => {
                write!(f, "Could not find an expected argument, {}, in the GraphQL query.", name)
            }
            Error::MycnfConflicted => {
                write!(f, "mycnf_file cannot be combined with dsn or dsn_file")
            }
            Error::NodeIdNotParsed { reason } => {
                write!(f, "Node ID could not be decoded: {}", reason)
            }
            Error::PoolNotBuilt { source } => {
                write!(f, "Could not build database connection pool. Source error: {}", source)
            }
            Error::PortOutOfRange { value } => {
                write!(f, "Port {} is out of range; valid ports are 1-65535", value)
            }
            Error::RoleNotPermitted { role } => {
                write!(f, "Database role {} is not permitted for this request", role)
            }
            Error::RoleNameInvalid { role } => {
                write!(f, "Database role name {} is not a valid identifier", role)
            }
            Error::RowNotFound { type_name } => {
                write!(f, "No {} row matches the requested identifier", type_name)
            }
            Error::ScalarNotParsed { type_name, value } => {
                write!(f, "Value {} is not a valid {}", value, type_name)
            }
            Error::SchemaItemNotFound { name } => {
                write!(f, "The following item could not be found in the schema: {}", name)
            }
            Error::SecretReadFailed { path, source } => {
                write!(f, "Secret source {} could not be read. Source error: {}", path, source)
            }
            Error::ServerNotStarted { source } => {
                write!(f, "HTTP server failed to start. Source error: {}", source)
            }
            Error::SnapshotNotBuilt { message } => {
                write!(f, "Schema snapshot build failed: {}", message)
            }
            Error::SslModeNotRecognized { mode } => {
                write!(f, "Unknown ssl-mode {} in MySQL defaults file", mode)
            }
            Error::StdinSourceConflicted { keys } => {
                write!(
                    f,
                    "At most one secret source may read standard input, but @- is set on: {}",
                    keys.join(", ")
                )
            }
            Error::TokenNotVerified { reason } => {
                write!(f, "Bearer token failed verification: {}", reason)
            }
            Error::TransactionFinished => {
                write!(f, "Cannot use a mutation transaction already committed or rolled back.")
            }
            Error::TypeConversionFailed { src, dst } => {
                write!(f, "The type or value {} could not be converted to type {}", src, dst)
            }
            Error::UniquenessViolated { detail } => {
                write!(f, "A database constraint rejected the mutation: {}", detail)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::CatalogQueryFailed { source } => Some(source),
            Error::ConfigOpenFailed { source, .. } => Some(source),
            Error::ConfigDeserializationFailed { source } => Some(source),
            Error::DatabaseQueryFailed { source } => Some(source),
            Error::PoolNotBuilt { source } => Some(source),
            Error::SecretReadFailed { source, .. } => Some(source),
            Error::ServerNotStarted { source } => Some(source),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::ConfigDeserializationFailed { source: e }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::DatabaseQueryFailed { source: e }
    }
}

impl From<Error> for juniper::FieldError {
    fn from(e: Error) -> Self {
        let code = e.code();
        // Driver detail is logged where the error arose, never echoed.
        let message = match (&e, code) {
            (Error::DatabaseQueryFailed { .. }, ErrorCode::Conflict) => {
                "a database constraint rejected the mutation".to_string()
            }
            (Error::DatabaseQueryFailed { .. }, ErrorCode::PermissionDenied) => {
                "database permission denied".to_string()
            }
            (Error::DatabaseQueryFailed { .. }, ErrorCode::NotFound) => {
                "row not found".to_string()
            }
            (_, ErrorCode::Internal) => "internal error".to_string(),
            _ => format!("{}", e),
        };
        let code_str = code.as_str();
        juniper::FieldError::new(message, graphql_value!({ "code": (code_str) }))
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode};

    /// Passes if a new error with no wrapped source error is created
    #[test]
    fn new_error() {
        let e = Error::DatabaseNotNamed;

        assert!(std::error::Error::source(&e).is_none());
    }

    /// Passes if an error prints a display string correctly
    #[test]
    fn display_fmt() {
        let s = std::io::Error::new(std::io::ErrorKind::Other, "oh no!");
        let e = Error::SecretReadFailed {
            path: "/run/secret".to_string(),
            source: s,
        };

        assert_eq!(
            "Secret source /run/secret could not be read. Source error: oh no!",
            &format!("{}", e)
        );
    }

    /// Passes if the database mismatch message names both databases
    #[test]
    fn mismatch_names_both_sources() {
        let e = Error::DatabaseMismatched {
            discrete: "y".to_string(),
            dsn: "x".to_string(),
        };
        let msg = format!("{}", e);

        assert!(msg.contains("mismatch"));
        assert!(msg.contains('x'));
        assert!(msg.contains('y'));
    }

    /// Passes if errors map onto the expected machine codes
    #[test]
    fn machine_codes() {
        assert_eq!(
            ErrorCode::InvalidArgument,
            Error::CursorNotParsed {
                reason: "bad".to_string()
            }
            .code()
        );
        assert_eq!(
            ErrorCode::NotFound,
            Error::RowNotFound {
                type_name: "User".to_string()
            }
            .code()
        );
        assert_eq!(
            ErrorCode::PermissionDenied,
            Error::RoleNotPermitted {
                role: "analyst".to_string()
            }
            .code()
        );
        assert_eq!(
            ErrorCode::Conflict,
            Error::UniquenessViolated {
                detail: "duplicate".to_string()
            }
            .code()
        );
        assert_eq!(ErrorCode::Internal, Error::DatabaseNotNamed.code());
    }

    /// Passes if the Error implements the Send trait
    #[test]
    fn test_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Error>();
    }

    /// Passes if Error implements the Sync trait
    #[test]
    fn test_sync() {
        fn assert_sync<T: Sync>() {}
        assert_sync::<Error>();
    }
}
