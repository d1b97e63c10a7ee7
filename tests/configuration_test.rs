//! Configuration resolution scenarios: defaults files, precedence, effective
//! database selection, and validation boundaries.

mod setup;

use setup::init;
use std::io::Write;
use std::path::PathBuf;
use tigql::engine::config::{validate, CliArgs, Config};
use tigql::Error;

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tigql-config-tests");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{}", contents).unwrap();
    path
}

/// Passes if the mycnf startup scenario resolves every connection field and
/// reports the defaults file as the database source
#[test]
fn startup_with_mycnf() {
    init();
    let mycnf = temp_file(
        "scenario.cnf",
        "[client]\nhost=db\nport=4000\nuser=u\npassword=p\ndatabase=app\nssl-mode=REQUIRED\n",
    );

    let args = CliArgs {
        database_mycnf_file: Some(mycnf.to_string_lossy().into_owned()),
        ..CliArgs::default()
    };
    let config = Config::load(&args).unwrap();

    assert_eq!("db", config.database().host());
    assert_eq!(4000, config.database().port());
    assert_eq!("u", config.database().user());
    assert_eq!("p", config.database().password());
    assert_eq!("skip-verify", config.database().tls_mode());
    assert_eq!(
        ("app".to_string(), "mycnf"),
        config.effective_database().unwrap()
    );
}

/// Passes if combining a defaults file with a DSN fails startup
#[test]
fn mycnf_dsn_exclusive() {
    init();
    let mycnf = temp_file("exclusive.cnf", "[client]\nhost=db\n");

    let args = CliArgs {
        database_mycnf_file: Some(mycnf.to_string_lossy().into_owned()),
        database_dsn: Some("root:p@tcp(h:4000)/x".to_string()),
        ..CliArgs::default()
    };

    assert!(matches!(Config::load(&args), Err(Error::MycnfConflicted)));
}

/// Passes if the DSN/database mismatch scenario errors with both names
#[test]
fn dsn_database_mismatch() {
    init();
    let args = CliArgs {
        database_dsn: Some("root:p@tcp(h:4000)/x".to_string()),
        database_database: Some("y".to_string()),
        ..CliArgs::default()
    };
    let config = Config::load(&args).unwrap();

    let err = config.effective_database().unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("mismatch"));
    assert!(msg.contains('x'));
    assert!(msg.contains('y'));

    // validation folds the same failure into the report
    let report = validate::validate(&config);
    assert!(!report.is_ok());
}

/// Passes if a YAML file loads with flags taking precedence over it
#[test]
fn flags_over_file() {
    init();
    let yaml = temp_file(
        "layered.yml",
        "database:\n  host: from-file\n  database: app\nlog:\n  level: debug\n",
    );

    let args = CliArgs {
        config: Some(yaml.to_string_lossy().into_owned()),
        database_host: Some("from-flag".to_string()),
        ..CliArgs::default()
    };
    let config = Config::load(&args).unwrap();

    assert_eq!("from-flag", config.database().host());
    assert_eq!("debug", config.log().level());
    assert_eq!(
        ("app".to_string(), "database"),
        config.effective_database().unwrap()
    );
}

/// Passes if environment variables override the file but lose to flags
#[test]
fn env_between_file_and_flags() {
    init();
    let yaml = temp_file("env-layer.yml", "log:\n  level: warn\n");
    std::env::set_var("TIGQL_LOG_LEVEL", "trace");

    let args = CliArgs {
        config: Some(yaml.to_string_lossy().into_owned()),
        ..CliArgs::default()
    };
    let from_env = Config::load(&args).unwrap();

    let flag_args = CliArgs {
        config: Some(yaml.to_string_lossy().into_owned()),
        log_level: Some("error".to_string()),
        ..CliArgs::default()
    };
    let from_flag = Config::load(&flag_args).unwrap();
    std::env::remove_var("TIGQL_LOG_LEVEL");

    assert_eq!("trace", from_env.log().level());
    assert_eq!("error", from_flag.log().level());
}

/// Passes if a password file feeds the password field
#[test]
fn password_file_source() {
    init();
    let pw = temp_file("pw.txt", "sekrit\n");

    let args = CliArgs {
        database_password_file: Some(pw.to_string_lossy().into_owned()),
        ..CliArgs::default()
    };
    let config = Config::load(&args).unwrap();

    assert_eq!("sekrit", config.database().password());
}

/// Passes if an unknown YAML key is rejected by strict decoding
#[test]
fn strict_decoding() {
    init();
    let yaml = temp_file("unknown-key.yml", "databse:\n  host: oops\n");

    let args = CliArgs {
        config: Some(yaml.to_string_lossy().into_owned()),
        ..CliArgs::default()
    };

    assert!(matches!(
        Config::load(&args),
        Err(Error::ConfigDeserializationFailed { .. })
    ));
}

/// Passes if validation re-run on a passing config stays clean
#[test]
fn validation_idempotent() {
    init();
    let config = Config::default();

    let first = validate::validate(&config);
    assert!(first.is_ok());
    let second = validate::validate(&config);
    assert_eq!(first.errors(), second.errors());
    assert_eq!(first.warnings(), second.warnings());
}
