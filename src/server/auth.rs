//! OIDC bearer-token verification. Tokens are checked for signature, expiry,
//! issuer, and audience against the configured identity provider; the
//! `Validated` flag on a request context is set only from a token that
//! passed here, never from request headers.

use crate::engine::config::OidcConfig;
use crate::error::Error;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use log::debug;
use serde::Deserialize;
use std::fs;

/// Claims the gateway reads from a verified token. Registered claims used
/// for validation (exp, iss, aud) are checked by the decoder and need not be
/// carried here.
#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Identity facts extracted from a verified token.
#[derive(Clone, Debug)]
pub(crate) struct VerifiedClaims {
    subject: Option<String>,
    role: Option<String>,
}

impl VerifiedClaims {
    pub(crate) fn subject(&self) -> Option<&String> {
        self.subject.as_ref()
    }

    pub(crate) fn role(&self) -> Option<&String> {
        self.role.as_ref()
    }
}

/// Verifies OIDC bearer tokens against the configured issuer and audience.
/// Built once at startup; construction fails fatally on unusable key
/// material.
pub(crate) struct OidcVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    role_claim: String,
}

impl OidcVerifier {
    pub(crate) fn from_config(config: &OidcConfig) -> Result<OidcVerifier, Error> {
        let algorithm = parse_algorithm(config.algorithm())?;
        let decoding_key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                if config.secret().is_empty() {
                    return Err(Error::ConfigInvalid {
                        failures: vec![format!(
                            "auth.oidc.secret: {} verification requires a shared secret",
                            config.algorithm()
                        )],
                    });
                }
                DecodingKey::from_secret(config.secret().as_bytes())
            }
            _ => {
                if config.public_key_file().is_empty() {
                    return Err(Error::ConfigInvalid {
                        failures: vec![format!(
                            "auth.oidc.public_key_file: {} verification requires a public key",
                            config.algorithm()
                        )],
                    });
                }
                let pem = fs::read(config.public_key_file()).map_err(|e| {
                    Error::SecretReadFailed {
                        path: config.public_key_file().to_string(),
                        source: e,
                    }
                })?;
                DecodingKey::from_rsa_pem(&pem).map_err(|e| Error::ConfigInvalid {
                    failures: vec![format!(
                        "auth.oidc.public_key_file: not a usable RSA public key: {}",
                        e
                    )],
                })?
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[config.issuer()]);
        validation.set_audience(&[config.audience()]);

        Ok(OidcVerifier {
            decoding_key,
            validation,
            role_claim: config.role_claim().to_string(),
        })
    }

    /// Verifies one bearer token and extracts the subject and database role.
    pub(crate) fn verify(&self, token: &str) -> Result<VerifiedClaims, Error> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            Error::TokenNotVerified {
                reason: e.to_string(),
            }
        })?;
        let role = data
            .claims
            .extra
            .get(&self.role_claim)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        debug!(
            "verified token -- subject: {:?}, role claim {}: {:?}",
            data.claims.sub, self.role_claim, role
        );
        Ok(VerifiedClaims {
            subject: data.claims.sub,
            role,
        })
    }
}

fn parse_algorithm(name: &str) -> Result<Algorithm, Error> {
    match name {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        other => Err(Error::ConfigInvalid {
            failures: vec![format!("auth.oidc.algorithm: unsupported algorithm {}", other)],
        }),
    }
}

/// Shared handler state: the verifier when OIDC is enabled, `None` otherwise.
pub(crate) struct AuthState {
    verifier: Option<OidcVerifier>,
}

impl AuthState {
    pub(crate) fn new(verifier: Option<OidcVerifier>) -> AuthState {
        AuthState { verifier }
    }

    pub(crate) fn verifier(&self) -> Option<&OidcVerifier> {
        self.verifier.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthState, OidcVerifier};
    use crate::engine::config::OidcConfig;
    use crate::error::Error;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn config(secret: &str) -> OidcConfig {
        let yaml = format!(
            "enabled: true\nissuer: https://issuer.test\naudience: tigql\nalgorithm: HS256\nsecret: {}\n",
            secret
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn token(secret: &str, claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn valid_claims() -> serde_json::Value {
        json!({
            "sub": "user-1",
            "iss": "https://issuer.test",
            "aud": "tigql",
            "exp": chrono::Utc::now().timestamp() + 3600,
            "db_role": "analyst"
        })
    }

    /// Passes if a well-formed token verifies and yields the role claim
    #[test]
    fn verify_extracts_role() {
        let verifier = OidcVerifier::from_config(&config("s3cret")).unwrap();
        let claims = verifier.verify(&token("s3cret", valid_claims())).unwrap();

        assert_eq!(Some(&"user-1".to_string()), claims.subject());
        assert_eq!(Some(&"analyst".to_string()), claims.role());
    }

    /// Passes if a token signed with a different secret is rejected
    #[test]
    fn wrong_signature_rejected() {
        let verifier = OidcVerifier::from_config(&config("s3cret")).unwrap();

        assert!(matches!(
            verifier.verify(&token("other", valid_claims())),
            Err(Error::TokenNotVerified { .. })
        ));
    }

    /// Passes if issuer and audience mismatches are rejected
    #[test]
    fn issuer_audience_checked() {
        let verifier = OidcVerifier::from_config(&config("s3cret")).unwrap();

        let mut wrong_aud = valid_claims();
        wrong_aud["aud"] = json!("someone-else");
        assert!(verifier.verify(&token("s3cret", wrong_aud)).is_err());

        let mut wrong_iss = valid_claims();
        wrong_iss["iss"] = json!("https://rogue.test");
        assert!(verifier.verify(&token("s3cret", wrong_iss)).is_err());
    }

    /// Passes if an expired token is rejected
    #[test]
    fn expired_rejected() {
        let verifier = OidcVerifier::from_config(&config("s3cret")).unwrap();
        let mut expired = valid_claims();
        expired["exp"] = json!(chrono::Utc::now().timestamp() - 3600);

        assert!(verifier.verify(&token("s3cret", expired)).is_err());
    }

    /// Passes if garbage tokens are rejected as unverified
    #[test]
    fn garbage_rejected() {
        let verifier = OidcVerifier::from_config(&config("s3cret")).unwrap();

        assert!(matches!(
            verifier.verify("not-a-jwt"),
            Err(Error::TokenNotVerified { .. })
        ));
    }

    /// Passes if an HMAC algorithm without a secret fails construction
    #[test]
    fn missing_secret_fails() {
        let cfg: OidcConfig = serde_yaml::from_str(
            "enabled: true\nissuer: i\naudience: a\nalgorithm: HS256\n",
        )
        .unwrap();

        assert!(matches!(
            OidcVerifier::from_config(&cfg),
            Err(Error::ConfigInvalid { .. })
        ));
    }

    /// Passes if an unknown algorithm fails construction
    #[test]
    fn unknown_algorithm_fails() {
        let cfg: OidcConfig = serde_yaml::from_str(
            "enabled: true\nissuer: i\naudience: a\nalgorithm: ROT13\nsecret: s\n",
        )
        .unwrap();

        assert!(matches!(
            OidcVerifier::from_config(&cfg),
            Err(Error::ConfigInvalid { .. })
        ));
    }

    /// Passes if AuthState distinguishes enabled and disabled verification
    #[test]
    fn auth_state_modes() {
        assert!(AuthState::new(None).verifier().is_none());

        let verifier = OidcVerifier::from_config(&config("s3cret")).unwrap();
        assert!(AuthState::new(Some(verifier)).verifier().is_some());
    }
}
