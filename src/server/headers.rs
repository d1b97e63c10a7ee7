//! Extraction of caller identity from request headers. The database role may
//! be named by the `x-tigql-role` header or by the token's role claim, but
//! the request context is marked validated only after the bearer token
//! passes OIDC verification; nothing client-supplied can set that flag.

use crate::engine::context::RequestContext;
use crate::server::auth::AuthState;
use actix_web::dev::Payload;
use actix_web::error::ErrorUnauthorized;
use actix_web::http::header::AUTHORIZATION;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};
use log::debug;
use std::future::{ready, Ready};

pub(crate) const ROLE_HEADER: &str = "x-tigql-role";

/// Extractor producing the request's [`RequestContext`].
pub struct RoleHeaders {
    context: RequestContext,
}

impl RoleHeaders {
    pub fn into_context(self) -> RequestContext {
        self.context
    }

    fn from_http(req: &HttpRequest) -> Result<RoleHeaders, actix_web::Error> {
        let header_role = req
            .headers()
            .get(ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let verifier = req
            .app_data::<Data<AuthState>>()
            .and_then(|state| state.verifier());
        let context = match (verifier, bearer_token(req)) {
            // a presented token must verify or the request is rejected
            (Some(verifier), Some(token)) => match verifier.verify(token) {
                Ok(claims) => {
                    let role = claims.role().cloned().or(header_role);
                    RequestContext::with_role(role, true)
                }
                Err(e) => {
                    debug!("rejecting bearer token: {}", e);
                    return Err(ErrorUnauthorized("invalid bearer token"));
                }
            },
            // no token, or verification not enabled: the role rides along
            // unvalidated and is never honored for session switching
            _ => RequestContext::with_role(header_role, false),
        };
        Ok(RoleHeaders { context })
    }
}

pub(crate) fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

impl FromRequest for RoleHeaders {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(RoleHeaders::from_http(req))
    }
}

#[cfg(test)]
mod tests {
    use super::RoleHeaders;
    use crate::engine::config::OidcConfig;
    use crate::server::auth::{AuthState, OidcVerifier};
    use actix_web::test::TestRequest;
    use actix_web::web::Data;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn auth_state() -> Data<AuthState> {
        let cfg: OidcConfig = serde_yaml::from_str(
            "enabled: true\nissuer: https://issuer.test\naudience: tigql\nalgorithm: HS256\nsecret: s3cret\n",
        )
        .unwrap();
        Data::new(AuthState::new(Some(
            OidcVerifier::from_config(&cfg).unwrap(),
        )))
    }

    fn bearer(claims: serde_json::Value) -> String {
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        format!("Bearer {}", token)
    }

    /// Passes if a bare role header is extracted but never validated
    #[test]
    fn role_header_unvalidated() {
        let req = TestRequest::default()
            .insert_header(("x-tigql-role", "analyst"))
            .to_http_request();
        let ctx = RoleHeaders::from_http(&req).unwrap().into_context();

        assert_eq!(Some(&"analyst".to_string()), ctx.role());
        assert!(!ctx.validated());
        assert!(ctx.effective_role().is_none());
    }

    /// Passes if a verified token validates the request and supplies the
    /// role from its claim
    #[test]
    fn verified_token_validates() {
        let req = TestRequest::default()
            .app_data(auth_state())
            .insert_header((
                "authorization",
                bearer(json!({
                    "sub": "user-1",
                    "iss": "https://issuer.test",
                    "aud": "tigql",
                    "exp": chrono::Utc::now().timestamp() + 3600,
                    "db_role": "analyst"
                })),
            ))
            .to_http_request();
        let ctx = RoleHeaders::from_http(&req).unwrap().into_context();

        assert!(ctx.validated());
        assert_eq!(Some(&"analyst".to_string()), ctx.effective_role());
    }

    /// Passes if a verified token without a role claim falls back to the
    /// role header, still validated
    #[test]
    fn token_without_role_claim_uses_header() {
        let req = TestRequest::default()
            .app_data(auth_state())
            .insert_header(("x-tigql-role", "reporting"))
            .insert_header((
                "authorization",
                bearer(json!({
                    "sub": "user-1",
                    "iss": "https://issuer.test",
                    "aud": "tigql",
                    "exp": chrono::Utc::now().timestamp() + 3600
                })),
            ))
            .to_http_request();
        let ctx = RoleHeaders::from_http(&req).unwrap().into_context();

        assert!(ctx.validated());
        assert_eq!(Some(&"reporting".to_string()), ctx.effective_role());
    }

    /// Passes if a presented but invalid token rejects the request outright
    #[test]
    fn invalid_token_rejected() {
        let req = TestRequest::default()
            .app_data(auth_state())
            .insert_header(("authorization", "Bearer tampered"))
            .to_http_request();

        assert!(RoleHeaders::from_http(&req).is_err());
    }

    /// Passes if a role header cannot self-validate even when verification
    /// is enabled
    #[test]
    fn header_cannot_self_validate() {
        let req = TestRequest::default()
            .app_data(auth_state())
            .insert_header(("x-tigql-role", "analyst"))
            .to_http_request();
        let ctx = RoleHeaders::from_http(&req).unwrap().into_context();

        assert!(!ctx.validated());
        assert!(ctx.effective_role().is_none());
    }
}
