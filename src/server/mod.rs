//! HTTP surface for the gateway: the GraphQL endpoint with its optional
//! playground, health and admin routes, the Prometheus endpoint, and the
//! middleware chain wiring them together.

pub(crate) mod auth;
pub mod headers;
pub mod metrics;

use crate::engine::config::Config;
use crate::engine::database::mysql::MySqlEndpoint;
use crate::engine::snapshot::SnapshotManager;
use crate::server::auth::{AuthState, OidcVerifier};
use crate::server::headers::{bearer_token, RoleHeaders};
use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::middleware::Logger;
use actix_web::web::{self, Data, Json};
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, Responder};
use juniper::http::playground::playground_source;
use juniper::InputValue;
use log::{debug, error};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
struct AppData {
    manager: SnapshotManager,
    endpoint: Arc<MySqlEndpoint>,
    config: Config,
}

/// Wire shape of a GraphQL-over-HTTP request body.
#[derive(Debug, Deserialize)]
struct HttpGraphQLRequest {
    query: String,
    #[serde(rename = "operationName")]
    operation_name: Option<String>,
    variables: Option<serde_json::Value>,
}

async fn execute_graphql(
    data: &AppData,
    request: HttpGraphQLRequest,
    role: RoleHeaders,
) -> HttpResponse {
    metrics::request_served();
    let context = role.into_context();
    let engine = data.manager.handler_for_context(&context);
    let variables: Option<InputValue> = request
        .variables
        .and_then(|v| serde_json::from_value(v).ok());
    match engine
        .execute(request.query, request.operation_name, variables, context)
        .await
    {
        Ok(body) => HttpResponse::Ok()
            .content_type("application/json")
            .json(body),
        Err(e) => {
            error!("graphql request failed: {}", e);
            HttpResponse::Ok().content_type("application/json").json(json!({
                "errors": [{
                    "message": "request failed",
                    "extensions": { "code": e.code().as_str() }
                }]
            }))
        }
    }
}

async fn graphql_post(
    data: Data<AppData>,
    request: Json<HttpGraphQLRequest>,
    role: RoleHeaders,
) -> impl Responder {
    debug!("POST /graphql");
    execute_graphql(&data, request.into_inner(), role).await
}

#[derive(Debug, Deserialize)]
struct GetQuery {
    query: Option<String>,
    #[serde(rename = "operationName")]
    operation_name: Option<String>,
    variables: Option<String>,
}

async fn graphql_get(
    data: Data<AppData>,
    params: web::Query<GetQuery>,
    role: RoleHeaders,
) -> impl Responder {
    let params = params.into_inner();
    match params.query {
        None => {
            if data.config.server().playground_enabled {
                HttpResponse::Ok()
                    .content_type("text/html; charset=utf-8")
                    .body(playground_source("/graphql", None))
            } else {
                HttpResponse::NotFound().finish()
            }
        }
        Some(query) => {
            let variables = params
                .variables
                .as_deref()
                .and_then(|v| serde_json::from_str(v).ok());
            let request = HttpGraphQLRequest {
                query,
                operation_name: params.operation_name,
                variables,
            };
            execute_graphql(&data, request, role).await
        }
    }
}

/// Health is a bounded database ping and nothing else; the GraphQL surface
/// keeps serving the last snapshot even while unhealthy.
async fn health(data: Data<AppData>) -> impl Responder {
    let timeout = Duration::from_secs(
        data.config.database().connection_timeout_secs.min(5),
    );
    match data.endpoint.ping(timeout).await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "status": "healthy",
            "database": "ok"
        })),
        Err(e) => {
            error!("health check failed: {}", e);
            HttpResponse::ServiceUnavailable().json(json!({
                "status": "unhealthy",
                "database": "failed"
            }))
        }
    }
}

/// Admin requests are authorized by the static token header or by a bearer
/// token that passes OIDC verification.
fn admin_authorized(data: &AppData, auth: &AuthState, req: &HttpRequest) -> bool {
    let expected = &data.config.admin().auth_token;
    if !expected.is_empty() {
        let presented = req
            .headers()
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented == Some(expected.as_str()) {
            return true;
        }
    }
    match (auth.verifier(), bearer_token(req)) {
        (Some(verifier), Some(token)) => match verifier.verify(token) {
            Ok(_) => true,
            Err(e) => {
                error!("admin bearer token rejected: {}", e);
                false
            }
        },
        _ => false,
    }
}

async fn reload_schema(
    data: Data<AppData>,
    auth: Data<AuthState>,
    req: HttpRequest,
) -> impl Responder {
    if !data.config.admin().enabled {
        return HttpResponse::NotFound().finish();
    }
    if !admin_authorized(&data, &auth, &req) {
        return HttpResponse::Unauthorized().json(json!({
            "status": "error",
            "message": "missing or invalid admin credentials"
        }));
    }
    let timeout = Duration::from_secs(data.config.database().connection_timeout_secs.max(10));
    match tokio::time::timeout(timeout, data.manager.refresh_now()).await {
        Ok(Ok(())) => HttpResponse::Ok().json(json!({ "status": "ok" })),
        Ok(Err(e)) => {
            error!("admin schema reload failed: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "status": "error",
                "message": "schema reload failed"
            }))
        }
        Err(_) => {
            error!("admin schema reload timed out");
            HttpResponse::InternalServerError().json(json!({
                "status": "error",
                "message": "schema reload failed"
            }))
        }
    }
}

async fn metrics_endpoint(data: Data<AppData>) -> impl Responder {
    if !data.config.metrics().enabled {
        return HttpResponse::NotFound().finish();
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::render())
}

async fn index() -> impl Responder {
    HttpResponse::Found()
        .insert_header(("location", "/graphql"))
        .finish()
}

fn cors_layer(config: &Config) -> Cors {
    let cors_cfg = config.cors();
    let wildcard = cors_cfg.allowed_origins.iter().any(|o| o == "*");
    let mut cors = if wildcard {
        Cors::default().allow_any_origin()
    } else {
        let mut c = Cors::default();
        for origin in &cors_cfg.allowed_origins {
            c = c.allowed_origin(origin);
        }
        c
    };
    cors = cors
        .allow_any_header()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"]);
    // credentials are never combined with a wildcard origin
    if cors_cfg.allow_credentials && !wildcard {
        cors = cors.supports_credentials();
    }
    cors
}

/// Builds and starts the HTTP server. The OIDC verifier is constructed here
/// so unusable key material fails startup. The returned handle is used by
/// the lifecycle orchestrator to stop accepting traffic during shutdown.
pub fn run(
    manager: SnapshotManager,
    endpoint: Arc<MySqlEndpoint>,
    config: Config,
) -> Result<Server, crate::Error> {
    let bind_addr = (
        config.server().host.clone(),
        config.server().port as u16,
    );
    let data = AppData {
        manager,
        endpoint,
        config: config.clone(),
    };
    let verifier = if config.auth().oidc.enabled() {
        Some(OidcVerifier::from_config(&config.auth().oidc)?)
    } else {
        None
    };
    let auth_state = Data::new(AuthState::new(verifier));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(data.clone()))
            .app_data(auth_state.clone())
            .wrap(Logger::default())
            .wrap(cors_layer(&data.config))
            .route("/graphql", web::post().to(graphql_post))
            .route("/graphql", web::get().to(graphql_get))
            .route("/health", web::get().to(health))
            .route("/admin/reload-schema", web::post().to(reload_schema))
            .route("/metrics", web::get().to(metrics_endpoint))
            .route("/", web::get().to(index))
    })
    .bind(bind_addr)
    .map_err(|e| crate::Error::ServerNotStarted { source: e })?
    .run();

    Ok(server)
}
