pub mod auth;
pub mod health;
pub mod messages;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::config::Config;
use crate::AppState;

/// HTTP and gateway routes, without state or middleware.
pub fn router(config: &Config) -> Router<AppState> {
    let router = Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .merge(auth::router(config.enable_register))
        .merge(messages::router());

    match &config.frontend_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true)),
        None => router,
    }
}

/// The complete application: routes, state, CORS and request tracing.
pub fn app(state: AppState) -> Router {
    let mut app = router(&state.config).layer(TraceLayer::new_for_http());

    let origins: Vec<HeaderValue> = state
        .config
        .allow_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    if !origins.is_empty() {
        let cors = CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app.with_state(state)
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::register,
        auth::login,
        messages::list_messages,
        messages::clear_messages,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            health::HealthResponse,
            auth::CredentialsRequest,
            auth::LoginResponse,
            auth::MessageResponse,
            messages::HistoryEntry,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Auth", description = "Registration and login"),
        (name = "Messages", description = "Message history"),
    )
)]
pub struct ApiDoc;
