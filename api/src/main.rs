use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod error;
mod extract;
mod middleware;
mod providers;
mod routes;
mod state;

use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::postgres::{PgAuditLog, PgFeatureGate, PgMemoryStore, PgToolData, PgToolRoutes};
use providers::upstash::{UpstashVectorIndex, VectorIndexConfig};
use routes::chat::{ChatPolicy, ChatServices, SlidingWindowLimiter};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Fokus Assistant API",
        version = "0.1.0",
        description = "Conversational assistant for the Fokus focus-coaching platform: grounded answers about the product plus live personal data for signed-in members."
    ),
    paths(
        routes::health::health_check,
        routes::chat::chat,
        routes::system::get_assistant_status,
        routes::system::set_assistant_status,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::system::AssistantStatusResponse,
        routes::system::SetAssistantStatusRequest,
        fokus_core::error::ApiError,
        fokus_core::chat::ChatRequest,
        fokus_core::chat::ChatResponse,
        fokus_core::chat::Language,
        fokus_core::chat::RetrievalContext,
        fokus_core::chat::MemoryEntry,
        fokus_core::chat::RedactionStatus,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

fn build_chat_services(pool: &sqlx::PgPool) -> ChatServices {
    let openai = Arc::new(
        OpenAiConfig::from_env()
            .and_then(OpenAiProvider::new)
            .expect("OpenAI provider configuration"),
    );
    let vector_index = Arc::new(
        VectorIndexConfig::from_env()
            .and_then(UpstashVectorIndex::new)
            .expect("vector index configuration"),
    );

    ChatServices {
        moderation: openai.clone(),
        embedder: openai.clone(),
        vector_index,
        generator: openai,
        gate: Arc::new(PgFeatureGate::new(pool.clone())),
        memory: Arc::new(PgMemoryStore::new(pool.clone())),
        audit: Arc::new(PgAuditLog::new(pool.clone())),
        tools: Arc::new(PgToolData::new(pool.clone())),
        tool_routes: Arc::new(PgToolRoutes::new(pool.clone())),
        policy: ChatPolicy::default(),
    }
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fokus_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Database connection
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let app_state = state::AppState {
        db: pool.clone(),
        chat: Arc::new(build_chat_services(&pool)),
        limiter: Arc::new(SlidingWindowLimiter::default()),
    };

    // CORS
    let cors_layer = middleware::cors::build_cors_layer();

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::chat::router())
        .merge(routes::system::router())
        .layer(auth::InjectAuthLayer::new(app_state.db.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Fokus API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
