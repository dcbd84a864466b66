pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{rate_limit_middleware, RateLimitRule, RateLimiter},
    tracing::request_id_middleware,
};
use service_core::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::IdentityConfig;
use crate::db::{
    MongoConsentRepository, MongoDb, MongoPrivacyRepository, MongoSessionRepository,
    MongoTwoFactorRepository,
};
use crate::middleware::rate_limit as classes;
use crate::models::SessionCleanupReport;
use crate::repository::{
    ConsentRepository, InMemoryConsentRepository, InMemoryPrivacyRepository,
    InMemorySessionRepository, InMemoryTwoFactorRepository, PrivacyRepository, SessionRepository,
    TwoFactorRepository,
};
use crate::services::{
    AuthEventLogger, AuthNotifier, ConsentService, PrivacyService, RevocationList, ServiceError,
    SessionService, SsoService, TokenService, TwoFactorService,
};

/// Document repositories backing the services.
#[derive(Clone)]
pub struct Repositories {
    pub sessions: Arc<dyn SessionRepository>,
    pub two_factor: Arc<dyn TwoFactorRepository>,
    pub consent: Arc<dyn ConsentRepository>,
    pub privacy: Arc<dyn PrivacyRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(InMemorySessionRepository::new()),
            two_factor: Arc::new(InMemoryTwoFactorRepository::new()),
            consent: Arc::new(InMemoryConsentRepository::new()),
            privacy: Arc::new(InMemoryPrivacyRepository::new()),
        }
    }

    pub fn mongo(db: &MongoDb) -> Self {
        Self {
            sessions: Arc::new(MongoSessionRepository::new(db)),
            two_factor: Arc::new(MongoTwoFactorRepository::new(db)),
            consent: Arc::new(MongoConsentRepository::new(db)),
            privacy: Arc::new(MongoPrivacyRepository::new(db)),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub store: Arc<dyn Store>,
    pub db: Option<MongoDb>,
    pub events: Arc<AuthEventLogger>,
    pub notifier: AuthNotifier,
    pub tokens: TokenService,
    pub sso: SsoService,
    pub sessions: SessionService,
    pub two_factor: TwoFactorService,
    pub consent: ConsentService,
    pub privacy: PrivacyService,
    pub rate_limiter: RateLimiter,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: IdentityConfig,
        store: Arc<dyn Store>,
        repositories: Repositories,
        events: Arc<AuthEventLogger>,
    ) -> Result<Self, ServiceError> {
        let notifier = AuthNotifier::default();

        let sessions = SessionService::new(
            repositories.sessions,
            &config.session,
            events.clone(),
            notifier.clone(),
        );
        let tokens = TokenService::new(
            &config.jwt,
            RevocationList::new(store.clone()),
            events.clone(),
        )?
        .with_notifier(notifier.clone())
        .with_sessions(sessions.clone());

        let sso = SsoService::new(
            tokens.clone(),
            store.clone(),
            config.environment,
            events.clone(),
            notifier.clone(),
        );
        let two_factor =
            TwoFactorService::new(repositories.two_factor, &config.two_factor, events.clone());
        let consent = ConsentService::new(repositories.consent, events.clone());
        let privacy = PrivacyService::new(repositories.privacy);

        Ok(Self {
            rate_limiter: RateLimiter::new(store.clone()),
            config,
            store,
            db: None,
            events,
            notifier,
            tokens,
            sso,
            sessions,
            two_factor,
            consent,
            privacy,
            metrics: None,
        })
    }

    /// Include MongoDB in health checks.
    pub fn with_db(mut self, db: MongoDb) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, AppError> {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-csrf-token"),
        ]);

    // Credentials cannot be combined with a wildcard origin
    if allowed_origins.iter().any(|o| o == "*") {
        return Ok(layer.allow_origin(AllowOrigin::any()));
    }

    let origins = allowed_origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid CORS origin '{}': {}", o, e))
            })
        })
        .collect::<Result<Vec<HeaderValue>, AppError>>()?;

    Ok(layer.allow_origin(origins).allow_credentials(true))
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let rules = state.config.rate_limit.clone();
    let hops = state.config.security.trusted_proxy_hops;
    let limit = |class: &'static str, rule: RateLimitRule| {
        from_fn_with_state(
            middleware::route_limit(
                &state.rate_limiter,
                class,
                rule,
                hops,
                state.events.clone(),
            ),
            rate_limit_middleware,
        )
    };

    // Routes that need a bearer access token
    let authenticated = Router::new()
        .route("/auth/sessions", get(handlers::sessions::list_sessions))
        .route(
            "/auth/sessions/:session_id",
            axum::routing::delete(handlers::sessions::revoke_session),
        )
        .route(
            "/auth/consent",
            get(handlers::consent::get_consent).put(handlers::consent::update_consent),
        )
        .route(
            "/auth/consent/history",
            get(handlers::consent::consent_history),
        )
        .route(
            "/auth/privacy",
            get(handlers::consent::get_privacy).put(handlers::consent::update_privacy),
        )
        .route(
            "/auth/privacy/blocked/:user_id",
            put(handlers::consent::block_user).delete(handlers::consent::unblock_user),
        )
        .route(
            "/auth/2fa",
            get(handlers::two_factor::status).delete(handlers::two_factor::disable),
        )
        .merge(
            Router::new()
                .route("/auth/sso/generate", post(handlers::sso::generate))
                .layer(limit(classes::SSO, rules.sso)),
        )
        .merge(
            Router::new()
                .route("/auth/2fa/verify", post(handlers::two_factor::verify))
                .layer(limit(classes::LOGIN, rules.login)),
        )
        .merge(
            Router::new()
                .route("/auth/2fa/setup", post(handlers::two_factor::setup))
                .route("/auth/2fa/enable", post(handlers::two_factor::enable))
                .route(
                    "/auth/2fa/backup-codes",
                    post(handlers::two_factor::regenerate_backup_codes),
                )
                .layer(limit(classes::TWO_FACTOR, rules.two_factor)),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/metrics/auth", get(handlers::metrics::auth_metrics))
        .merge(
            Router::new()
                .route("/auth/token/refresh", post(handlers::token::refresh))
                .layer(limit(classes::REFRESH, rules.refresh)),
        )
        .merge(
            Router::new()
                .route("/auth/sso/verify", post(handlers::sso::verify))
                .layer(limit(classes::SSO, rules.sso)),
        )
        .merge(authenticated)
        .with_state(state.clone())
        // Global per-IP ceiling
        .layer(limit(classes::GENERAL, rules.general))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins)?);

    Ok(app)
}

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MaintenanceReport {
    pub store_entries: usize,
    pub sessions: SessionCleanupReport,
}

/// Sweep elapsed store keys (rate-limit windows, revocation markers, SSO
/// exchanges) and expired sessions. Failures are logged, never returned.
pub async fn run_maintenance(state: &AppState) -> MaintenanceReport {
    let store_entries = match state.sso.cleanup_expired().await {
        Ok(purged) => purged,
        Err(e) => {
            tracing::error!(error = %e, "Store sweep failed");
            0
        }
    };
    let sessions = state.sessions.cleanup_expired().await;

    tracing::info!(
        store_entries,
        sessions_deleted = sessions.deleted,
        failed_batches = sessions.failed_batches,
        "Maintenance pass complete"
    );
    MaintenanceReport {
        store_entries,
        sessions,
    }
}

/// Run [`run_maintenance`] every `maintenance_interval_seconds`.
pub fn spawn_maintenance(state: AppState) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(state.config.maintenance_interval_seconds.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_maintenance(&state).await;
        }
    })
}
