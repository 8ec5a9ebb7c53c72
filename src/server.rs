use crate::{AutomationEngine, RunRequest};
use axum::{
    extract::{Json, Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    routing::{get, post},
    Router,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// API key authentication for the execute/introspection routes.
#[derive(Clone)]
pub struct ApiKeyAuth {
    keys: HashSet<String>,
}

impl ApiKeyAuth {
    pub fn new(config_keys: Vec<String>) -> Self {
        let mut keys = HashSet::new();
        for key in config_keys {
            keys.insert(key);
        }

        // Environment keys take precedence over the config file.
        if let Ok(env_key) = std::env::var("ADPILOT_API_KEY") {
            if !env_key.is_empty() {
                keys.insert(env_key);
            }
        }
        if let Ok(env_keys) = std::env::var("ADPILOT_API_KEYS") {
            for key in env_keys.split(',') {
                let trimmed = key.trim();
                if !trimmed.is_empty() {
                    keys.insert(trimmed.to_string());
                }
            }
        }

        Self { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn validate(&self, api_key: &str) -> bool {
        self.keys.contains(api_key)
    }
}

pub async fn auth_middleware(
    State(auth): State<ApiKeyAuth>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    // No configured keys means open access.
    if auth.is_empty() {
        return Ok(next.run(request).await);
    }

    let api_key = headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !auth.validate(api_key) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

/// Token bucket limiting execute-route invocations.
struct RateLimiter {
    tokens: Mutex<u32>,
    max_tokens: u32,
    refill_interval: Duration,
    last_refill: Mutex<Instant>,
}

impl RateLimiter {
    fn new(requests_per_second: u32) -> Self {
        Self {
            tokens: Mutex::new(requests_per_second),
            max_tokens: requests_per_second,
            refill_interval: Duration::from_secs(1),
            last_refill: Mutex::new(Instant::now()),
        }
    }

    async fn allow(&self) -> bool {
        let mut tokens = self.tokens.lock().await;
        let mut last_refill = self.last_refill.lock().await;

        let elapsed = last_refill.elapsed();
        if elapsed >= self.refill_interval {
            let refills = (elapsed.as_secs_f64() / self.refill_interval.as_secs_f64()) as u32;
            *tokens = (*tokens + refills).min(self.max_tokens);
            *last_refill = Instant::now();
        }

        if *tokens > 0 {
            *tokens -= 1;
            true
        } else {
            false
        }
    }
}

pub struct ApiServer {
    engine: Arc<AutomationEngine>,
    rate_limiter: Option<Arc<RateLimiter>>,
    api_auth: ApiKeyAuth,
}

impl ApiServer {
    pub fn new(
        engine: Arc<AutomationEngine>,
        rate_limit: Option<u32>,
        api_keys: Vec<String>,
    ) -> Self {
        let rate_limiter = rate_limit.map(|rps| Arc::new(RateLimiter::new(rps)));
        let api_auth = ApiKeyAuth::new(api_keys);
        Self {
            engine,
            rate_limiter,
            api_auth,
        }
    }

    pub async fn run(self, port: u16) -> anyhow::Result<()> {
        let rate_limiter = self.rate_limiter.clone();
        let api_auth = self.api_auth.clone();

        let public_routes = Router::new()
            .route("/status", get(handle_status))
            .route("/health", get(handle_health))
            .route("/metrics", get(handle_metrics));

        let protected_routes = Router::new()
            .route("/rules", get(handle_rules))
            .route(
                "/api/v1/rules/:rule_id/execute",
                post(move |state, path, body| {
                    handle_execute_with_rate_limit(state, path, body, rate_limiter.clone())
                }),
            )
            .route(
                "/api/v1/rules/:rule_id/executions",
                get(handle_executions),
            )
            .layer(axum::middleware::from_fn_with_state(
                api_auth.clone(),
                auth_middleware,
            ));

        let app = Router::new()
            .merge(public_routes)
            .merge(protected_routes)
            .with_state(self.engine.clone());

        let addr = format!("0.0.0.0:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("adpilot server running on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("adpilot server shut down gracefully");
        Ok(())
    }
}

#[derive(Debug, serde::Deserialize, Default)]
#[serde(default)]
struct ExecuteBody {
    user_id: Option<String>,
    dry_run: bool,
    manual_run: bool,
}

async fn handle_execute_with_rate_limit(
    state: State<Arc<AutomationEngine>>,
    path: Path<String>,
    body: Json<ExecuteBody>,
    rate_limiter: Option<Arc<RateLimiter>>,
) -> (StatusCode, Json<Value>) {
    if let Some(limiter) = rate_limiter {
        if !limiter.allow().await {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "Rate limit exceeded",
                    "message": "Too many requests. Please try again later."
                })),
            );
        }
    }

    handle_execute(state, path, body).await
}

async fn handle_execute(
    State(engine): State<Arc<AutomationEngine>>,
    Path(rule_id): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> (StatusCode, Json<Value>) {
    let request_id = Uuid::new_v4().to_string();
    info!(request_id = %request_id, rule_id = %rule_id, dry_run = body.dry_run, "execute request");

    let request = RunRequest {
        rule_id: rule_id.clone(),
        user_id: body.user_id.unwrap_or_default(),
        dry_run: body.dry_run,
        manual_run: body.manual_run,
    };

    match engine.run(request).await {
        Ok(summary) => {
            let mut value = serde_json::to_value(&summary).unwrap_or(Value::Null);
            if let Some(obj) = value.as_object_mut() {
                obj.insert("request_id".to_string(), serde_json::json!(request_id));
            }
            (StatusCode::OK, Json(value))
        }
        Err(e) => {
            error!(request_id = %request_id, rule_id = %rule_id, error = %e, "run failed");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({
                    "error": e.to_string(),
                    "rule_id": rule_id,
                    "request_id": request_id,
                })),
            )
        }
    }
}

async fn handle_executions(
    State(engine): State<Arc<AutomationEngine>>,
    Path(rule_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match engine.execution_store().recent_records(&rule_id, 100).await {
        Ok(records) => (
            StatusCode::OK,
            Json(serde_json::json!({ "rule_id": rule_id, "records": records })),
        ),
        Err(e) => {
            warn!(rule_id = %rule_id, error = %e, "failed to read execution records");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn handle_rules(State(engine): State<Arc<AutomationEngine>>) -> (StatusCode, Json<Value>) {
    match engine.rule_source().list_active_rules(None).await {
        Ok(rules) => {
            let rules: Vec<Value> = rules
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "id": r.id,
                        "name": r.name,
                        "scope": r.scope,
                        "active": r.active,
                        "conditions": r.conditions.len(),
                        "actions": r.actions.len(),
                        "check_frequency_minutes": r.check_frequency_minutes,
                        "last_run_at": r.last_run_at,
                    })
                })
                .collect();
            (StatusCode::OK, Json(serde_json::json!({ "rules": rules })))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

async fn handle_status() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "active" })),
    )
}

async fn handle_health(State(engine): State<Arc<AutomationEngine>>) -> (StatusCode, Json<Value>) {
    let rule_count = engine
        .rule_source()
        .list_active_rules(None)
        .await
        .map(|r| r.len())
        .ok();

    let health = serde_json::json!({
        "status": if rule_count.is_some() { "healthy" } else { "degraded" },
        "active_rules": rule_count,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (StatusCode::OK, Json(health))
}

async fn handle_metrics() -> String {
    crate::metrics::METRICS.to_prometheus()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("termination signal received (Ctrl+C)");
    };

    #[cfg(unix)]
    let terminate = async {
        let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler");
        stream.recv().await;
        info!("termination signal received (SIGTERM)");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
