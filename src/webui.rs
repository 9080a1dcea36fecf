use crate::config::{DEFAULT_FORECAST_HORIZON, DashboardSettings, MAX_UPLOAD_BYTES};
use crate::dashboard::{
    self, ChartBundle, Dashboard, DashboardState, ForecastReport, ForecastRequest, IntradayReport,
    Snapshot, UploadReport,
};
use crate::error::{DashboardError, ForecastError, UploadError};
use crate::forecast::ModelKind;
use crate::market::SymbolRecord;
use crate::upload;
use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const INDEX_HTML: &str = include_str!("../web/index.html");
const APP_JS: &str = include_str!("../web/app.js");

#[derive(Clone)]
pub struct WebState {
    dashboard: Arc<Mutex<Dashboard>>,
    events: broadcast::Sender<Arc<Snapshot>>,
    refresh_interval: Duration,
}

impl WebState {
    pub fn new(dashboard: Dashboard, refresh_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            dashboard: Arc::new(Mutex::new(dashboard)),
            events,
            refresh_interval,
        }
    }

    fn publish(&self, snapshot: Arc<Snapshot>) {
        if let Err(e) = self.events.send(snapshot) {
            debug!("No SSE subscribers for snapshot: {}", e);
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct ApiError {
    error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[derive(Clone, Debug, Deserialize)]
struct ChartQuery {
    days: Option<usize>,
}

#[derive(Clone, Debug, Deserialize)]
struct IntradayQuery {
    model: Option<ModelKind>,
}

#[derive(Clone, Debug, Serialize)]
struct ForecastResponse {
    reused: bool,
    #[serde(flatten)]
    report: Arc<ForecastReport>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/app.js", get(app_js))
        .route("/api/health", get(health))
        .route("/api/state", get(full_state))
        .route("/api/symbols", get(symbols))
        .route("/api/quotes", get(quotes))
        .route("/api/refresh", post(refresh))
        .route("/api/chart/:symbol", get(chart))
        .route("/api/intraday/:symbol", get(intraday_session))
        .route("/api/forecast", post(forecast))
        .route("/api/upload", post(upload_file))
        .route("/api/events", get(events))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
}

pub async fn run_webui_server(settings: DashboardSettings) -> Result<()> {
    let state = WebState::new(Dashboard::new(settings.cache_ttl), settings.refresh_interval);
    {
        let snapshot = state.dashboard.lock().await.snapshot(false);
        info!(
            "Primed {} simulated quotes ({})",
            snapshot.quotes.len(),
            snapshot.market.message
        );
    }
    tokio::spawn(refresh_loop(state.clone()));

    let app = router(state);
    let addr = settings.bind_addr();
    info!("WebUI listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("WebUI shut down");
    Ok(())
}

/// Ticks the refresh interval and pushes each snapshot to SSE subscribers.
async fn refresh_loop(state: WebState) {
    let mut interval = tokio::time::interval(state.refresh_interval);
    // the first tick fires immediately and the snapshot is already primed
    interval.tick().await;
    loop {
        interval.tick().await;
        let snapshot = state.dashboard.lock().await.snapshot(false);
        debug!(at = %snapshot.generated_at, "Refresh tick");
        state.publish(snapshot);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not install ctrl-c handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn app_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/javascript; charset=utf-8")], APP_JS)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true, "source": crate::data::SIMULATED_SOURCE }))
}

async fn full_state(State(state): State<WebState>) -> Json<DashboardState> {
    Json(state.dashboard.lock().await.view())
}

async fn symbols(State(state): State<WebState>) -> Json<Vec<SymbolRecord>> {
    Json(state.dashboard.lock().await.table().records().to_vec())
}

async fn quotes(State(state): State<WebState>) -> Json<Arc<Snapshot>> {
    Json(state.dashboard.lock().await.snapshot(false))
}

async fn refresh(State(state): State<WebState>) -> Json<Arc<Snapshot>> {
    let snapshot = state.dashboard.lock().await.snapshot(true);
    state.publish(snapshot.clone());
    Json(snapshot)
}

async fn chart(
    State(state): State<WebState>,
    Path(symbol): Path<String>,
    query: Result<Query<ChartQuery>, QueryRejection>,
) -> ApiResult<ChartBundle> {
    let Query(query) = query.map_err(|e| rejection_err(e.status(), e.body_text()))?;
    let bundle = state
        .dashboard
        .lock()
        .await
        .charts(&symbol, query.days)
        .map_err(dashboard_err)?;
    Ok(Json(bundle))
}

async fn intraday_session(
    State(state): State<WebState>,
    Path(symbol): Path<String>,
    query: Result<Query<IntradayQuery>, QueryRejection>,
) -> ApiResult<Arc<IntradayReport>> {
    let Query(query) = query.map_err(|e| rejection_err(e.status(), e.body_text()))?;
    let report = state
        .dashboard
        .lock()
        .await
        .intraday(&symbol, query.model.unwrap_or_default())
        .map_err(dashboard_err)?;
    Ok(Json(report))
}

async fn forecast(
    State(state): State<WebState>,
    payload: Result<Json<ForecastRequest>, JsonRejection>,
) -> ApiResult<ForecastResponse> {
    let Json(req) = payload.map_err(|e| rejection_err(e.status(), e.body_text()))?;
    if req.symbol.trim().is_empty() {
        return Err(api_err(StatusCode::BAD_REQUEST, "symbol is required"));
    }
    let outcome = state
        .dashboard
        .lock()
        .await
        .forecast(&req)
        .map_err(dashboard_err)?;
    Ok(Json(ForecastResponse {
        reused: outcome.reused,
        report: outcome.report,
    }))
}

async fn upload_file(mut multipart: Multipart) -> ApiResult<UploadReport> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut horizon = DEFAULT_FORECAST_HORIZON;
    let mut model = ModelKind::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_err)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload.csv").to_string();
                let bytes = field.bytes().await.map_err(multipart_err)?;
                file = Some((file_name, bytes.to_vec()));
            }
            "horizon" => {
                let text = field.text().await.map_err(multipart_err)?;
                if !text.trim().is_empty() {
                    horizon = text.trim().parse().map_err(|_| {
                        api_err(StatusCode::BAD_REQUEST, "horizon must be a positive integer")
                    })?;
                }
            }
            "model" => {
                let text = field.text().await.map_err(multipart_err)?;
                if !text.trim().is_empty() {
                    model = text.parse().map_err(|e: ForecastError| {
                        api_err(StatusCode::BAD_REQUEST, &e.to_string())
                    })?;
                }
            }
            other => debug!("Ignoring upload field '{}'", other),
        }
    }

    let (file_name, bytes) = file.ok_or_else(|| upload_err(UploadError::MissingFile))?;
    let series = upload::read_upload(&file_name, &bytes).map_err(upload_err)?;
    info!(
        file = %file_name,
        rows = series.len(),
        "Upload parsed"
    );
    Ok(Json(dashboard::analyze_upload(&series, horizon, model)))
}

async fn events(
    State(state): State<WebState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let initial = state.dashboard.lock().await.snapshot(false);

    let first = stream::once(async move { Ok::<_, Infallible>(snapshot_event(&initial)) });
    let updates = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(snapshot) => return Some((Ok::<_, Infallible>(snapshot_event(&snapshot)), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("SSE client lagged by {} snapshots", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("SSE broadcast channel closed");
                    return None;
                }
            }
        }
    });

    Sse::new(first.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn snapshot_event(snapshot: &Snapshot) -> Event {
    match Event::default().event("snapshot").json_data(snapshot) {
        Ok(event) => event,
        Err(e) => {
            warn!("Failed to serialize snapshot event: {}", e);
            Event::default().event("error").data(e.to_string())
        }
    }
}

fn api_err(status: StatusCode, message: &str) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: message.to_string(),
        }),
    )
}

fn dashboard_err(err: DashboardError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        DashboardError::UnknownSymbol(_) => StatusCode::NOT_FOUND,
        DashboardError::Forecast(ForecastError::InsufficientData { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DashboardError::InvalidRange { .. } | DashboardError::Forecast(_) => StatusCode::BAD_REQUEST,
        DashboardError::NoSession(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    debug!("Request rejected: {}", err);
    api_err(status, &err.to_string())
}

fn upload_err(err: UploadError) -> (StatusCode, Json<ApiError>) {
    warn!("Upload rejected: {}", err);
    api_err(StatusCode::BAD_REQUEST, &err.to_string())
}

fn multipart_err(err: MultipartError) -> (StatusCode, Json<ApiError>) {
    rejection_err(err.status(), err.body_text())
}

/// Extractor rejections keep axum's status but use the JSON error body.
fn rejection_err(status: StatusCode, text: String) -> (StatusCode, Json<ApiError>) {
    debug!(%status, "Request body rejected: {}", text);
    api_err(status, &text)
}
