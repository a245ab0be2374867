use axum::{
    body::Bytes,
    extract::{RawQuery, Request, State as AxumState},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use backer_execution::{Error, Store};
use backer_types::{
    api::{Balance, TournamentResult},
    Points,
};
use std::{sync::Arc, time::Instant};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

mod config;
mod metrics;
mod persist;
mod worker;

pub use config::{Config, ConfigError, ValidatedConfig};
pub use metrics::Metrics;
pub use persist::{load, save, PersistError, Persister};
pub use worker::Syncer;

/// Everything a request handler needs.
pub struct Ledger {
    store: Arc<Store>,
    persister: Persister,
    metrics: Arc<Metrics>,
}

impl Ledger {
    pub fn new(store: Arc<Store>, persister: Persister, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            persister,
            metrics,
        }
    }

    /// A ledger kept in memory only.
    pub fn ephemeral() -> Self {
        let store = Arc::new(Store::new());
        let persister = Persister::new(store.clone(), None);
        Self::new(store, persister, Arc::new(Metrics::new()))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn persister(&self) -> &Persister {
        &self.persister
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Bookkeeping after a call that may have moved points.
    fn changed(&self) {
        let queue = self.store.retry_queue();
        self.metrics.queued(queue.enqueued());
        self.metrics.set_pending(queue.len());
        self.persister.trigger();
    }

    fn transfer<T>(&self, result: &Result<T, Error>) {
        match result {
            Ok(_) => self.metrics.committed(),
            Err(Error::TransferFailed { .. }) => self.metrics.failed(),
            Err(_) => {}
        }
    }
}

/// Rejection carried back to the caller as a status and a plain-text reason.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::AccountNotFound(_) | Error::TournamentNotFound(_) | Error::NoOpenTournament => {
                StatusCode::NOT_FOUND
            }
            Error::InvalidArgument(_) | Error::NotParticipant { .. } => StatusCode::BAD_REQUEST,
            Error::InsufficientFunds { .. }
            | Error::BalanceOverflow { .. }
            | Error::TransferFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::AlreadyClosed(_)
            | Error::DuplicateParticipant { .. }
            | Error::TournamentExists(_) => StatusCode::CONFLICT,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

/// Query string parameters in the order they were sent.
struct Params(Vec<(String, String)>);

impl Params {
    fn parse(raw: Option<String>) -> Self {
        let raw = raw.unwrap_or_default();
        Self(
            url::form_urlencoded::parse(raw.as_bytes())
                .into_owned()
                .collect(),
        )
    }

    fn one(&self, name: &str) -> Result<&str, ApiError> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::bad_request(format!("missing {name}")))
    }

    fn all(&self, name: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn points(&self, name: &str) -> Result<Points, ApiError> {
        let raw = self.one(name)?;
        let points: Points = raw
            .parse()
            .map_err(|err| ApiError::bad_request(format!("invalid {name}: {err}")))?;
        if !points.is_positive() {
            return Err(ApiError::bad_request(format!("{name} must be positive")));
        }
        Ok(points)
    }

    fn id(&self, name: &str) -> Result<u64, ApiError> {
        let raw = self.one(name)?;
        raw.parse()
            .map_err(|_| ApiError::bad_request(format!("invalid {name}: {raw}")))
    }
}

pub struct Api {
    ledger: Arc<Ledger>,
}

impl Api {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    pub fn router(&self) -> Router {
        // Configure CORS
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        Router::new()
            .route("/fund", get(fund))
            .route("/take", get(take))
            .route("/balance", get(balance))
            .route("/announceTournament", get(announce))
            .route("/joinTournament", get(join))
            .route("/resultTournament", post(result))
            .route("/reset", get(reset))
            .route("/metrics", get(metrics))
            .layer(middleware::from_fn(log_request))
            .layer(cors)
            .with_state(self.ledger.clone())
    }
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        elapsed = ?start.elapsed(),
        "handled request"
    );
    response
}

async fn fund(
    AxumState(ledger): AxumState<Arc<Ledger>>,
    RawQuery(query): RawQuery,
) -> Result<StatusCode, ApiError> {
    let params = Params::parse(query);
    let player = params.one("playerId")?;
    let points = params.points("points")?;
    ledger.store.fund(player, points)?;
    ledger.changed();
    Ok(StatusCode::OK)
}

async fn take(
    AxumState(ledger): AxumState<Arc<Ledger>>,
    RawQuery(query): RawQuery,
) -> Result<StatusCode, ApiError> {
    let params = Params::parse(query);
    let player = params.one("playerId")?;
    let points = params.points("points")?;
    ledger.store.take(player, points)?;
    ledger.changed();
    Ok(StatusCode::OK)
}

async fn balance(
    AxumState(ledger): AxumState<Arc<Ledger>>,
    RawQuery(query): RawQuery,
) -> Result<Json<Balance>, ApiError> {
    let params = Params::parse(query);
    let player = params.one("playerId")?;
    let balance = ledger.store.balance(player)?;
    Ok(Json(Balance {
        player_id: player.to_string(),
        balance,
    }))
}

async fn announce(
    AxumState(ledger): AxumState<Arc<Ledger>>,
    RawQuery(query): RawQuery,
) -> Result<StatusCode, ApiError> {
    let params = Params::parse(query);
    let id = params.id("tournamentId")?;
    let deposit = params.points("deposit")?;
    ledger.store.announce(id, deposit)?;
    ledger.changed();
    Ok(StatusCode::OK)
}

async fn join(
    AxumState(ledger): AxumState<Arc<Ledger>>,
    RawQuery(query): RawQuery,
) -> Result<StatusCode, ApiError> {
    let params = Params::parse(query);
    let id = params.id("tournamentId")?;
    let player = params.one("playerId")?;
    let backers = params.all("backerId");

    let joined = ledger.store.join(id, player, &backers);
    ledger.transfer(&joined);
    ledger.changed();
    joined?;
    Ok(StatusCode::OK)
}

async fn result(
    AxumState(ledger): AxumState<Arc<Ledger>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: TournamentResult = serde_json::from_slice(&body)
        .map_err(|err| ApiError::bad_request(format!("invalid result: {err}")))?;

    let settlement = ledger
        .store
        .settle(request.tournament_id, &request.winners)?;
    for _ in &settlement.paid {
        ledger.metrics.committed();
    }
    ledger.changed();
    Ok(StatusCode::OK)
}

async fn reset(AxumState(ledger): AxumState<Arc<Ledger>>) -> Result<StatusCode, ApiError> {
    let persister = ledger.persister.clone();
    let failed = || ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "reset failed");
    tokio::task::spawn_blocking(move || persister.reset())
        .await
        .map_err(|err| {
            error!(?err, "reset task panicked");
            failed()
        })?
        .map_err(|err| {
            error!(?err, "failed to reset snapshot");
            failed()
        })?;
    ledger.metrics.set_pending(0);
    Ok(StatusCode::OK)
}

async fn metrics(AxumState(ledger): AxumState<Arc<Ledger>>) -> Result<Response, ApiError> {
    let body = ledger.metrics.encode().map_err(|err| {
        error!(?err, "failed to encode metrics");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
    })?;
    Ok((
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn get(router: &Router, uri: &str) -> StatusCode {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        call(router, request).await.0
    }

    async fn post_result(router: &Router, body: serde_json::Value) -> StatusCode {
        let request = Request::post("/resultTournament")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        call(router, request).await.0
    }

    async fn balance_of(router: &Router, player: &str) -> Points {
        let request = Request::get(format!("/balance?playerId={player}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(router, request).await;
        assert_eq!(status, StatusCode::OK);
        let balance: Balance = serde_json::from_str(&body).unwrap();
        assert_eq!(balance.player_id, player);
        balance.balance
    }

    fn setup() -> (Arc<Ledger>, Router) {
        let ledger = Arc::new(Ledger::ephemeral());
        let router = Api::new(ledger.clone()).router();
        (ledger, router)
    }

    #[tokio::test]
    async fn test_fund_take_balance() {
        let (_, router) = setup();
        assert_eq!(get(&router, "/balance?playerId=P1").await, StatusCode::NOT_FOUND);
        assert_eq!(get(&router, "/fund?playerId=P1&points=300").await, StatusCode::OK);
        assert_eq!(get(&router, "/take?playerId=P1&points=100.5").await, StatusCode::OK);
        assert_eq!(balance_of(&router, "P1").await, Points::from_cents(19_950));

        assert_eq!(
            get(&router, "/take?playerId=P1&points=1000").await,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(get(&router, "/take?playerId=P2&points=1").await, StatusCode::NOT_FOUND);
        assert_eq!(get(&router, "/fund?playerId=P1&points=-5").await, StatusCode::BAD_REQUEST);
        assert_eq!(get(&router, "/fund?playerId=P1&points=abc").await, StatusCode::BAD_REQUEST);
        assert_eq!(get(&router, "/fund?points=5").await, StatusCode::BAD_REQUEST);
        assert_eq!(get(&router, "/balance").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_tournament_flow() {
        let (ledger, router) = setup();
        for player in ["P1", "P2", "P3", "P4", "P5"] {
            assert_eq!(
                get(&router, &format!("/fund?playerId={player}&points=1000")).await,
                StatusCode::OK
            );
        }
        assert_eq!(
            get(&router, "/announceTournament?tournamentId=1&deposit=1000").await,
            StatusCode::OK
        );
        assert_eq!(
            get(&router, "/announceTournament?tournamentId=1&deposit=5").await,
            StatusCode::CONFLICT
        );
        assert_eq!(
            get(&router, "/announceTournament?tournamentId=x&deposit=5").await,
            StatusCode::BAD_REQUEST
        );

        assert_eq!(
            get(&router, "/joinTournament?tournamentId=1&playerId=P5").await,
            StatusCode::OK
        );
        assert_eq!(
            get(
                &router,
                "/joinTournament?tournamentId=1&playerId=P1&backerId=P2&backerId=P3&backerId=P4"
            )
            .await,
            StatusCode::OK
        );
        assert_eq!(
            get(&router, "/joinTournament?tournamentId=1&playerId=P1").await,
            StatusCode::CONFLICT
        );
        assert_eq!(
            get(&router, "/joinTournament?tournamentId=1&playerId=P9").await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get(&router, "/joinTournament?tournamentId=2&playerId=P2").await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get(&router, "/joinTournament?tournamentId=1&playerId=P2&backerId=P2").await,
            StatusCode::BAD_REQUEST
        );

        // P2 can no longer cover a full deposit on its own
        assert_eq!(
            get(&router, "/joinTournament?tournamentId=1&playerId=P2").await,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(balance_of(&router, "P2").await, Points::from_int(750));

        assert_eq!(
            post_result(
                &router,
                json!({"winners": [{"playerId": "P9", "prize": 500}]})
            )
            .await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            post_result(
                &router,
                json!({"tournamentId": 1, "winners": [{"playerId": "P1", "prize": 2000}]})
            )
            .await,
            StatusCode::OK
        );
        for player in ["P1", "P2", "P3", "P4"] {
            assert_eq!(balance_of(&router, player).await, Points::from_int(1250));
        }
        assert_eq!(balance_of(&router, "P5").await, Points::ZERO);

        assert_eq!(
            post_result(&router, json!({"tournamentId": 1, "winners": []})).await,
            StatusCode::CONFLICT
        );
        assert_eq!(
            post_result(&router, json!({"winners": []})).await,
            StatusCode::NOT_FOUND
        );

        let text = ledger.metrics().encode().unwrap();
        assert!(text.contains("backer_transfers_committed_total 3"));
        assert!(text.contains("backer_transfers_failed_total 1"));
    }

    #[tokio::test]
    async fn test_result_rejects_malformed_body() {
        let (_, router) = setup();
        let request = Request::post("/resultTournament")
            .body(Body::from("not json"))
            .unwrap();
        assert_eq!(call(&router, request).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reset() {
        let (ledger, router) = setup();
        assert_eq!(get(&router, "/fund?playerId=P1&points=10").await, StatusCode::OK);
        assert_eq!(
            get(&router, "/announceTournament?tournamentId=1&deposit=10").await,
            StatusCode::OK
        );
        assert_eq!(get(&router, "/reset").await, StatusCode::OK);
        assert_eq!(get(&router, "/balance?playerId=P1").await, StatusCode::NOT_FOUND);
        assert!(ledger.store().tournament(1).is_none());
    }

    #[tokio::test]
    async fn test_reset_removes_snapshot() {
        let path = std::env::temp_dir().join(format!("backer-reset-{}.db", std::process::id()));
        let store = Arc::new(Store::new());
        let persister = Persister::new(store.clone(), Some(path.clone()));
        let ledger = Arc::new(Ledger::new(store, persister, Arc::new(Metrics::new())));
        let router = Api::new(ledger.clone()).router();

        assert_eq!(get(&router, "/fund?playerId=P1&points=10").await, StatusCode::OK);
        ledger.persister().flush().unwrap();
        assert!(path.exists());

        assert_eq!(get(&router, "/reset").await, StatusCode::OK);
        assert!(!path.exists());
        assert_eq!(get(&router, "/balance?playerId=P1").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_residuals_counted_from_queue() {
        let (ledger, router) = setup();
        // A refund that could not be reverted lands in the queue without
        // surfacing as a failed transfer
        ledger
            .store()
            .retry_queue()
            .enqueue(backer_execution::mocks::fund(&[("P9", 100)]));
        assert_eq!(get(&router, "/fund?playerId=P1&points=1").await, StatusCode::OK);

        let text = ledger.metrics().encode().unwrap();
        assert!(text.contains("backer_residual_queued_total 1"));
        assert!(text.contains("backer_pending 1"));

        // Nothing new queued: the counter holds
        assert_eq!(get(&router, "/fund?playerId=P1&points=1").await, StatusCode::OK);
        let text = ledger.metrics().encode().unwrap();
        assert!(text.contains("backer_residual_queued_total 1"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (_, router) = setup();
        let request = Request::get("/metrics").body(Body::empty()).unwrap();
        let (status, body) = call(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("backer_pending"));
    }

    #[test]
    fn test_status_mapping() {
        let status = |err: Error| ApiError::from(err).status;
        assert_eq!(status(Error::AccountNotFound("a".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(Error::NoOpenTournament), StatusCode::NOT_FOUND);
        assert_eq!(
            status(Error::InvalidArgument("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(Error::TransferFailed { queued: true }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status(Error::AlreadyClosed(1)), StatusCode::CONFLICT);
        assert_eq!(status(Error::TournamentExists(1)), StatusCode::CONFLICT);
    }
}
