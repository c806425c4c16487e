//! HTTP API for BALLOTBOX node

use axum::{
    extract::{
        connect_info::{ConnectInfo, Connected},
        rejection::FormRejection,
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    serve::IncomingStream,
    Form, Json, Router,
};
use ballotbox_core::{OptionId, TallyError, VoteOption};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::runtime::NodeRuntime;

/// API state containing node runtime
pub type ApiState = Arc<NodeRuntime>;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Ballot option as offered to voters
#[derive(Serialize)]
pub struct OptionResponse {
    pub id: String,
    pub name: String,
}

/// Ballot response
#[derive(Serialize)]
pub struct BallotResponse {
    pub title: String,
    pub options: Vec<OptionResponse>,
}

/// One option's share of the vote
#[derive(Serialize)]
pub struct OptionResult {
    pub id: String,
    pub name: String,
    pub count: u64,
    pub percent: u64,
}

/// Results response
#[derive(Serialize)]
pub struct ResultsResponse {
    pub title: String,
    pub total: u64,
    pub results: Vec<OptionResult>,
}

/// Vote form body
#[derive(Deserialize)]
pub struct VoteForm {
    pub vote: Option<String>,
}

/// Results query
#[derive(Deserialize)]
pub struct ResultsQuery {
    /// Skip peers and report this host only
    #[serde(default)]
    pub local: bool,
}

/// This host's address on the connection a request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerAddr(pub Option<Ipv4Addr>);

impl Connected<IncomingStream<'_>> for ServerAddr {
    fn connect_info(target: IncomingStream<'_>) -> Self {
        let ip = match target.local_addr() {
            Ok(SocketAddr::V4(addr)) => Some(*addr.ip()),
            Ok(SocketAddr::V6(addr)) => addr.ip().to_ipv4_mapped(),
            Err(_) => None,
        };
        ServerAddr(ip)
    }
}

/// Core failure rendered as an HTTP response
pub struct ApiError(TallyError);

impl From<TallyError> for ApiError {
    fn from(err: TallyError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!("Request failed: {}", self.0);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(ApiResponse::<()>::err(self.0))).into_response()
    }
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    let enable_cors = state.config().api.enable_cors;

    let router = Router::new()
        // Health
        .route("/health", get(health))
        // Voting
        .route("/", get(index))
        .route("/vote", get(get_vote).post(post_vote))
        .route("/results", any(get_results))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

fn found(location: &'static str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn index() -> Response {
    found("/vote")
}

/// Ballot to vote on
async fn get_vote(State(runtime): State<ApiState>) -> Result<Response, ApiError> {
    let ballot = runtime.ballot()?;
    let response = BallotResponse {
        title: ballot.title().to_string(),
        options: ballot
            .options()
            .iter()
            .map(|o| OptionResponse {
                id: o.id().to_string(),
                name: o.name().to_string(),
            })
            .collect(),
    };

    Ok(Json(ApiResponse::ok(response)).into_response())
}

/// Cast a vote
async fn post_vote(
    State(runtime): State<ApiState>,
    form: Result<Form<VoteForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let selection = form
        .ok()
        .and_then(|Form(form)| form.vote)
        .ok_or_else(|| TallyError::Validation("missing vote".into()))?;
    let id: OptionId = selection.parse()?;

    runtime.vote(id).await?;
    Ok(found("/results"))
}

/// Results, combined across peers unless `?local=true`
async fn get_results(
    State(runtime): State<ApiState>,
    ConnectInfo(ServerAddr(server_addr)): ConnectInfo<ServerAddr>,
    Query(query): Query<ResultsQuery>,
) -> Result<Response, ApiError> {
    let (ballot, results) = runtime.results(!query.local, server_addr).await?;

    Ok(Json(ApiResponse::ok(summarize(ballot.title(), &results))).into_response())
}

/// Totals with each option's rounded percentage, 0 when nobody voted
pub fn summarize(title: &str, results: &[VoteOption]) -> ResultsResponse {
    let total = results.iter().fold(0u64, |sum, o| sum.saturating_add(o.count()));
    let results = results
        .iter()
        .map(|o| OptionResult {
            id: o.id().to_string(),
            name: o.name().to_string(),
            count: o.count(),
            percent: if total == 0 {
                0
            } else {
                (o.count() as f64 / total as f64 * 100.0).round() as u64
            },
        })
        .collect();

    ResultsResponse {
        title: title.to_string(),
        total,
        results,
    }
}

/// Start API server
pub async fn start_api_server(runtime: Arc<NodeRuntime>, listen_addr: &str) -> anyhow::Result<()> {
    let router = create_router(runtime);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("API server listening on {}", listen_addr);

    axum::serve(listener, router.into_make_service_with_connect_info::<ServerAddr>()).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use ballotbox_core::{BallotConfig, NodeConfig};
    use ballotbox_p2p::TcpPeerClient;
    use ballotbox_state::MemoryTallyStore;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn create_test_router(tmp: &TempDir) -> Router {
        create_served_router(tmp, BallotConfig::sample(), true, None)
    }

    /// Router as served on a connection to `server_addr`
    fn create_served_router(
        tmp: &TempDir,
        ballot: BallotConfig,
        exclude_local_addrs: bool,
        server_addr: Option<Ipv4Addr>,
    ) -> Router {
        let ballot_path = tmp.path().join("vote-config.json");
        std::fs::write(&ballot_path, serde_json::to_string(&ballot).unwrap()).unwrap();
        let mut config = NodeConfig {
            ballot_path,
            ..Default::default()
        };
        config.peer.exclude_local_addrs = exclude_local_addrs;
        let runtime = NodeRuntime::with_parts(
            config,
            Arc::new(MemoryTallyStore::new()),
            Arc::new(TcpPeerClient::default()),
        );
        create_router(Arc::new(runtime)).layer(MockConnectInfo(ServerAddr(server_addr)))
    }

    fn post_vote_request(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/vote")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_index_redirects() {
        let tmp = TempDir::new().unwrap();
        let router = create_test_router(&tmp);

        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/vote");
    }

    #[tokio::test]
    async fn test_vote_then_results() {
        let tmp = TempDir::new().unwrap();
        let router = create_test_router(&tmp);
        let red = OptionId::from_name("Red Team");
        let blue = OptionId::from_name("Blue Team");

        for id in [red, red, blue] {
            let response = router
                .clone()
                .oneshot(post_vote_request(format!("vote={id}")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FOUND);
            assert_eq!(response.headers()[header::LOCATION], "/results");
        }

        let response = router
            .oneshot(Request::builder().uri("/results").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["data"]["total"], 3);
        assert_eq!(body["data"]["results"][0]["name"], "Red Team");
        assert_eq!(body["data"]["results"][0]["count"], 2);
        assert_eq!(body["data"]["results"][0]["percent"], 67);
        assert_eq!(body["data"]["results"][2]["count"], 0);
    }

    #[tokio::test]
    async fn test_ballot_listing() {
        let tmp = TempDir::new().unwrap();
        let router = create_test_router(&tmp);

        let response = router
            .oneshot(Request::builder().uri("/vote").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["data"]["title"], "Which team wins?");
        assert_eq!(body["data"]["options"][1]["id"], OptionId::from_name("Blue Team").to_string());
    }

    #[tokio::test]
    async fn test_bad_votes_rejected() {
        let tmp = TempDir::new().unwrap();
        let router = create_test_router(&tmp);

        for body in ["", "vote=", "vote=abc", "other=1", "vote=12345"] {
            let response = router
                .clone()
                .oneshot(post_vote_request(body.to_string()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body:?}");
        }
    }

    #[tokio::test]
    async fn test_wrong_method_and_unknown_route() {
        let tmp = TempDir::new().unwrap();
        let router = create_test_router(&tmp);

        let response = router
            .clone()
            .oneshot(Request::builder().method("DELETE").uri("/vote").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = router
            .oneshot(Request::builder().uri("/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_results_any_method() {
        let tmp = TempDir::new().unwrap();
        let router = create_test_router(&tmp);

        let response = router
            .oneshot(Request::builder().method("POST").uri("/results").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_results_skip_serving_address() {
        let tmp = TempDir::new().unwrap();
        let mut ballot = BallotConfig::sample();
        // Only entry is the address this request came in on, and no peer
        // listener runs, so contacting it would fail the request
        ballot.servers = vec!["127.0.0.1".to_string()];
        let router = create_served_router(&tmp, ballot, false, Some(Ipv4Addr::LOCALHOST));

        let response = router
            .clone()
            .oneshot(post_vote_request(format!("vote={}", OptionId::from_name("Red Team"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);

        let response = router
            .oneshot(Request::builder().uri("/results").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["data"]["total"], 1);
    }

    #[tokio::test]
    async fn test_missing_ballot_is_server_error() {
        let tmp = TempDir::new().unwrap();
        let router = create_test_router(&tmp);
        std::fs::remove_file(tmp.path().join("vote-config.json")).unwrap();

        let response = router
            .oneshot(Request::builder().uri("/results").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_summarize_empty() {
        let results = vec![VoteOption::new("A").unwrap(), VoteOption::new("B").unwrap()];
        let summary = summarize("T", &results);

        assert_eq!(summary.total, 0);
        assert!(summary.results.iter().all(|r| r.percent == 0));
    }
}
