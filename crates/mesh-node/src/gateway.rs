//! HTTP gateway: submit Sudoku jobs and read mesh stats.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};

use mesh_protocol::{Grid, Sudoku};
use mesh_state::{NetworkSnapshot, StatsSnapshot};

use crate::node::{JobClient, JobResult, NodeHandle};

#[derive(Clone)]
struct GatewayState {
    /// One job at a time: the lock is held until its result arrives.
    client: Arc<Mutex<JobClient>>,
    stats: watch::Receiver<StatsSnapshot>,
    network: watch::Receiver<NetworkSnapshot>,
}

#[derive(Debug, Deserialize)]
struct SolveBody {
    sudoku: Grid,
}

#[derive(Debug, Serialize)]
struct SolveResponse {
    solution: Option<Sudoku>,
}

pub struct HttpGateway {
    bind_addr: String,
    state: GatewayState,
}

impl HttpGateway {
    pub fn new(bind_addr: String, handle: NodeHandle) -> Self {
        Self {
            bind_addr,
            state: GatewayState {
                client: Arc::new(Mutex::new(handle.client)),
                stats: handle.stats,
                network: handle.network,
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/solve", post(solve))
            .route("/stats", get(stats))
            .route("/network", get(network))
            .with_state(self.state.clone())
    }

    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        let app = self.router();
        tracing::info!(addr = %listener.local_addr()?, "HTTP gateway listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn solve(
    State(state): State<GatewayState>,
    body: Result<Json<SolveBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let payload = match Sudoku::new(body.sudoku) {
        Ok(payload) => payload,
        Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let client = state.client.lock().await;
    match client.solve(payload).await {
        Ok(JobResult::Solved(solution)) => Json(SolveResponse {
            solution: Some(solution),
        })
        .into_response(),
        Ok(JobResult::NotFound) => Json(SolveResponse { solution: None }).into_response(),
        Ok(JobResult::Rejected(reason)) => error(StatusCode::BAD_REQUEST, reason),
        Err(e) => error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn stats(State(state): State<GatewayState>) -> Json<StatsSnapshot> {
    Json(state.stats.borrow().clone())
}

async fn network(State(state): State<GatewayState>) -> Json<NetworkSnapshot> {
    Json(state.network.borrow().clone())
}
