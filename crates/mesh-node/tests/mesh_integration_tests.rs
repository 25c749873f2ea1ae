//! End-to-end tests: real nodes on localhost sockets.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mesh_node::*;
use mesh_protocol::{Metric, PeerAddress, Sudoku};

const SOLVED: [[u8; 9]; 9] = [
    [8, 2, 7, 1, 5, 4, 3, 9, 6],
    [9, 6, 5, 3, 2, 7, 1, 4, 8],
    [3, 4, 1, 6, 8, 9, 7, 5, 2],
    [5, 9, 3, 4, 6, 8, 2, 7, 1],
    [4, 7, 2, 5, 1, 3, 6, 8, 9],
    [6, 1, 8, 9, 7, 2, 4, 3, 5],
    [7, 8, 6, 2, 3, 5, 9, 1, 4],
    [1, 5, 4, 7, 9, 6, 8, 2, 3],
    [2, 3, 9, 8, 4, 1, 5, 6, 7],
];

fn with_blanks(cells: &[(usize, usize)]) -> Sudoku {
    let mut grid = SOLVED;
    for &(r, c) in cells {
        grid[r][c] = 0;
    }
    Sudoku::new(grid).unwrap()
}

fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.node.host = "127.0.0.1".to_string();
    config.node.p2p_port = 0;
    config.flooding.interval_ms = 100;
    config.scheduler.tick_ms = 10;
    config.scheduler.initial_task_size = 50;
    config
}

async fn start(config: NodeConfig) -> NodeHandle {
    let (node, handle) = Node::bind(config).await.unwrap();
    tokio::spawn(node.run());
    handle
}

async fn solve(handle: &mut NodeHandle, payload: Sudoku) -> JobResult {
    tokio::time::timeout(Duration::from_secs(30), handle.client.solve(payload))
        .await
        .expect("job did not finish within 30s")
        .unwrap()
}

// ─── Config ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[node]
p2p_port = 7300
handicap_ms = 10

[flooding]
interval_ms = 250
"#,
    )
    .unwrap();

    let config = NodeConfig::load(Some(&path)).unwrap();
    assert_eq!(config.node.p2p_port, 7300);
    assert_eq!(config.node.handicap_ms, 10);
    assert_eq!(config.heartbeat_timeout(), Duration::from_millis(1500));
    assert_eq!(config.scheduler.tries_limit, 3);
}

#[test]
fn test_config_parse_error_names_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[node\np2p_port = ").unwrap();
    match NodeConfig::load(Some(&path)) {
        Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(matches!(
        NodeConfig::load(Some(&path)),
        Err(ConfigError::Read { .. })
    ));
}

// ─── Single node ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_grid_is_returned_as_solution() {
    let mut handle = start(test_config()).await;
    let full = Sudoku::new(SOLVED).unwrap();
    assert_eq!(solve(&mut handle, full.clone()).await, JobResult::Solved(full));
}

#[tokio::test]
async fn test_lone_node_searches_by_itself() {
    let mut handle = start(test_config()).await;
    let result = solve(&mut handle, with_blanks(&[(0, 0), (4, 4), (8, 8)])).await;
    assert_eq!(result, JobResult::Solved(Sudoku::new(SOLVED).unwrap()));
}

#[tokio::test]
async fn test_unsolvable_job_is_not_found() {
    let mut handle = start(test_config()).await;
    // Clashing 8 in the first row: no filling of the blank can fix it.
    let mut grid = *with_blanks(&[(0, 1)]).grid();
    grid[0][2] = 8;
    let result = solve(&mut handle, Sudoku::new(grid).unwrap()).await;
    assert_eq!(result, JobResult::NotFound);
}

#[tokio::test]
async fn test_oversized_job_is_rejected() {
    let mut handle = start(test_config()).await;
    let blanks: Vec<(usize, usize)> = (0..21).map(|i| (i / 9, i % 9)).collect();
    let result = solve(&mut handle, with_blanks(&blanks)).await;
    assert!(matches!(result, JobResult::Rejected(_)));

    // The node keeps serving afterwards.
    let full = Sudoku::new(SOLVED).unwrap();
    assert_eq!(solve(&mut handle, full.clone()).await, JobResult::Solved(full));
}

#[tokio::test]
async fn test_abandoned_jobs_do_not_block_later_results() {
    let mut handle = start(test_config()).await;
    let slow = with_blanks(&[(0, 0), (1, 1), (2, 2)]);
    for _ in 0..20 {
        let abandoned = handle.client.solve(slow.clone());
        let _ = tokio::time::timeout(Duration::from_millis(1), abandoned).await;
    }

    let full = Sudoku::new(SOLVED).unwrap();
    assert_eq!(solve(&mut handle, full.clone()).await, JobResult::Solved(full));
}

// ─── Two nodes ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_work_is_farmed_out_to_joined_peer() {
    let mut owner_config = test_config();
    owner_config.scheduler.self_assign = false;
    let mut owner = start(owner_config).await;

    let mut helper_config = test_config();
    helper_config.node.anchor = Some(owner.self_address.to_string());
    let helper = start(helper_config).await;
    let helper_address: PeerAddress = helper.self_address.clone();

    // The owner never searches itself, so a solution proves the helper did.
    let result = solve(&mut owner, with_blanks(&[(0, 0), (1, 1), (2, 2)])).await;
    assert_eq!(result, JobResult::Solved(Sudoku::new(SOLVED).unwrap()));

    // The helper's validations reach the owner through flooding.
    let mut stats = owner.stats.clone();
    let seen = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            {
                let snap = stats.borrow_and_update();
                let helper_validations = snap
                    .nodes
                    .iter()
                    .find(|n| n.address == helper_address)
                    .map(|n| n.validations)
                    .unwrap_or(0);
                if helper_validations > 0 && snap.all[&Metric::Solved] >= 1 {
                    return;
                }
            }
            if stats.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    assert!(seen.is_ok(), "helper validations never reached the owner");

    let network = owner.network.borrow().clone();
    assert_eq!(network.peers.get(&owner.self_address), Some(&vec![helper_address]));
}

// ─── HTTP gateway ───────────────────────────────────────────────────────────

async fn http(addr: SocketAddr, method: &str, path: &str, body: &str) -> (u16, serde_json::Value) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8_lossy(&raw).to_string();
    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    let body = text.split("\r\n\r\n").nth(1).unwrap_or_default();
    (status, serde_json::from_str(body).unwrap_or(serde_json::Value::Null))
}

async fn start_gateway() -> SocketAddr {
    let handle = start(test_config()).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(HttpGateway::new(addr.to_string(), handle).serve(listener));
    addr
}

#[tokio::test]
async fn test_gateway_solves_posted_grid() {
    let addr = start_gateway().await;
    let body = serde_json::json!({ "sudoku": with_blanks(&[(3, 3)]) }).to_string();
    let (status, json) = http(addr, "POST", "/solve", &body).await;
    assert_eq!(status, 200);
    assert_eq!(json["solution"], serde_json::json!(SOLVED));
}

#[tokio::test]
async fn test_gateway_rejects_bad_grid() {
    let addr = start_gateway().await;
    let (status, _) = http(addr, "POST", "/solve", r#"{"sudoku": [[1, 2, 3]]}"#).await;
    assert_eq!(status, 400);

    let mut grid = SOLVED;
    grid[0][0] = 12;
    let body = serde_json::json!({ "sudoku": grid }).to_string();
    let (status, json) = http(addr, "POST", "/solve", &body).await;
    assert_eq!(status, 400);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_gateway_reports_stats_and_network() {
    let addr = start_gateway().await;
    let (status, json) = http(addr, "GET", "/stats", "").await;
    assert_eq!(status, 200);
    assert!(json["all"]["validations"].is_u64());
    assert!(json["nodes"].is_array());

    let (status, json) = http(addr, "GET", "/network", "").await;
    assert_eq!(status, 200);
    assert!(json.is_object());
}
