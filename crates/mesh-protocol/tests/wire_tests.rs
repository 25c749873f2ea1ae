use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use mesh_protocol::*;

const SOLVED: Grid = [
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

fn hello() -> Record {
    let mut stats = std::collections::BTreeMap::new();
    stats.insert(Metric::Solved, MetricReport { baseline: 4, internal: 1 });
    stats.insert(Metric::Validations, MetricReport { baseline: 900, internal: 12 });
    Record::FloodingHello(FloodingHello {
        reply_address: "10.0.0.2:7000".into(),
        alive_nodes: vec!["10.0.0.1:7000".into()],
        stats,
        worker_stats: vec![WorkerReport {
            address: "10.0.0.1:7000".into(),
            validations: 300,
            internal_validations: 0,
        }],
    })
}

#[test]
fn test_frame_prefix_is_big_endian_json_length() {
    let frame = encode(&hello()).unwrap();
    let len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    assert_eq!(len, frame.len() - LENGTH_PREFIX_BYTES);

    let json: serde_json::Value = serde_json::from_slice(&frame[LENGTH_PREFIX_BYTES..]).unwrap();
    assert_eq!(json["command"], "FLOODING_HELLO");
    assert_eq!(json["stats"]["validations"]["baseline"], 900);
    assert_eq!(json["worker_stats"][0]["address"], "10.0.0.1:7000");
}

#[test]
fn test_stream_with_records_then_close_marker() {
    let payload = Sudoku::new({
        let mut g = SOLVED;
        g[4][4] = 0;
        g
    })
    .unwrap();
    let job = JobId::new();
    let request = Record::SolveRequest(SolveRequest {
        reply_address: "10.0.0.1:7000".into(),
        task_id: TaskId::new(job, 0, 9),
        payload: payload.clone(),
    });

    let mut codec = RecordCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(&hello(), &mut buf).unwrap();
    codec.encode(&request, &mut buf).unwrap();
    buf.extend_from_slice(&[0, 0]);

    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Record(hello())));
    match codec.decode(&mut buf).unwrap() {
        Some(Frame::Record(Record::SolveRequest(r))) => {
            assert_eq!(r.task_id.len(), 9);
            assert_eq!(r.payload, payload);
        }
        other => panic!("expected solve request, got {other:?}"),
    }
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Closed));
    assert!(buf.is_empty());
}

#[test]
fn test_solve_reply_without_solution_is_null() {
    let reply = Record::SolveReply(SolveReply {
        reply_address: "10.0.0.3:7000".into(),
        task_id: TaskId::new(JobId::new(), 81, 162),
        solution: None,
    });
    let value = serde_json::to_value(&reply).unwrap();
    assert!(value["solution"].is_null());
    assert_eq!(reply.reply_address(), Some(&PeerAddress::from("10.0.0.3:7000")));
}

#[test]
fn test_out_of_range_cell_fails_decoding() {
    let mut grid = serde_json::to_value(SOLVED).unwrap();
    grid[0][0] = serde_json::json!(10);
    let body = serde_json::json!({
        "command": "SOLVE_REPLY",
        "reply_address": "10.0.0.3:7000",
        "task_id": { "job_id": JobId::new(), "start": 0, "end": 1 },
        "solution": grid,
    });
    let err = decode(body.to_string().as_bytes()).unwrap_err();
    assert!(matches!(err, ProtocolError::Malformed { .. }));
    assert!(err.raw().is_some());
}

#[test]
fn test_candidates_walk_last_cell_fastest() {
    let mut grid = SOLVED;
    grid[0][0] = 0;
    grid[8][8] = 0;
    let sudoku = Sudoku::new(grid).unwrap();
    let cells = sudoku.empty_cells();
    assert_eq!(sudoku.search_space(), Some(81));

    let first = sudoku.candidate(&cells, 0);
    assert_eq!((first.grid()[0][0], first.grid()[8][8]), (1, 1));
    let second = sudoku.candidate(&cells, 1);
    assert_eq!((second.grid()[0][0], second.grid()[8][8]), (1, 2));
    // 8 in the first blank, 7 in the last.
    let solved = sudoku.candidate(&cells, 7 * 9 + 6);
    assert_eq!(solved.grid(), &SOLVED);
}
