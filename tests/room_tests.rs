//! Room session tests against a scripted in-memory server.
//!
//! Covers join confirmation, message dispatch, leave semantics, state
//! synchronization, desync handling and the dev-mode restart aid.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use nonogram_net::protocol::{Frame, MessageKind, Payload};
use nonogram_net::room::{Room, RoomOptions, RoomState, DESYNC_REASON};
use nonogram_net::serializer::{
    FieldDef, FieldKind, PatchBuilder, Reflection, ScalarKind, StateValue,
};
use nonogram_net::transport::Connector;
use nonogram_net::NetError;

use common::{join_frame, next_server, MockConnector, ServerEnd, WAIT};

const ROOM_URL: &str = "ws://localhost:2567/proc-1/r1?sessionId=s1";

fn options() -> RoomOptions {
    RoomOptions::new("lobby", "r1", "s1", ROOM_URL)
}

fn schema() -> Reflection {
    Reflection {
        root: "LobbyState".into(),
        fields: vec![
            FieldDef {
                index: 0,
                name: "coins".into(),
                kind: FieldKind::Scalar(ScalarKind::Int),
            },
            FieldDef {
                index: 1,
                name: "nickname".into(),
                kind: FieldKind::Scalar(ScalarKind::Str),
            },
            FieldDef {
                index: 2,
                name: "items".into(),
                kind: FieldKind::Map(ScalarKind::Int),
            },
        ],
    }
}

/// Join a room through `connector`, confirming with `confirm`.
async fn join_with(
    connector: Arc<MockConnector>,
    servers: &mut mpsc::UnboundedReceiver<ServerEnd>,
    options: RoomOptions,
    confirm: Frame,
) -> (Room, ServerEnd) {
    let connector: Arc<dyn Connector> = connector;
    let join = tokio::spawn(Room::join(connector, options));
    let mut server = next_server(servers).await;
    server.send(&confirm);
    let room = join.await.unwrap().expect("join should succeed");
    assert_eq!(server.recv_frame().await, Frame::JoinAck);
    (room, server)
}

async fn join(
    connector: Arc<MockConnector>,
    servers: &mut mpsc::UnboundedReceiver<ServerEnd>,
) -> (Room, ServerEnd) {
    join_with(connector, servers, options(), join_frame("tok", "none", Vec::new())).await
}

/// Leave notifications as `(code, reason)` pairs.
fn leave_log(room: &Room) -> Arc<Mutex<Vec<(u16, String)>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    room.on_leave(move |code, reason| sink.lock().unwrap().push((code, reason.to_owned())));
    log
}

async fn wait_for_leave(log: &Arc<Mutex<Vec<(u16, String)>>>) -> (u16, String) {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(entry) = log.lock().unwrap().first().cloned() {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("leave notification")
}

// ════════════════════════════════════════════════════════════════════
// Join
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn join_confirmation_opens_room_and_acknowledges() {
    let (connector, mut servers) = MockConnector::new();
    let (room, server) = join(Arc::clone(&connector), &mut servers).await;

    assert!(room.is_open());
    assert_eq!(room.state_kind(), RoomState::Open);
    assert_eq!(room.name(), "lobby");
    assert_eq!(room.session_id(), "s1");
    assert_eq!(room.serializer_id().as_deref(), Some("none"));
    assert_eq!(room.reconnection_token().unwrap().to_string(), "r1:tok");
    assert!(room.state().is_none());
    assert_eq!(server.url, ROOM_URL);
    assert_eq!(connector.urls(), vec![ROOM_URL.to_string()]);
}

#[tokio::test]
async fn headers_are_forwarded_to_the_connector() {
    let (connector, mut servers) = MockConnector::new();
    let options = options().with_headers(vec![("X-Client".into(), "1.0".into())]);
    let (_room, server) = join_with(
        connector,
        &mut servers,
        options,
        join_frame("tok", "none", Vec::new()),
    )
    .await;
    assert_eq!(server.headers, vec![("X-Client".to_string(), "1.0".to_string())]);
}

#[tokio::test]
async fn empty_reconnection_token_is_absent() {
    let (connector, mut servers) = MockConnector::new();
    let (room, _server) = join_with(
        connector,
        &mut servers,
        options(),
        join_frame("", "none", Vec::new()),
    )
    .await;
    assert!(room.reconnection_token().is_none());
}

#[tokio::test]
async fn error_before_confirmation_fails_join() {
    let (connector, mut servers) = MockConnector::new();
    let connector: Arc<dyn Connector> = connector;
    let join = tokio::spawn(Room::join(connector, options()));
    let server = next_server(&mut servers).await;
    server.send(&Frame::Error {
        code: 4212,
        message: "seat reservation expired".into(),
    });
    server.confirm_join("late");

    match join.await.unwrap() {
        Err(NetError::ServerError { code, message }) => {
            assert_eq!(code, 4212);
            assert_eq!(message, "seat reservation expired");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn close_before_confirmation_fails_join() {
    let (connector, mut servers) = MockConnector::new();
    let connector: Arc<dyn Connector> = connector;
    let join = tokio::spawn(Room::join(connector, options()));
    let server = next_server(&mut servers).await;
    server.close(4002, "room disposed");

    match join.await.unwrap() {
        Err(NetError::ConnectionClosed { code, reason }) => {
            assert_eq!(code, 4002);
            assert_eq!(reason, "room disposed");
        }
        other => panic!("expected closed connection, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn silent_server_times_out_join() {
    let (connector, mut servers) = MockConnector::new();
    let connector: Arc<dyn Connector> = connector;
    let join = tokio::spawn(Room::join(
        connector,
        options().with_join_timeout(Duration::from_secs(3)),
    ));
    let _server = next_server(&mut servers).await;
    assert!(matches!(join.await.unwrap(), Err(NetError::Timeout)));
}

#[tokio::test]
async fn refused_connection_fails_join() {
    let (connector, _servers) = MockConnector::new();
    connector.fail_next(1);
    let connector: Arc<dyn Connector> = connector;
    assert!(matches!(
        Room::join(connector, options()).await,
        Err(NetError::Network(_))
    ));
}

#[tokio::test]
async fn unknown_serializer_fails_join() {
    let (connector, mut servers) = MockConnector::new();
    let connector: Arc<dyn Connector> = connector;
    let join = tokio::spawn(Room::join(connector, options()));
    let server = next_server(&mut servers).await;
    server.send(&join_frame("tok", "fossil-delta", Vec::new()));
    assert!(matches!(
        join.await.unwrap(),
        Err(NetError::UnknownSerializer(_))
    ));
}

// ════════════════════════════════════════════════════════════════════
// Messages
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn messages_reach_the_first_registered_handler() {
    let (connector, mut servers) = MockConnector::new();
    let (room, server) = join(connector, &mut servers).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let first = tx.clone();
    room.on_message("PLAYER_STATE", move |payload| {
        first.send(("first", payload)).unwrap();
    });
    room.on_message("PLAYER_STATE", move |payload| {
        tx.send(("second", payload)).unwrap();
    });

    server.send(&Frame::Message {
        kind: "PLAYER_STATE".into(),
        payload: Some(json!({ "coins": 10 })),
    });
    server.send(&Frame::Message {
        kind: "PLAYER_STATE".into(),
        payload: None,
    });

    let (who, payload) = rx.recv().await.unwrap();
    assert_eq!(who, "first");
    assert_eq!(payload, Payload::Json(json!({ "coins": 10 })));
    let (who, payload) = rx.recv().await.unwrap();
    assert_eq!(who, "first");
    assert_eq!(payload, Payload::Empty);
}

#[tokio::test]
async fn byte_messages_and_numeric_kinds_are_dispatched() {
    let (connector, mut servers) = MockConnector::new();
    let (room, server) = join(connector, &mut servers).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    room.on_message(7u32, move |payload| tx.send(payload).unwrap());

    server.send(&Frame::MessageBytes {
        kind: MessageKind::Code(7),
        bytes: vec![1, 2, 3],
    });
    assert_eq!(rx.recv().await.unwrap(), Payload::Bytes(vec![1, 2, 3]));
}

#[tokio::test]
async fn unknown_and_malformed_frames_are_skipped() {
    let (connector, mut servers) = MockConnector::new();
    let (room, server) = join(connector, &mut servers).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    room.on_message("ping", move |payload| tx.send(payload).unwrap());

    server.send_raw(vec![99, 1, 2]);
    server.send_raw(vec![13, 0, 200]);
    server.send(&Frame::Message {
        kind: "ping".into(),
        payload: Some(json!(1)),
    });

    assert_eq!(rx.recv().await.unwrap(), Payload::Json(json!(1)));
    assert!(room.is_open());
}

#[tokio::test]
async fn send_writes_frames_while_open() {
    let (connector, mut servers) = MockConnector::new();
    let (room, mut server) = join(connector, &mut servers).await;

    room.send("READY", None).unwrap();
    room.send("USE_HINTS", Some(json!({ "count": 2 }))).unwrap();
    room.send_bytes("BLOB", vec![9, 9]).unwrap();

    assert_eq!(
        server.recv_frame().await,
        Frame::Message {
            kind: "READY".into(),
            payload: None
        }
    );
    assert_eq!(
        server.recv_frame().await,
        Frame::Message {
            kind: "USE_HINTS".into(),
            payload: Some(json!({ "count": 2 }))
        }
    );
    assert_eq!(
        server.recv_frame().await,
        Frame::MessageBytes {
            kind: "BLOB".into(),
            bytes: vec![9, 9]
        }
    );
}

#[tokio::test]
async fn send_after_close_is_rejected() {
    let (connector, mut servers) = MockConnector::new();
    let (room, server) = join(connector, &mut servers).await;
    let log = leave_log(&room);

    server.close(1006, "connection lost");
    wait_for_leave(&log).await;

    assert!(!room.is_open());
    assert!(matches!(room.send("READY", None), Err(NetError::NotConnected)));
}

// ════════════════════════════════════════════════════════════════════
// Leave
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn leave_is_reported_exactly_once() {
    let (connector, mut servers) = MockConnector::new();
    let (room, server) = join(connector, &mut servers).await;
    let log = leave_log(&room);

    server.send(&Frame::Leave {
        code: 4001,
        reason: Some("server shutting down".into()),
    });
    server.close(1000, "");

    assert_eq!(
        wait_for_leave(&log).await,
        (4001, "server shutting down".to_string())
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(log.lock().unwrap().len(), 1);
    assert_eq!(room.state_kind(), RoomState::Closed);
}

#[tokio::test]
async fn late_leave_handler_sees_the_close() {
    let (connector, mut servers) = MockConnector::new();
    let (room, server) = join(connector, &mut servers).await;
    let early = leave_log(&room);

    server.close(4002, "kicked");
    wait_for_leave(&early).await;

    let late = leave_log(&room);
    assert_eq!(late.lock().unwrap().clone(), vec![(4002, "kicked".to_string())]);
}

#[tokio::test]
async fn consented_leave_sends_leave_frame() {
    let (connector, mut servers) = MockConnector::new();
    let (room, mut server) = join(connector, &mut servers).await;
    let log = leave_log(&room);

    room.leave(true);
    assert_eq!(room.state_kind(), RoomState::Leaving);
    assert_eq!(
        server.recv_frame().await,
        Frame::Leave {
            code: 4000,
            reason: None
        }
    );
    assert_eq!(wait_for_leave(&log).await.0, 4000);

    // Leaving twice is a no-op.
    room.leave(true);
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn dispose_closes_and_marks_room_closed() {
    let (connector, mut servers) = MockConnector::new();
    let (mut room, _server) = join(connector, &mut servers).await;
    let log = leave_log(&room);

    room.dispose().await;
    assert_eq!(room.state_kind(), RoomState::Closed);
    assert_eq!(log.lock().unwrap().first().map(|(c, _)| *c), Some(4000));
}

#[tokio::test(start_paused = true)]
async fn dispose_reports_leave_when_server_never_answers() {
    let (connector, mut servers) = MockConnector::new();
    connector.ignore_leave();
    let (mut room, mut server) = join(connector, &mut servers).await;
    let log = leave_log(&room);

    room.dispose().await;

    assert_eq!(
        server.recv_frame().await,
        Frame::Leave {
            code: 4000,
            reason: None
        }
    );
    assert_eq!(room.state_kind(), RoomState::Closed);
    let expected = vec![(4000, "left without server confirmation".to_string())];
    assert_eq!(log.lock().unwrap().clone(), expected);
    assert_eq!(leave_log(&room).lock().unwrap().clone(), expected);

    // A second dispose does not report again.
    room.dispose().await;
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn dropping_the_handle_reports_leave_once() {
    let (connector, mut servers) = MockConnector::new();
    let (room, _server) = join(connector, &mut servers).await;
    let log = leave_log(&room);

    drop(room);

    assert_eq!(
        log.lock().unwrap().clone(),
        vec![(4000, "room handle dropped".to_string())]
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn removed_listeners_are_not_called() {
    let (connector, mut servers) = MockConnector::new();
    let (room, server) = join(connector, &mut servers).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    room.on_leave(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    room.remove_all_listeners();

    let log = leave_log(&room);
    server.close(1000, "");
    wait_for_leave(&log).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn error_frames_are_informational() {
    let (connector, mut servers) = MockConnector::new();
    let (room, server) = join(connector, &mut servers).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    room.on_error(move |code, message| tx.send((code, message.to_owned())).unwrap());
    server.send(&Frame::Error {
        code: 4216,
        message: "invalid payload".into(),
    });

    assert_eq!(rx.recv().await.unwrap(), (4216, "invalid payload".to_string()));
    assert!(room.is_open());
}

// ════════════════════════════════════════════════════════════════════
// State synchronization
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn snapshot_and_patches_update_state_in_order() {
    let (connector, mut servers) = MockConnector::new();
    let (room, server) = join_with(
        connector,
        &mut servers,
        options(),
        join_frame("tok", "schema", schema().encode()),
    )
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    room.on_state_change(move |state, changes| {
        tx.send((state.to_json(), changes.len())).unwrap();
    });

    server.send(&Frame::StateSnapshot(
        PatchBuilder::new()
            .set(0, &StateValue::Int(100))
            .set(1, &StateValue::Str("ann".into()))
            .finish(),
    ));
    server.send(&Frame::StatePatch(
        PatchBuilder::new()
            .set(0, &StateValue::Int(90))
            .map_set(2, "hint", &StateValue::Int(3))
            .finish(),
    ));

    let (snapshot, n) = rx.recv().await.unwrap();
    assert_eq!(n, 2);
    assert_eq!(snapshot, json!({ "coins": 100, "nickname": "ann" }));
    let (patched, n) = rx.recv().await.unwrap();
    assert_eq!(n, 2);
    assert_eq!(
        patched,
        json!({ "coins": 90, "nickname": "ann", "items": { "hint": 3 } })
    );

    let state = room.state().unwrap();
    assert_eq!(state.get("coins"), Some(StateValue::Int(90)));
    assert_eq!(state.get_entry("items", "hint"), Some(StateValue::Int(3)));
}

#[tokio::test]
async fn undecodable_patch_closes_session_as_desynchronized() {
    let (connector, mut servers) = MockConnector::new();
    let (room, server) = join_with(
        connector,
        &mut servers,
        options(),
        join_frame("tok", "schema", schema().encode()),
    )
    .await;
    let log = leave_log(&room);
    let (tx, mut rx) = mpsc::unbounded_channel();
    room.on_error(move |code, _| tx.send(code).unwrap());

    // Field index 9 is not in the schema.
    server.send(&Frame::StatePatch(
        PatchBuilder::new().set(9, &StateValue::Int(1)).finish(),
    ));

    assert_eq!(rx.recv().await.unwrap(), 1006);
    assert_eq!(
        wait_for_leave(&log).await,
        (1006, DESYNC_REASON.to_string())
    );
}

// ════════════════════════════════════════════════════════════════════
// Dev-mode restart
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn dev_mode_restart_reconnects_to_the_same_seat() {
    let (connector, mut servers) = MockConnector::new();
    let options = options()
        .with_dev_mode(true)
        .with_dev_mode_retry(3, Duration::from_secs(2));
    let (room, server) = join_with(
        Arc::clone(&connector),
        &mut servers,
        options,
        join_frame("tok", "schema", schema().encode()),
    )
    .await;
    let log = leave_log(&room);
    let state = room.state().unwrap();

    server.close(4010, "devmode restart");
    let mut restarted = next_server(&mut servers).await;
    assert_eq!(restarted.url, ROOM_URL);
    restarted.send(&join_frame("tok2", "schema", schema().encode()));
    assert_eq!(restarted.recv_frame().await, Frame::JoinAck);

    assert!(room.is_open());
    assert!(log.lock().unwrap().is_empty());
    assert!(room.state().unwrap().ptr_eq(&state));
    assert_eq!(room.reconnection_token().unwrap().token, "tok2");
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn dev_mode_restart_gives_up_after_retries() {
    let (connector, mut servers) = MockConnector::new();
    let options = options()
        .with_dev_mode(true)
        .with_dev_mode_retry(3, Duration::from_secs(2));
    let (room, server) = join_with(
        Arc::clone(&connector),
        &mut servers,
        options,
        join_frame("tok", "none", Vec::new()),
    )
    .await;
    let log = leave_log(&room);

    connector.fail_next(3);
    server.close(4010, "devmode restart");

    assert_eq!(wait_for_leave(&log).await.0, 4010);
    assert_eq!(connector.attempts(), 1 + 3);
}

#[tokio::test]
async fn restart_code_without_dev_mode_reaches_leave() {
    let (connector, mut servers) = MockConnector::new();
    let (room, server) = join(Arc::clone(&connector), &mut servers).await;
    let log = leave_log(&room);

    server.close(4010, "devmode restart");
    assert_eq!(wait_for_leave(&log).await.0, 4010);
    assert_eq!(connector.attempts(), 1);
}
