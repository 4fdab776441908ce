//! Matchmaking client tests: seat reservation requests, error mapping,
//! connection URLs and reconnection tokens.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use nonogram_net::endpoint::Endpoint;
use nonogram_net::http::{Http, Method};
use nonogram_net::protocol::{MatchMethod, ReconnectionToken};
use nonogram_net::{Client, ErrorCode, NetError};

use common::{next_server, reservation_body, MockConnector, MockHttp, Reply, SERVER_URL};

fn client(backend: Arc<MockHttp>, connector: Arc<MockConnector>) -> Client {
    let http = Arc::new(Http::new(
        backend,
        Endpoint::parse(SERVER_URL).unwrap(),
        vec![("X-Client-Version".into(), "1.4.0".into())],
        Duration::from_secs(10),
    ));
    Client::new(http, connector)
}

#[tokio::test]
async fn join_or_create_reserves_and_connects() {
    let backend = MockHttp::new();
    backend.push(
        "/matchmake/joinOrCreate/lobby",
        Reply::Json(200, reservation_body("lobby", "r1", "s1")),
    );
    let (connector, _servers) = MockConnector::auto_join("tok");
    let client = client(Arc::clone(&backend), Arc::clone(&connector));
    client.http().set_auth_token(Some("at-1".into()));

    let room = client
        .join_or_create("lobby", json!({ "mode": "daily" }))
        .await
        .unwrap();

    assert_eq!(room.room_id(), "r1");
    assert_eq!(room.session_id(), "s1");
    assert!(room.is_open());

    let requests = backend.requests_to("/matchmake/joinOrCreate/lobby");
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.json_body(), Some(json!({ "mode": "daily" })));
    assert_eq!(request.header("authorization"), Some("Bearer at-1"));
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.header("x-client-version"), Some("1.4.0"));

    assert_eq!(
        connector.urls(),
        vec!["ws://localhost:2567/proc-1/r1?sessionId=s1&_authToken=at-1&mode=daily".to_string()]
    );
}

#[tokio::test]
async fn methods_use_their_paths() {
    let backend = MockHttp::new();
    for path in [
        "/matchmake/create/puzzle",
        "/matchmake/join/puzzle",
        "/matchmake/joinById/r9",
    ] {
        backend.always(path, Reply::Json(200, reservation_body("puzzle", "r9", "s9")));
    }
    let (connector, _servers) = MockConnector::auto_join("tok");
    let client = client(Arc::clone(&backend), connector);

    client.create("puzzle", json!({})).await.unwrap();
    client.join("puzzle", json!({})).await.unwrap();
    client.join_by_id("r9", json!({})).await.unwrap();

    assert_eq!(backend.calls_to("/matchmake/create/puzzle"), 1);
    assert_eq!(backend.calls_to("/matchmake/join/puzzle"), 1);
    assert_eq!(backend.calls_to("/matchmake/joinById/r9"), 1);
}

#[tokio::test]
async fn structured_error_becomes_matchmake_error() {
    let backend = MockHttp::new();
    backend.push(
        "/matchmake/join/puzzle",
        Reply::Json(200, json!({ "code": 4211, "error": "no rooms found" })),
    );
    backend.push(
        "/matchmake/join/puzzle",
        Reply::Json(500, json!({ "code": 4213, "error": "matchmaking failed" })),
    );
    let (connector, _servers) = MockConnector::new();
    let client = client(backend, Arc::clone(&connector));

    for (expected, kind) in [
        (4211, ErrorCode::MatchmakeInvalidCriteria),
        (4213, ErrorCode::MatchmakeUnhandled),
    ] {
        match client.join("puzzle", json!({})).await {
            Err(NetError::MatchMake(e)) => {
                assert_eq!(e.code, expected);
                assert_eq!(e.kind(), Some(kind));
            }
            other => panic!("expected matchmake error, got {other:?}"),
        }
    }
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn unknown_matchmake_code_has_no_kind() {
    let backend = MockHttp::new();
    backend.push(
        "/matchmake/create/puzzle",
        Reply::Json(200, json!({ "code": 4999, "error": "custom rejection" })),
    );
    let (connector, _servers) = MockConnector::new();
    let client = client(backend, connector);

    match client.create("puzzle", json!({})).await {
        Err(NetError::MatchMake(e)) => {
            assert_eq!(e.code, 4999);
            assert_eq!(e.kind(), None);
            assert_eq!(e.message, "custom rejection");
        }
        other => panic!("expected matchmake error, got {other:?}"),
    }
}

#[tokio::test]
async fn unstructured_failure_becomes_http_error() {
    let backend = MockHttp::new();
    let (connector, _servers) = MockConnector::new();
    let client = client(backend, connector);

    match client.join_or_create("lobby", json!({})).await {
        Err(NetError::Http(e)) => {
            assert_eq!(e.code, 404);
            assert_eq!(e.message, "not found");
        }
        other => panic!("expected http error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_reconnection_token_fails_before_any_request() {
    let backend = MockHttp::new();
    let (connector, _servers) = MockConnector::new();
    let client = client(Arc::clone(&backend), Arc::clone(&connector));

    assert!(matches!(
        client.reconnect("noColonHere").await,
        Err(NetError::InvalidReconnectionToken(_))
    ));
    assert!(backend.requests().is_empty());
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn reconnection_token_round_trips_through_reconnect() {
    let backend = MockHttp::new();
    backend.push(
        "/matchmake/joinOrCreate/lobby",
        Reply::Json(200, reservation_body("lobby", "r1", "s1")),
    );
    backend.push(
        "/matchmake/reconnect/r1",
        Reply::Json(200, reservation_body("lobby", "r1", "s1")),
    );
    let (connector, _servers) = MockConnector::auto_join("abc");
    let client = client(Arc::clone(&backend), Arc::clone(&connector));

    let room = client.join_or_create("lobby", json!({})).await.unwrap();
    let token = room.reconnection_token().unwrap();
    assert_eq!(token.to_string(), "r1:abc");
    assert_eq!(
        "r1:abc".parse::<ReconnectionToken>().unwrap(),
        ReconnectionToken::new("r1", "abc")
    );

    let resumed = client.reconnect(&token.to_string()).await.unwrap();
    assert_eq!(resumed.room_id(), "r1");

    let requests = backend.requests_to("/matchmake/reconnect/r1");
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].json_body(),
        Some(json!({ "reconnectionToken": "abc" }))
    );
    assert_eq!(
        connector.urls()[1],
        "ws://localhost:2567/proc-1/r1?sessionId=s1&reconnectionToken=abc"
    );
}

#[tokio::test]
async fn reservation_carries_reconnection_token_only_for_reconnect() {
    let backend = MockHttp::new();
    backend.always(
        "/matchmake/reconnect/r1",
        Reply::Json(200, reservation_body("lobby", "r1", "s1")),
    );
    backend.always(
        "/matchmake/joinById/r1",
        Reply::Json(200, reservation_body("lobby", "r1", "s1")),
    );
    let (connector, _servers) = MockConnector::new();
    let client = client(backend, connector);

    let options = json!({ "reconnectionToken": "abc" });
    let reconnect = client
        .reserve_seat(MatchMethod::Reconnect, "r1", &options)
        .await
        .unwrap();
    assert_eq!(reconnect.reconnection_token.as_deref(), Some("abc"));

    let by_id = client
        .reserve_seat(MatchMethod::JoinById, "r1", &json!({}))
        .await
        .unwrap();
    assert_eq!(by_id.reconnection_token, None);
}

#[tokio::test]
async fn public_address_and_protocol_shape_the_room_url() {
    let backend = MockHttp::new();
    let mut body = reservation_body("lobby", "r1", "s1");
    body["room"]["publicAddress"] = json!("10.0.0.5:4000");
    backend.push("/matchmake/joinOrCreate/lobby", Reply::Json(200, body));
    let (connector, _servers) = MockConnector::new();
    let client = client(backend, connector);

    let reservation = client
        .reserve_seat(MatchMethod::JoinOrCreate, "lobby", &json!({}))
        .await
        .unwrap();
    assert_eq!(reservation.protocol, "ws");
    assert_eq!(
        client.room_url(&reservation, &json!({ "sessionId": "ignored", "level": 3 })),
        "ws://10.0.0.5:4000/proc-1/r1?sessionId=s1&level=3"
    );
}

#[tokio::test(start_paused = true)]
async fn dev_mode_reservation_survives_server_restart() {
    let backend = MockHttp::new();
    let mut body = reservation_body("lobby", "r1", "s1");
    body["devMode"] = json!(true);
    backend.push("/matchmake/joinOrCreate/lobby", Reply::Json(200, body));
    let (connector, mut servers) = MockConnector::auto_join("tok");
    let client = client(backend, Arc::clone(&connector))
        .with_dev_mode_retry(2, Duration::from_secs(1));

    let room = client.join_or_create("lobby", json!({})).await.unwrap();
    let first = next_server(&mut servers).await;
    first.close(4010, "devmode restart");

    let _second = next_server(&mut servers).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while !room.is_open() || connector.attempts() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(connector.urls()[0], connector.urls()[1]);
}
