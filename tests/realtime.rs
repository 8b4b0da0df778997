use fasttransfer::api::{build_router, AppState};
use fasttransfer::config::Config;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::{SocketAddr, TcpListener};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (SocketAddr, JoinHandle<()>, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let config = Config {
        bind: addr.to_string(),
        max_upload_mb: 1,
        host_only_uploads: false,
        logging_enabled: false,
    };
    let state = AppState::new(config);
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server, state)
}

async fn create_room(client: &reqwest::Client, addr: SocketAddr) -> (String, String) {
    let v: Value = client
        .post(format!("http://{}/api/rooms", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    (
        v["roomId"].as_str().unwrap().to_string(),
        v["hostId"].as_str().unwrap().to_string(),
    )
}

async fn ws_connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    ws
}

async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(WsMessage::Text(value.to_string())).await.unwrap();
}

async fn next_event(ws: &mut WsClient) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("connection closed while waiting for event")
            .unwrap();
        match msg {
            WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
            WsMessage::Close(_) => panic!("connection closed while waiting for event"),
            _ => continue,
        }
    }
}

/// Wait for the peer to be severed: anything but a Close frame or a clean
/// end-of-stream is a failure.
async fn expect_severed(ws: &mut WsClient) {
    loop {
        match timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for the connection to close")
        {
            None => return,
            Some(Ok(WsMessage::Close(_))) => return,
            Some(Err(_)) => return,
            Some(Ok(other)) => panic!("expected close, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn full_room_lifecycle() {
    let (addr, server, state) = spawn_server().await;
    let client = reqwest::Client::new();
    let (room_id, host_id) = create_room(&client, addr).await;

    // host binds with its token
    let mut host = ws_connect(addr).await;
    send_json(
        &mut host,
        json!({"t": "joinRoom", "roomId": room_id, "hostToken": host_id}),
    )
    .await;
    let ev = next_event(&mut host).await;
    assert_eq!(ev["t"], "roomJoined");
    assert_eq!(ev["isHost"], true);
    assert!(ev["files"].as_array().unwrap().is_empty());
    let ev = next_event(&mut host).await;
    assert_eq!(ev["t"], "participantCountUpdate");
    assert_eq!(ev["count"], 1);

    // guest joins and gets the empty snapshot
    let mut guest = ws_connect(addr).await;
    send_json(&mut guest, json!({"t": "joinRoom", "roomId": room_id})).await;
    let ev = next_event(&mut guest).await;
    assert_eq!(ev["t"], "roomJoined");
    assert_eq!(ev["isHost"], false);
    assert!(ev["files"].as_array().unwrap().is_empty());
    let ev = next_event(&mut guest).await;
    assert_eq!(ev["t"], "participantCountUpdate");
    assert_eq!(ev["count"], 2);
    let ev = next_event(&mut host).await;
    assert_eq!(ev["t"], "participantCountUpdate");
    assert_eq!(ev["count"], 2);

    // an upload fans out to everyone in the room
    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(vec![0u8; 1024])
            .file_name("report.pdf")
            .mime_str("application/pdf")
            .unwrap(),
    );
    let v: Value = client
        .post(format!("http://{}/api/rooms/{}/upload", addr, room_id))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let file_id = v["file"]["id"].as_str().unwrap().to_string();

    for ws in [&mut host, &mut guest] {
        let ev = next_event(ws).await;
        assert_eq!(ev["t"], "fileUploaded");
        assert_eq!(ev["file"]["id"].as_str().unwrap(), file_id);
        assert_eq!(ev["file"]["originalName"], "report.pdf");
        assert_eq!(ev["file"]["size"], 1024);
    }

    // share messages relay the same way
    send_json(
        &mut guest,
        json!({
            "t": "shareMessage",
            "payload": {"kind": "text", "content": "take a look"},
            "senderName": "guest"
        }),
    )
    .await;
    for ws in [&mut host, &mut guest] {
        let ev = next_event(ws).await;
        assert_eq!(ev["t"], "messageShared");
        assert_eq!(ev["message"]["payload"]["kind"], "text");
        assert_eq!(ev["message"]["payload"]["content"], "take a look");
        assert_eq!(ev["message"]["senderName"], "guest");
    }

    // host departure: guests are told why, then severed, then the room and
    // every file in it are gone
    host.close(None).await.unwrap();
    let ev = next_event(&mut guest).await;
    assert_eq!(ev["t"], "roomClosed");
    assert!(!ev["reason"].as_str().unwrap().is_empty());
    expect_severed(&mut guest).await;

    assert!(!state.relay.room_exists(&room_id));
    let resp = client
        .get(format!(
            "http://{}/api/rooms/{}/files/{}",
            addr, room_id, file_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let resp = client
        .get(format!("http://{}/api/rooms/{}/files", addr, room_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    server.abort();
}

#[tokio::test]
async fn join_unknown_room_yields_error_event() {
    let (addr, server, _state) = spawn_server().await;
    let mut ws = ws_connect(addr).await;
    send_json(&mut ws, json!({"t": "joinRoom", "roomId": "NOPE1234"})).await;
    let ev = next_event(&mut ws).await;
    assert_eq!(ev["t"], "error");
    assert!(!ev["message"].as_str().unwrap().is_empty());
    server.abort();
}

#[tokio::test]
async fn duplicate_join_does_not_inflate_count() {
    let (addr, server, state) = spawn_server().await;
    let client = reqwest::Client::new();
    let (room_id, host_id) = create_room(&client, addr).await;

    let mut host = ws_connect(addr).await;
    send_json(
        &mut host,
        json!({"t": "joinRoom", "roomId": room_id, "hostToken": host_id}),
    )
    .await;
    next_event(&mut host).await; // roomJoined
    next_event(&mut host).await; // count 1

    // a duplicate client-side join signal is answered but not double-counted
    send_json(
        &mut host,
        json!({"t": "joinRoom", "roomId": room_id, "hostToken": host_id}),
    )
    .await;
    let ev = next_event(&mut host).await;
    assert_eq!(ev["t"], "roomJoined");
    let ev = next_event(&mut host).await;
    assert_eq!(ev["t"], "participantCountUpdate");
    assert_eq!(ev["count"], 1);
    assert_eq!(state.relay.participant_count(&room_id), Some(1));

    server.abort();
}

#[tokio::test]
async fn guest_disconnect_updates_count_and_keeps_room() {
    let (addr, server, state) = spawn_server().await;
    let client = reqwest::Client::new();
    let (room_id, host_id) = create_room(&client, addr).await;

    let mut host = ws_connect(addr).await;
    send_json(
        &mut host,
        json!({"t": "joinRoom", "roomId": room_id, "hostToken": host_id}),
    )
    .await;
    next_event(&mut host).await;
    next_event(&mut host).await;

    let mut guest = ws_connect(addr).await;
    send_json(&mut guest, json!({"t": "joinRoom", "roomId": room_id})).await;
    next_event(&mut guest).await;
    next_event(&mut guest).await;
    let ev = next_event(&mut host).await;
    assert_eq!(ev["count"], 2);

    guest.close(None).await.unwrap();
    let ev = next_event(&mut host).await;
    assert_eq!(ev["t"], "participantCountUpdate");
    assert_eq!(ev["count"], 1);
    assert!(state.relay.room_exists(&room_id));

    server.abort();
}

#[tokio::test]
async fn switching_rooms_rebinds_and_settles_counts() {
    let (addr, server, state) = spawn_server().await;
    let client = reqwest::Client::new();
    let (room_a, host_a_token) = create_room(&client, addr).await;
    let (room_b, host_b_token) = create_room(&client, addr).await;

    let mut host_a = ws_connect(addr).await;
    send_json(
        &mut host_a,
        json!({"t": "joinRoom", "roomId": room_a, "hostToken": host_a_token}),
    )
    .await;
    next_event(&mut host_a).await;
    next_event(&mut host_a).await;

    let mut host_b = ws_connect(addr).await;
    send_json(
        &mut host_b,
        json!({"t": "joinRoom", "roomId": room_b, "hostToken": host_b_token}),
    )
    .await;
    next_event(&mut host_b).await;
    next_event(&mut host_b).await;

    let mut guest = ws_connect(addr).await;
    send_json(&mut guest, json!({"t": "joinRoom", "roomId": room_a})).await;
    next_event(&mut guest).await;
    next_event(&mut guest).await;
    let ev = next_event(&mut host_a).await;
    assert_eq!(ev["count"], 2);

    // moving to room B leaves room A first
    send_json(&mut guest, json!({"t": "joinRoom", "roomId": room_b})).await;
    let ev = next_event(&mut guest).await;
    assert_eq!(ev["t"], "roomJoined");
    assert_eq!(ev["roomId"], room_b.as_str());
    let ev = next_event(&mut host_a).await;
    assert_eq!(ev["t"], "participantCountUpdate");
    assert_eq!(ev["count"], 1);
    let ev = next_event(&mut host_b).await;
    assert_eq!(ev["t"], "participantCountUpdate");
    assert_eq!(ev["count"], 2);
    assert_eq!(state.relay.participant_count(&room_a), Some(1));
    assert_eq!(state.relay.participant_count(&room_b), Some(2));

    server.abort();
}
