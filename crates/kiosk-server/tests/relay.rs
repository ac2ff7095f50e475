//! Devtools relay end to end: real listeners, a fake browser, and a
//! tungstenite client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use kiosk_activity::{ActivityController, MemoryControl};
use kiosk_devtools::UpstreamManager;
use kiosk_server::{KioskServer, ShutdownCoordinator};
use kiosk_settings::KioskSettings;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_async, connect_async};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct Relay {
    addr: SocketAddr,
    upstream: UpstreamManager,
    activity: ActivityController,
    shutdown: Arc<ShutdownCoordinator>,
}

/// Serve the devtools router on an ephemeral port.
async fn boot_relay() -> Relay {
    let activity = ActivityController::new(Arc::new(MemoryControl::new()), Duration::from_secs(5));
    let upstream = UpstreamManager::new("/nonexistent", Duration::from_millis(10));
    let shutdown = Arc::new(ShutdownCoordinator::new());
    let server = KioskServer::new(
        &KioskSettings::default(),
        activity.clone(),
        upstream.clone(),
        shutdown.clone(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server.devtools_router();
    let _ = tokio::spawn(async move { axum::serve(listener, router).await });

    Relay {
        addr,
        upstream,
        activity,
        shutdown,
    }
}

/// A browser stand-in that prefixes every text frame with `tag`.
async fn echo_browser(tag: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _ = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let _ = tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    match msg {
                        Message::Text(text) => {
                            let reply = format!("{tag}:{}", text.as_str());
                            if ws.send(Message::text(reply)).await.is_err() {
                                return;
                            }
                        }
                        Message::Close(_) => return,
                        _ => {}
                    }
                }
            });
        }
    });
    format!("ws://{addr}/devtools/browser/{tag}")
}

/// A browser stand-in that drops the TCP connection after one frame.
async fn crashing_browser() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _ = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _ = ws.next().await;
        drop(ws);
    });
    format!("ws://{addr}/devtools/browser/crash")
}

async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn connect(addr: SocketAddr, path: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(format!("ws://{addr}{path}")))
        .await
        .unwrap()
        .unwrap();
    ws
}

async fn roundtrip(ws: &mut WsStream, text: &str) -> String {
    ws.send(Message::text(text)).await.unwrap();
    loop {
        match timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap() {
            Message::Text(reply) => return reply.as_str().to_owned(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn expect_close(ws: &mut WsStream) -> (u16, String) {
    loop {
        match timeout(TIMEOUT, ws.next()).await.unwrap() {
            Some(Ok(Message::Close(Some(frame)))) => {
                return (u16::from(frame.code), frame.reason.as_str().to_owned());
            }
            Some(Ok(Message::Close(None))) | None => panic!("closed without a close frame"),
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("read failed before close frame: {e}"),
        }
    }
}

async fn wait_for_idle(activity: &ActivityController) {
    timeout(TIMEOUT, async {
        while activity.snapshot().holders > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("activity was never released");
}

fn http_status(err: WsError) -> u16 {
    match err {
        WsError::Http(resp) => resp.status().as_u16(),
        other => panic!("expected an HTTP rejection, got {other}"),
    }
}

// ── Tests ──

#[tokio::test]
async fn frames_are_relayed_both_ways() {
    let relay = boot_relay().await;
    let _ = relay.upstream.announce(&echo_browser("a").await);

    let mut ws = connect(relay.addr, "/devtools/browser/a").await;
    assert_eq!(
        roundtrip(&mut ws, r#"{"id":1,"method":"Browser.getVersion"}"#).await,
        r#"a:{"id":1,"method":"Browser.getVersion"}"#
    );
    assert_eq!(roundtrip(&mut ws, "second").await, "a:second");
}

#[tokio::test]
async fn session_holds_activity_until_closed() {
    let relay = boot_relay().await;
    let _ = relay.upstream.announce(&echo_browser("a").await);

    let mut ws = connect(relay.addr, "/").await;
    let _ = roundtrip(&mut ws, "ping").await;
    assert!(relay.activity.snapshot().holders >= 1);

    ws.close(None).await.unwrap();
    wait_for_idle(&relay.activity).await;
}

#[tokio::test]
async fn open_session_survives_browser_restart() {
    let relay = boot_relay().await;
    let _ = relay.upstream.announce(&echo_browser("a").await);
    let mut old = connect(relay.addr, "/").await;
    assert_eq!(roundtrip(&mut old, "x").await, "a:x");

    assert!(relay.upstream.announce(&echo_browser("b").await));

    // existing session stays pinned to the browser it dialed
    assert_eq!(roundtrip(&mut old, "y").await, "a:y");
    let mut new = connect(relay.addr, "/").await;
    assert_eq!(roundtrip(&mut new, "z").await, "b:z");
}

#[tokio::test]
async fn upstream_loss_closes_client_with_1011() {
    let relay = boot_relay().await;
    let _ = relay.upstream.announce(&crashing_browser().await);

    let mut ws = connect(relay.addr, "/").await;
    ws.send(Message::text("boom")).await.unwrap();

    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 1011);
    assert_eq!(CloseCode::from(code), CloseCode::Error);
    assert_eq!(reason, "upstream connection lost");
    wait_for_idle(&relay.activity).await;
}

#[tokio::test]
async fn shutdown_closes_open_sessions() {
    let relay = boot_relay().await;
    let _ = relay.upstream.announce(&echo_browser("a").await);
    let mut ws = connect(relay.addr, "/").await;
    let _ = roundtrip(&mut ws, "ping").await;

    relay.shutdown.shutdown();
    let (code, _) = expect_close(&mut ws).await;
    assert_eq!(code, 1001);
}

#[tokio::test]
async fn upgrade_refused_before_upstream_is_known() {
    let relay = boot_relay().await;
    let err = connect_async(format!("ws://{}/", relay.addr))
        .await
        .unwrap_err();
    assert_eq!(http_status(err), 503);
}

#[tokio::test]
async fn unreachable_browser_is_bad_gateway() {
    let relay = boot_relay().await;
    let port = dead_port().await;
    let _ = relay
        .upstream
        .announce(&format!("ws://127.0.0.1:{port}/devtools/browser/gone"));

    let err = connect_async(format!("ws://{}/", relay.addr))
        .await
        .unwrap_err();
    assert_eq!(http_status(err), 502);
    wait_for_idle(&relay.activity).await;
}

#[tokio::test]
async fn json_version_points_at_relay() {
    let relay = boot_relay().await;
    let url = format!("http://{}/json/version", relay.addr);

    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status().as_u16(), 503);

    let _ = relay.upstream.announce(&echo_browser("a").await);
    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(
        body["webSocketDebuggerUrl"],
        format!("ws://{}/", relay.addr)
    );
}
