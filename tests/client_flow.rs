// Integration tests running the client against an in-process mock venue.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use url::Url;
use venuelink::events::LinkEvent;
use venuelink::{ClientError, Config, ConnectionManager};

type Session = WebSocketStream<TcpStream>;

/// Binds a local mock venue; every accepted connection is handed to `session`.
async fn spawn_venue<F, Fut>(session: F) -> (Url, Arc<AtomicUsize>, JoinHandle<()>)
where
    F: Fn(Session) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();
    let session = Arc::new(session);

    let server = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let session = session.clone();
            tokio::spawn(async move {
                if let Ok(ws) = accept_async(stream).await {
                    (session.as_ref())(ws).await;
                }
            });
        }
    });

    let url = Url::parse(&format!("ws://{addr}")).unwrap();
    (url, connections, server)
}

fn req_id(frame: &Value) -> Value {
    frame.get("req_id").cloned().unwrap_or(Value::Null)
}

async fn send(ws: &mut Session, payload: Value) {
    ws.send(Message::Text(payload.to_string())).await.unwrap();
}

async fn next_request(ws: &mut Session) -> Option<Value> {
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => return serde_json::from_str(&text).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            _ => {}
        }
    }
    None
}

/// Venue session that accepts any token and answers the trading verbs the
/// tests exercise.
async fn cooperative_session(mut ws: Session) {
    while let Some(request) = next_request(&mut ws).await {
        let id = req_id(&request);
        if request.get("authorize").is_some() {
            send(
                &mut ws,
                json!({
                    "msg_type": "authorize",
                    "req_id": id,
                    "authorize": {"loginid": "CR900001", "balance": 1000.0, "currency": "USD"}
                }),
            )
            .await;
        } else if request.get("ticks_history").is_some() {
            let prices: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
            let times: Vec<i64> = (0..50).map(|i| 1_700_000_000 + i).collect();
            send(
                &mut ws,
                json!({
                    "msg_type": "history",
                    "req_id": id,
                    "history": {"prices": prices, "times": times},
                    "subscription": {"id": "sub-ticks-1"}
                }),
            )
            .await;
            send(
                &mut ws,
                json!({
                    "msg_type": "tick",
                    "tick": {"id": "sub-ticks-1", "symbol": "R_100", "quote": 250.75, "epoch": 1_700_000_050}
                }),
            )
            .await;
        } else if request.get("contracts_for").is_some() {
            send(
                &mut ws,
                json!({
                    "msg_type": "contracts_for",
                    "req_id": id,
                    "contracts_for": {"available": [{"contract_type": "DIGITOVER"}]}
                }),
            )
            .await;
        }
    }
}

fn manager_for(url: Url) -> ConnectionManager {
    ConnectionManager::new(Arc::new(Config::for_endpoint(url, "1089")))
}

#[tokio::test]
async fn connect_authorizes_against_venue() {
    let (url, _, server) = spawn_venue(cooperative_session).await;
    let manager = manager_for(url);
    let client = manager.get_or_create("alice");

    client.connect("valid-token", None).await.unwrap();
    assert!(client.is_authorized().await);

    manager.shutdown_all().await;
    server.abort();
}

#[tokio::test]
async fn repeated_connect_reuses_the_transport() {
    let (url, connections, server) = spawn_venue(cooperative_session).await;
    let manager = manager_for(url);
    let client = manager.get_or_create("alice");

    client.connect("valid-token", Some("CR900001")).await.unwrap();
    client.connect("valid-token", Some("CR900001")).await.unwrap();

    assert_eq!(connections.load(Ordering::SeqCst), 1);

    manager.shutdown_all().await;
    server.abort();
}

#[tokio::test]
async fn changing_token_replaces_the_transport() {
    let (url, connections, server) = spawn_venue(cooperative_session).await;
    let manager = manager_for(url);
    let client = manager.get_or_create("alice");

    client.connect("token-one", None).await.unwrap();
    client.connect("token-two", None).await.unwrap();

    assert_eq!(connections.load(Ordering::SeqCst), 2);
    assert!(client.is_authorized().await);

    manager.shutdown_all().await;
    server.abort();
}

#[tokio::test]
async fn rejected_token_surfaces_authorization_error() {
    let (url, _, server) = spawn_venue(|mut ws: Session| async move {
        if let Some(request) = next_request(&mut ws).await {
            send(
                &mut ws,
                json!({
                    "msg_type": "authorize",
                    "req_id": req_id(&request),
                    "error": {"code": "InvalidToken", "message": "The token is invalid."}
                }),
            )
            .await;
        }
    })
    .await;
    let manager = manager_for(url);
    let client = manager.get_or_create("alice");

    let err = client.connect("bad-token", None).await.unwrap_err();
    assert!(err.is_authorization_error());
    assert!(matches!(err, ClientError::AuthRejected { .. }));
    assert!(!client.is_authorized().await);

    server.abort();
}

#[tokio::test]
async fn app_id_mismatch_is_distinguishable_from_bad_token() {
    let (url, _, server) = spawn_venue(|mut ws: Session| async move {
        if let Some(request) = next_request(&mut ws).await {
            send(
                &mut ws,
                json!({
                    "msg_type": "authorize",
                    "req_id": req_id(&request),
                    "error": {"code": "InvalidAppID", "message": "Your app_id is invalid."}
                }),
            )
            .await;
        }
    })
    .await;
    let manager = manager_for(url);
    let client = manager.get_or_create("alice");

    let err = client.connect("some-token", None).await.unwrap_err();
    assert!(matches!(err, ClientError::AppIdMismatch { .. }));
    assert!(err.is_authorization_error());

    server.abort();
}

#[tokio::test]
async fn close_before_acknowledgment_fails_the_connect() {
    let (url, _, server) = spawn_venue(|mut ws: Session| async move {
        // Take the authorize request, then hang up without answering.
        let _ = next_request(&mut ws).await;
        let _ = ws.close(None).await;
    })
    .await;
    let manager = manager_for(url);
    let client = manager.get_or_create("alice");

    let err = client.connect("some-token", None).await.unwrap_err();
    assert!(err.is_connection_error());
    assert!(!client.is_authorized().await);

    server.abort();
}

#[tokio::test]
async fn tick_subscription_backfills_then_streams() {
    let (url, _, server) = spawn_venue(cooperative_session).await;
    let manager = manager_for(url);
    let client = manager.get_or_create("alice");

    client.connect("valid-token", None).await.unwrap();

    let bus = client.events();
    let mut history = bus.subscribe_history();
    let mut ticks = bus.subscribe_ticks();

    client.subscribe_to_symbol("R_100").await.unwrap();

    let backfill = timeout(Duration::from_secs(5), history.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(backfill.len(), 50);

    let live = timeout(Duration::from_secs(5), ticks.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.quote, 250.75);

    let snapshot = client.ticks().await;
    assert_eq!(snapshot.len(), 51);
    assert_eq!(snapshot.last().unwrap().quote, 250.75);

    manager.shutdown_all().await;
    server.abort();
}

#[tokio::test]
async fn contracts_for_round_trips_by_correlation_id() {
    let (url, _, server) = spawn_venue(cooperative_session).await;
    let manager = manager_for(url);
    let client = manager.get_or_create("alice");

    client.connect("valid-token", None).await.unwrap();
    let catalog = client.contracts_for("R_100", "USD").await.unwrap();
    assert!(catalog.to_string().contains("DIGITOVER"));

    manager.shutdown_all().await;
    server.abort();
}

#[tokio::test]
async fn reconnect_restores_tick_subscription_without_caller_involvement() {
    let sessions = Arc::new(AtomicUsize::new(0));
    let session_counter = sessions.clone();
    let (resubscribed_tx, mut resubscribed_rx) = tokio::sync::mpsc::unbounded_channel::<Value>();

    let (url, _, server) = spawn_venue(move |mut ws: Session| {
        let session = session_counter.fetch_add(1, Ordering::SeqCst);
        let resubscribed = resubscribed_tx.clone();
        async move {
            while let Some(request) = next_request(&mut ws).await {
                let id = req_id(&request);
                if request.get("authorize").is_some() {
                    send(
                        &mut ws,
                        json!({
                            "msg_type": "authorize",
                            "req_id": id,
                            "authorize": {"loginid": "CR900001"}
                        }),
                    )
                    .await;
                } else if request.get("ticks_history").is_some() {
                    send(
                        &mut ws,
                        json!({
                            "msg_type": "history",
                            "req_id": id,
                            "history": {"prices": [100.0], "times": [1_700_000_000]},
                            "subscription": {"id": "sub-ticks-1"}
                        }),
                    )
                    .await;
                    if session == 0 {
                        // Drop the transport right after the backfill; the
                        // client must recover on its own.
                        let _ = ws.close(None).await;
                        return;
                    }
                    let _ = resubscribed.send(request);
                }
            }
        }
    })
    .await;
    let manager = manager_for(url);
    let client = manager.get_or_create("alice");

    client.connect("valid-token", None).await.unwrap();
    client.subscribe_to_symbol("R_100").await.unwrap();

    // After the first backoff step the replacement connection authorizes and
    // re-issues the desired tick subscription by itself.
    let request = timeout(Duration::from_secs(10), resubscribed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request["ticks_history"], "R_100");
    assert!(sessions.load(Ordering::SeqCst) >= 2);
    assert!(client.is_authorized().await);

    manager.shutdown_all().await;
    server.abort();
}

#[tokio::test]
async fn unexpected_close_after_authorization_triggers_reconnect() {
    let (url, connections, server) = spawn_venue(|mut ws: Session| async move {
        // Authorize, then drop the transport to simulate a venue outage.
        if let Some(request) = next_request(&mut ws).await {
            if request.get("authorize").is_some() {
                send(
                    &mut ws,
                    json!({
                        "msg_type": "authorize",
                        "req_id": req_id(&request),
                        "authorize": {"loginid": "CR900001"}
                    }),
                )
                .await;
            }
        }
        let _ = ws.close(None).await;
    })
    .await;
    let manager = manager_for(url);
    let client = manager.get_or_create("alice");

    let bus = client.events();
    let mut link = bus.subscribe_link();

    client.connect("valid-token", None).await.unwrap();

    // First the close notification, then the scheduled retry with the
    // first backoff step.
    let mut saw_reconnecting = false;
    for _ in 0..4 {
        let event = timeout(Duration::from_secs(5), link.recv())
            .await
            .unwrap()
            .unwrap();
        if let LinkEvent::Reconnecting { attempt, delay_ms } = event {
            assert_eq!(attempt, 1);
            assert_eq!(delay_ms, 2000);
            saw_reconnecting = true;
            break;
        }
    }
    assert!(saw_reconnecting);
    assert_eq!(connections.load(Ordering::SeqCst), 1);

    manager.shutdown_all().await;
    server.abort();
}
