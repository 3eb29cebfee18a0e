//! Integration tests for ko_client against a live in-process server.
//!
//! Each test binds the real router to an ephemeral port with the in-memory
//! store behind it.

use futures_util::{SinkExt, StreamExt};
use kickoff::{
    MatchError, MatchRules,
    arena::MatchService,
    auth::TokenVerifier,
    db::InMemoryStore,
    entities::MatchMode,
    game::entities::PlayerId,
    matchmaking::{Allocation, MatchmakingConfig},
    realtime::{ChannelManager, ClientCommand, ClientEnvelope, ServerEvent, StateFetcher},
};
use ko_client::api_client::{ApiClient, ApiFailure};
use ko_server::api::{AppState, create_router};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SECRET: &str = "test_secret_key_for_testing_only_0123456789";

struct TestServer {
    base_url: String,
    verifier: Arc<TokenVerifier>,
}

impl TestServer {
    async fn spawn() -> Self {
        let service = Arc::new(MatchService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(ChannelManager::default()),
            Arc::new(MatchRules::default()),
            MatchmakingConfig::default(),
        ));
        let verifier = Arc::new(TokenVerifier::new(SECRET).unwrap());
        let app = create_router(AppState {
            service,
            verifier: verifier.clone(),
            database: None,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            verifier,
        }
    }

    fn client(&self, player_id: PlayerId) -> ApiClient {
        let token = self
            .verifier
            .issue(player_id, &format!("player_{player_id}"), chrono::Duration::minutes(15))
            .unwrap();
        ApiClient::new(self.base_url.clone()).with_token(token)
    }
}

async fn paired(server: &TestServer) -> (ApiClient, ApiClient, uuid::Uuid) {
    let home = server.client(1);
    let away = server.client(2);
    let created = home.request_match(MatchMode::Quick, None).await.unwrap();
    assert!(matches!(created, Allocation::Created { .. }));
    let joined = away.request_match(MatchMode::Quick, None).await.unwrap();
    assert_eq!(joined, Allocation::Joined {
        match_id: created.match_id()
    });
    (home, away, created.match_id())
}

// ============================================================================
// Network Error Scenario Tests
// ============================================================================

#[tokio::test]
async fn test_connection_refused() {
    let client = ApiClient::new("http://127.0.0.1:19999".to_string()).with_token("t".to_string());

    let result = client.request_match(MatchMode::Quick, None).await;

    let error_msg = result.unwrap_err().to_string();
    assert!(
        error_msg.contains("Failed to send POST /matchmaking/tickets"),
        "unexpected error: {error_msg}"
    );
}

#[tokio::test]
async fn test_unauthenticated_client_fails_locally() {
    let client = ApiClient::new("http://127.0.0.1:19999".to_string());
    let err = client.cancel_ticket().await.unwrap_err();
    assert!(err.to_string().contains("Not authenticated"));
}

// ============================================================================
// HTTP Flow Tests
// ============================================================================

#[tokio::test]
async fn test_pairing_and_snapshot() {
    let server = TestServer::spawn().await;
    let (home, away, match_id) = paired(&server).await;

    let snapshot = home.get_match(match_id).await.unwrap();
    assert_eq!(snapshot.record.id, match_id);
    assert_eq!(away.moves(match_id).await.unwrap(), Vec::new());
}

#[tokio::test]
async fn test_refusal_carries_error_code() {
    let server = TestServer::spawn().await;
    let (home, _, match_id) = paired(&server).await;

    let err = home.place_card(match_id, 1, 5).await.unwrap_err();
    let failure = err.downcast_ref::<ApiFailure>().unwrap();
    assert_eq!(failure.status, StatusCode::CONFLICT);
    assert_eq!(failure.code, "not_your_turn");
    assert!(!failure.retry);
}

#[tokio::test]
async fn test_friendly_invite_round_trip() {
    let server = TestServer::spawn().await;
    let host = server.client(7);
    let guest = server.client(8);

    let Allocation::Created {
        match_id,
        invite_code: Some(code),
    } = host.request_match(MatchMode::Friendly, None).await.unwrap()
    else {
        panic!("friendly tickets always open a match with a code");
    };

    let joined = guest.join_invite(&code, None).await.unwrap();
    assert_eq!(joined.match_id(), match_id);
}

#[tokio::test]
async fn test_state_fetcher_maps_statuses() {
    let server = TestServer::spawn().await;
    let (home, _, match_id) = paired(&server).await;

    let record = home.fetch(match_id).await.unwrap();
    assert_eq!(record.id, match_id);

    let missing = uuid::Uuid::new_v4();
    assert_eq!(
        home.fetch(missing).await.unwrap_err(),
        MatchError::MatchNotFound(missing)
    );

    let stranger = server.client(99);
    assert_eq!(
        stranger.fetch(match_id).await.unwrap_err(),
        MatchError::NotSeated
    );
}

#[tokio::test]
async fn test_forfeit_then_completed() {
    let server = TestServer::spawn().await;
    let (home, away, match_id) = paired(&server).await;

    let record = away.forfeit(match_id).await.unwrap();
    assert!(record.is_completed());

    assert_eq!(
        home.fetch(match_id).await.unwrap().id,
        match_id,
        "completed matches stay readable"
    );
    let err = home.forfeit(match_id).await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<ApiFailure>().unwrap().status,
        StatusCode::GONE
    );
}

// ============================================================================
// WebSocket Tests
// ============================================================================

async fn next_event<S>(read: &mut S) -> ServerEvent
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = timeout(Duration::from_secs(5), read.next())
            .await
            .expect("timed out waiting for an event")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_websocket_sends_state_then_acks() {
    let server = TestServer::spawn().await;
    let (home, _, match_id) = paired(&server).await;

    let (ws, _) = connect_async(home.websocket_url(match_id).unwrap())
        .await
        .unwrap();
    let (mut write, mut read) = ws.split();

    let ServerEvent::State { record, .. } = next_event(&mut read).await else {
        panic!("first event must be the full state");
    };
    assert_eq!(record.id, match_id);

    let envelope = ClientEnvelope {
        command_id: Some(1),
        command: ClientCommand::Forfeit,
    };
    write
        .send(Message::Text(serde_json::to_string(&envelope).unwrap().into()))
        .await
        .unwrap();

    // Channel broadcasts may arrive before the acknowledgement
    loop {
        match next_event(&mut read).await {
            ServerEvent::Ack {
                command_id,
                version,
            } => {
                assert_eq!(command_id, 1);
                assert!(version > record.version);
                break;
            }
            ServerEvent::Rejected { code, .. } => panic!("forfeit rejected: {code}"),
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_websocket_rejects_garbage_without_closing() {
    let server = TestServer::spawn().await;
    let (home, _, match_id) = paired(&server).await;

    let (ws, _) = connect_async(home.websocket_url(match_id).unwrap())
        .await
        .unwrap();
    let (mut write, mut read) = ws.split();
    next_event(&mut read).await;

    write
        .send(Message::Text("{\"type\":\"kick_the_ref\"}".into()))
        .await
        .unwrap();
    let ServerEvent::Rejected { code, command_id, .. } = next_event(&mut read).await else {
        panic!("expected a rejection");
    };
    assert_eq!(code, "invalid_message");
    assert_eq!(command_id, None);

    let envelope = ClientEnvelope {
        command_id: None,
        command: ClientCommand::RequestState,
    };
    write
        .send(Message::Text(serde_json::to_string(&envelope).unwrap().into()))
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut read).await,
        ServerEvent::State { .. }
    ));
}

#[tokio::test]
async fn test_websocket_refuses_spectators() {
    let server = TestServer::spawn().await;
    let (_, _, match_id) = paired(&server).await;

    let stranger = server.client(42);
    let result = connect_async(stranger.websocket_url(match_id).unwrap()).await;
    assert!(result.is_err());
}
