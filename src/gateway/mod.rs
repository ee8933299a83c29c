//! Player-facing WebSocket listener. The only component that touches the
//! transport: it authenticates nothing by itself (wallets are taken at face
//! value on `createRoom`/`joinRoom`, and re-proven by signature on
//! `reconnect`), rate-limits, dispatches to [`crate::coordinator::Coordinator`]
//! and [`crate::username::UsernameRegistry`], and fans resultant events out to
//! whichever subscriber handles they're addressed to.

use crate::address::WalletAddress;
use crate::config::RateLimitConfig;
use crate::coordinator::Coordinator;
use crate::network::rate_limiter::{Bucket, RateLimiter};
use crate::protocol::{ClientRequest, RoomSummary, ServerEvent};
use crate::room::{Events, RoomId, SubscriberHandle};
use crate::username::UsernameRegistry;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

pub struct Gateway {
    coordinator: Arc<Coordinator>,
    usernames: Arc<UsernameRegistry>,
    connections: Arc<DashMap<SubscriberHandle, mpsc::UnboundedSender<ServerEvent>>>,
    next_subscriber: AtomicU64,
    rate_limiter: Mutex<RateLimiter>,
    heartbeat_interval: Duration,
}

impl Gateway {
    pub fn new(
        coordinator: Arc<Coordinator>,
        usernames: Arc<UsernameRegistry>,
        heartbeat_interval: Duration,
        rate_limit_config: &RateLimitConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            usernames,
            connections: Arc::new(DashMap::new()),
            next_subscriber: AtomicU64::new(1),
            rate_limiter: Mutex::new(RateLimiter::new(rate_limit_config)),
            heartbeat_interval,
        })
    }

    /// The closure to hand to `Coordinator::create_room`/`join_room` so a
    /// room's own background-timer events (clock ticks, forfeits, offer
    /// expiry) reach the same connections a direct dispatch would.
    pub fn on_events(self: &Arc<Self>) -> impl Fn(Events) + Send + Sync + 'static {
        let this = self.clone();
        move |events| this.route(events)
    }

    fn route(&self, events: Events) {
        for (subscriber, event) in events {
            if let Some(tx) = self.connections.get(&subscriber) {
                let _ = tx.send(event);
            }
        }
    }

    fn next_subscriber(&self) -> SubscriberHandle {
        self.next_subscriber.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn serve(self: Arc<Self>, addr: &str, shutdown: CancellationToken) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "gateway listening");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let gateway = self.clone();
                            let conn_shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) = gateway.handle_connection(stream, conn_shutdown).await {
                                    tracing::debug!(%peer, error = %e, "gateway connection ended with error");
                                }
                            });
                        }
                        Err(e) => tracing::error!(error = %e, "gateway accept error"),
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("gateway shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: tokio::net::TcpStream,
        shutdown: CancellationToken,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let subscriber = self.next_subscriber();
        let (notif_tx, mut notif_rx) = mpsc::unbounded_channel::<ServerEvent>();
        self.connections.insert(subscriber, notif_tx);
        let mut bound_wallet: Option<WalletAddress> = None;

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);

        let result = loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ClientRequest>(&text) {
                                Ok(request) => {
                                    let events = self.clone().dispatch(subscriber, &mut bound_wallet, request).await;
                                    self.route(events);
                                }
                                Err(e) => {
                                    self.route(vec![(subscriber, ServerEvent::Error { message: format!("malformed request: {e}") })]);
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break Ok(()),
                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break Ok(());
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Err(e),
                    }
                }
                Some(event) = notif_rx.recv() => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break Ok(());
                    }
                }
                _ = heartbeat.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break Ok(());
                    }
                }
                _ = shutdown.cancelled() => break Ok(()),
            }
        };

        self.connections.remove(&subscriber);
        if let Some(wallet) = bound_wallet {
            self.coordinator.disconnect(wallet).await;
        }
        result
    }

    /// Rate-limits, validates, and executes one request, returning the
    /// events to fan out (always including an ack or error addressed back to
    /// `subscriber`).
    async fn dispatch(
        self: Arc<Self>,
        subscriber: SubscriberHandle,
        bound_wallet: &mut Option<WalletAddress>,
        request: ClientRequest,
    ) -> Events {
        let rate_subject = bound_wallet.map(|w| w.lower_hex()).unwrap_or_else(|| format!("conn:{subscriber}"));
        if !self.rate_limiter.lock().await.check(&rate_subject, bucket_for(&request)) {
            return vec![(subscriber, ServerEvent::Error { message: "TooManyRequests".to_string() })];
        }

        match request {
            ClientRequest::CreateRoom { game_id, stake, wallet_address, time_limit } => {
                let Ok(wallet) = WalletAddress::parse(&wallet_address) else {
                    return self.err(subscriber, "invalid wallet address");
                };
                match self.coordinator.create_room(wallet, game_id, stake, time_limit, subscriber, self.on_events()).await {
                    Ok(room_id) => {
                        *bound_wallet = Some(wallet);
                        match self.coordinator.room_info(room_id).await {
                            Some(s) => vec![(subscriber, ServerEvent::RoomInfo {
                                room_id: s.id.to_string(),
                                game_id: s.onchain_game_id,
                                stake: s.stake,
                                player_count: s.player_count,
                                started: s.started,
                                ended: s.ended,
                                fen: s.fen,
                            })],
                            None => Vec::new(),
                        }
                    }
                    Err(e) => self.err(subscriber, &e.to_string()),
                }
            }
            ClientRequest::JoinRoom { room_id, game_id: _, wallet_address } => {
                let Ok(wallet) = WalletAddress::parse(&wallet_address) else {
                    return self.err(subscriber, "invalid wallet address");
                };
                let Some(room_id) = RoomId::parse(&room_id) else {
                    return self.err(subscriber, "RoomNotFound");
                };
                match self.coordinator.join_room(room_id, wallet, subscriber).await {
                    Ok(events) => {
                        *bound_wallet = Some(wallet);
                        events
                    }
                    Err(e) => self.err(subscriber, &e.to_string()),
                }
            }
            ClientRequest::MakeMove { r#move } => {
                let Some(wallet) = *bound_wallet else {
                    return self.move_rejected(subscriber, "NotParticipant");
                };
                match self.coordinator.apply_move(wallet, r#move).await {
                    Ok(events) => events,
                    Err(e) => self.move_rejected(subscriber, &e.to_string()),
                }
            }
            ClientRequest::OfferDraw => {
                let Some(wallet) = *bound_wallet else { return Vec::new() };
                self.coordinator.offer_draw(wallet).await
            }
            ClientRequest::AcceptDraw => {
                let Some(wallet) = *bound_wallet else { return Vec::new() };
                self.coordinator.accept_draw(wallet).await
            }
            ClientRequest::DeclineDraw => {
                let Some(wallet) = *bound_wallet else { return Vec::new() };
                self.coordinator.decline_draw(wallet).await
            }
            ClientRequest::Resign => {
                let Some(wallet) = *bound_wallet else {
                    return self.move_rejected(subscriber, "NotParticipant");
                };
                match self.coordinator.resign(wallet).await {
                    Ok(events) => events,
                    Err(e) => self.move_rejected(subscriber, &e.to_string()),
                }
            }
            ClientRequest::ChatMessage { message } => {
                let Some(wallet) = *bound_wallet else { return Vec::new() };
                let sender_label = self.usernames.lookup(wallet).await.unwrap_or_else(|| wallet.checksummed_hex());
                self.coordinator.chat(wallet, message, sender_label).await
            }
            ClientRequest::Reconnect { wallet_address, signature } => {
                let Ok(wallet) = WalletAddress::parse(&wallet_address) else {
                    return self.err(subscriber, "invalid wallet address");
                };
                match self.coordinator.reconnect(wallet, &signature, subscriber).await {
                    Ok(events) => {
                        *bound_wallet = Some(wallet);
                        events
                    }
                    Err(e) => self.err(subscriber, &e.to_string()),
                }
            }
            ClientRequest::ListRooms => {
                let mut rooms = Vec::new();
                for room_id in self.coordinator.list_open_rooms() {
                    if let Some(snapshot) = self.coordinator.room_info(room_id).await {
                        rooms.push(RoomSummary {
                            room_id: snapshot.id.to_string(),
                            game_id: snapshot.onchain_game_id,
                            stake: snapshot.stake,
                            time_budget_seconds: snapshot.time_budget_seconds,
                        });
                    }
                }
                vec![(subscriber, ServerEvent::RoomList { rooms })]
            }
            ClientRequest::FindRoomByGameId { game_id } => {
                match self.coordinator.find_room_by_game_id(game_id) {
                    Some(room_id) => vec![(subscriber, ServerEvent::RoomInfo {
                        room_id: room_id.to_string(),
                        game_id,
                        stake: 0,
                        player_count: 1,
                        started: false,
                        ended: false,
                        fen: String::new(),
                    })],
                    None => self.err(subscriber, "RoomNotFound"),
                }
            }
            ClientRequest::GetRoomInfo { room_id } => {
                let Some(room_id) = RoomId::parse(&room_id) else {
                    return self.err(subscriber, "RoomNotFound");
                };
                match self.coordinator.room_info(room_id).await {
                    Some(snapshot) => vec![(subscriber, ServerEvent::RoomInfo {
                        room_id: snapshot.id.to_string(),
                        game_id: snapshot.onchain_game_id,
                        stake: snapshot.stake,
                        player_count: snapshot.player_count,
                        started: snapshot.started,
                        ended: snapshot.ended,
                        fen: snapshot.fen,
                    })],
                    None => self.err(subscriber, "RoomNotFound"),
                }
            }
            ClientRequest::CheckUsername { wallet_address } => {
                let Ok(wallet) = WalletAddress::parse(&wallet_address) else {
                    return self.err(subscriber, "invalid wallet address");
                };
                let handle = self.usernames.lookup(wallet).await;
                vec![(subscriber, ServerEvent::UsernameStatus {
                    wallet_address,
                    taken: handle.is_some(),
                    handle,
                })]
            }
            ClientRequest::SetUsername { wallet_address, username } => {
                let Ok(wallet) = WalletAddress::parse(&wallet_address) else {
                    return self.err(subscriber, "invalid wallet address");
                };
                match self.usernames.set(wallet, &username).await {
                    Ok(()) => vec![(subscriber, ServerEvent::UsernameSet { handle: username })],
                    Err(e) => self.err(subscriber, &e.to_string()),
                }
            }
            ClientRequest::Ping => vec![(subscriber, ServerEvent::Pong)],
        }
    }

    fn err(&self, subscriber: SubscriberHandle, message: &str) -> Events {
        vec![(subscriber, ServerEvent::Error { message: message.to_string() })]
    }

    /// Move-application failures get their own event distinct from the
    /// generic `Error`, so a client can tell "your move was illegal" apart
    /// from "something about the connection went wrong".
    fn move_rejected(&self, subscriber: SubscriberHandle, reason: &str) -> Events {
        vec![(subscriber, ServerEvent::MoveRejected { reason: reason.to_string() })]
    }
}

fn bucket_for(request: &ClientRequest) -> Bucket {
    match request {
        ClientRequest::MakeMove { .. } => Bucket::Moves,
        ClientRequest::ChatMessage { .. } => Bucket::Chat,
        ClientRequest::SetUsername { .. } => Bucket::SetUsername,
        _ => Bucket::General,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::EscrowClient;
    use crate::signer::VerdictSigner;
    use std::time::Duration;

    fn wallet(byte: u8) -> WalletAddress {
        WalletAddress::from_bytes([byte; 20])
    }

    async fn test_gateway() -> Arc<Gateway> {
        let signer = Arc::new(VerdictSigner::ephemeral());
        let escrow = Arc::new(EscrowClient::new(
            vec!["http://127.0.0.1:1".to_string()],
            wallet(0xee),
            15,
            Duration::from_secs(3),
        ));
        let room_config = crate::config::RoomConfig {
            default_time_budget_seconds: 300,
            draw_offer_expiry_seconds: 30,
            disconnect_grace_seconds: 60,
            post_game_gc_seconds: 30,
        };
        let coordinator = Coordinator::new(signer, escrow, 1337, wallet(0xee), &room_config);
        let dir = tempfile::tempdir().unwrap();
        let usernames = Arc::new(UsernameRegistry::load_or_create(dir.path().join("usernames.json")).await.unwrap());
        let rate_limit_config = crate::config::RateLimitConfig { enabled: true, overrides: Vec::new() };
        Gateway::new(coordinator, usernames, Duration::from_secs(20), &rate_limit_config)
    }

    fn find_room_info(events: &Events, subscriber: SubscriberHandle) -> Option<(String, bool)> {
        events.iter().find_map(|(s, e)| {
            if *s != subscriber {
                return None;
            }
            match e {
                ServerEvent::RoomInfo { room_id, started, .. } => Some((room_id.clone(), *started)),
                _ => None,
            }
        })
    }

    #[tokio::test]
    async fn create_room_acks_with_room_info_and_binds_the_wallet() {
        let gateway = test_gateway().await;
        let mut bound = None;
        let events = gateway
            .clone()
            .dispatch(
                1,
                &mut bound,
                ClientRequest::CreateRoom {
                    game_id: 10,
                    stake: 1000,
                    wallet_address: wallet(1).lower_hex(),
                    time_limit: None,
                },
            )
            .await;
        assert_eq!(bound, Some(wallet(1)));
        let (room_id, started) = find_room_info(&events, 1).expect("expected a RoomInfo ack");
        assert!(!started);
        assert!(room_id.starts_with("room-"));
    }

    #[tokio::test]
    async fn joining_a_room_that_does_not_exist_errors() {
        let gateway = test_gateway().await;
        let mut bound = None;
        let events = gateway
            .clone()
            .dispatch(
                2,
                &mut bound,
                ClientRequest::JoinRoom {
                    room_id: "room-deadbeef".to_string(),
                    game_id: 10,
                    wallet_address: wallet(2).lower_hex(),
                },
            )
            .await;
        assert!(bound.is_none());
        assert!(matches!(events.as_slice(), [(2, ServerEvent::Error { .. })]));
    }

    #[tokio::test]
    async fn second_player_joining_marks_the_room_started_for_both_sessions() {
        let gateway = test_gateway().await;
        let mut creator_bound = None;
        let events = gateway
            .clone()
            .dispatch(
                1,
                &mut creator_bound,
                ClientRequest::CreateRoom {
                    game_id: 10,
                    stake: 1000,
                    wallet_address: wallet(1).lower_hex(),
                    time_limit: None,
                },
            )
            .await;
        let (room_id, _) = find_room_info(&events, 1).unwrap();

        let mut joiner_bound = None;
        let events = gateway
            .clone()
            .dispatch(
                2,
                &mut joiner_bound,
                ClientRequest::JoinRoom {
                    room_id,
                    game_id: 10,
                    wallet_address: wallet(2).lower_hex(),
                },
            )
            .await;
        assert_eq!(joiner_bound, Some(wallet(2)));
        assert!(events.iter().any(|(_, e)| matches!(e, ServerEvent::StartGame { .. })));
    }

    #[tokio::test]
    async fn make_move_without_a_bound_wallet_is_rejected() {
        let gateway = test_gateway().await;
        let mut bound = None;
        let events = gateway
            .clone()
            .dispatch(1, &mut bound, ClientRequest::MakeMove { r#move: "e2e4".to_string() })
            .await;
        assert!(matches!(events.as_slice(), [(1, ServerEvent::MoveRejected { .. })]));
    }

    #[tokio::test]
    async fn set_and_check_username_round_trip() {
        let gateway = test_gateway().await;
        let mut bound = Some(wallet(3));
        let events = gateway
            .clone()
            .dispatch(
                1,
                &mut bound,
                ClientRequest::SetUsername {
                    wallet_address: wallet(3).lower_hex(),
                    username: "Rook_Lift".to_string(),
                },
            )
            .await;
        assert!(matches!(events.as_slice(), [(1, ServerEvent::UsernameSet { handle }) ] if handle == "Rook_Lift"));

        let events = gateway
            .clone()
            .dispatch(
                1,
                &mut bound,
                ClientRequest::CheckUsername { wallet_address: wallet(3).lower_hex() },
            )
            .await;
        assert!(matches!(
            events.as_slice(),
            [(1, ServerEvent::UsernameStatus { taken: true, handle: Some(h), .. })] if h == "Rook_Lift"
        ));
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let gateway = test_gateway().await;
        let mut bound = None;
        let events = gateway.clone().dispatch(1, &mut bound, ClientRequest::Ping).await;
        assert!(matches!(events.as_slice(), [(1, ServerEvent::Pong)]));
    }
}
