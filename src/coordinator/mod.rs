//! Registry of rooms and wallet sessions. This is the one place that knows
//! about every room in the process; it enforces the single-wallet rule,
//! routes reconnects, and owns the background escrow-verification tasks
//! that can cancel a room after the fact.

use crate::address::WalletAddress;
use crate::config::RoomConfig;
use crate::error::{AdmissionError, ReconnectError};
use crate::escrow::EscrowClient;
use crate::reconnect;
use crate::room::{self, Events, Room, RoomHandle, RoomId, RoomSnapshot, SubscriberHandle};
use crate::signer::VerdictSigner;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct RoomEntry {
    handle: RoomHandle,
    onchain_game_id: u64,
    stake: u64,
    started: Arc<AtomicBool>,
}

pub struct Coordinator {
    rooms: DashMap<RoomId, RoomEntry>,
    sessions: DashMap<WalletAddress, RoomId>,
    next_room_id: AtomicU64,
    signer: Arc<VerdictSigner>,
    escrow: Arc<EscrowClient>,
    chain_id: u64,
    contract: WalletAddress,
    default_time_budget_seconds: u64,
    draw_offer_ttl: Duration,
    disconnect_forfeit_ttl: Duration,
    room_gc_delay: Duration,
}

impl Coordinator {
    pub fn new(
        signer: Arc<VerdictSigner>,
        escrow: Arc<EscrowClient>,
        chain_id: u64,
        contract: WalletAddress,
        room_config: &RoomConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            sessions: DashMap::new(),
            next_room_id: AtomicU64::new(1),
            signer,
            escrow,
            chain_id,
            contract,
            default_time_budget_seconds: room_config.default_time_budget_seconds,
            draw_offer_ttl: Duration::from_secs(room_config.draw_offer_expiry_seconds),
            disconnect_forfeit_ttl: Duration::from_secs(room_config.disconnect_grace_seconds),
            room_gc_delay: Duration::from_secs(room_config.post_game_gc_seconds),
        })
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn wallet_in_live_room(&self, wallet: WalletAddress) -> bool {
        self.sessions
            .get(&wallet)
            .is_some_and(|entry| self.rooms.contains_key(entry.value()))
    }

    /// Creates a room, admits the creator as white, and kicks off background
    /// stake verification. `on_events` fans out whatever the room later
    /// produces to the gateway's live connections.
    pub async fn create_room(
        self: &Arc<Self>,
        creator: WalletAddress,
        onchain_game_id: u64,
        stake: u64,
        time_limit: Option<u64>,
        subscriber: SubscriberHandle,
        on_events: impl Fn(Events) + Send + Sync + 'static,
    ) -> Result<RoomId, AdmissionError> {
        if self.wallet_in_live_room(creator) {
            return Err(AdmissionError::AlreadyInGame);
        }

        let id = RoomId::new(self.next_room_id.fetch_add(1, Ordering::Relaxed));
        let time_budget = time_limit.unwrap_or(self.default_time_budget_seconds);
        let room = Room::new(
            id,
            onchain_game_id,
            stake,
            time_budget,
            creator,
            subscriber,
            self.draw_offer_ttl,
            self.disconnect_forfeit_ttl,
        );

        let started = Arc::new(AtomicBool::new(false));
        let (handle, join_handle) = room::spawn(
            room,
            self.signer.clone(),
            self.chain_id,
            self.contract,
            self.room_gc_delay,
            on_events,
        );

        self.rooms.insert(
            id,
            RoomEntry {
                handle: handle.clone(),
                onchain_game_id,
                stake,
                started,
            },
        );
        self.sessions.insert(creator, id);

        self.spawn_cleanup(id, join_handle);
        self.spawn_verification(id, handle, creator, stake);

        Ok(id)
    }

    /// Admits a second player. Rejects `RoomNotFound` / `AlreadyInGame`
    /// before ever touching the room's actor; the room itself still checks
    /// `SelfPlay` / `AlreadyStarted` / `RoomFull`.
    pub async fn join_room(
        self: &Arc<Self>,
        room_id: RoomId,
        wallet: WalletAddress,
        subscriber: SubscriberHandle,
    ) -> Result<Events, AdmissionError> {
        if self.wallet_in_live_room(wallet) {
            return Err(AdmissionError::AlreadyInGame);
        }
        let entry = self.rooms.get(&room_id).ok_or(AdmissionError::RoomNotFound)?;
        let handle = entry.handle.clone();
        let started_flag = entry.started.clone();
        let stake = entry.stake;
        drop(entry);

        let events = handle.join(wallet, subscriber).await?;
        started_flag.store(true, Ordering::Relaxed);
        self.sessions.insert(wallet, room_id);
        self.spawn_verification(room_id, handle, wallet, stake);
        Ok(events)
    }

    /// The one open (not started, fewer than two players) room matching an
    /// on-chain game id, if any.
    pub fn find_room_by_game_id(&self, onchain_game_id: u64) -> Option<RoomId> {
        self.rooms
            .iter()
            .find(|entry| {
                entry.value().onchain_game_id == onchain_game_id
                    && !entry.value().started.load(Ordering::Relaxed)
            })
            .map(|entry| *entry.key())
    }

    pub fn list_open_rooms(&self) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|entry| !entry.value().started.load(Ordering::Relaxed))
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn session_room(&self, wallet: WalletAddress) -> Option<RoomId> {
        self.sessions.get(&wallet).map(|entry| *entry)
    }

    fn room_handle(&self, room_id: RoomId) -> Option<RoomHandle> {
        self.rooms.get(&room_id).map(|entry| entry.handle.clone())
    }

    pub async fn room_info(&self, room_id: RoomId) -> Option<RoomSnapshot> {
        self.room_handle(room_id)?.snapshot().await
    }

    pub async fn apply_move(&self, wallet: WalletAddress, mv: String) -> Result<Events, crate::error::MoveError> {
        let room_id = self.session_room(wallet).ok_or(crate::error::MoveError::NotParticipant)?;
        let handle = self
            .room_handle(room_id)
            .ok_or(crate::error::MoveError::GameOver)?;
        handle.apply_move(wallet, mv).await
    }

    pub async fn offer_draw(&self, wallet: WalletAddress) -> Events {
        let Some(handle) = self.session_room(wallet).and_then(|id| self.room_handle(id)) else {
            return Vec::new();
        };
        handle.offer_draw(wallet).await
    }

    pub async fn accept_draw(&self, wallet: WalletAddress) -> Events {
        let Some(handle) = self.session_room(wallet).and_then(|id| self.room_handle(id)) else {
            return Vec::new();
        };
        handle.accept_draw(wallet).await
    }

    pub async fn decline_draw(&self, wallet: WalletAddress) -> Events {
        let Some(handle) = self.session_room(wallet).and_then(|id| self.room_handle(id)) else {
            return Vec::new();
        };
        handle.decline_draw(wallet).await
    }

    pub async fn resign(&self, wallet: WalletAddress) -> Result<Events, crate::error::MoveError> {
        let room_id = self.session_room(wallet).ok_or(crate::error::MoveError::NotParticipant)?;
        let handle = self
            .room_handle(room_id)
            .ok_or(crate::error::MoveError::GameOver)?;
        handle.resign(wallet).await
    }

    pub async fn chat(&self, wallet: WalletAddress, text: String, sender_label: String) -> Events {
        let Some(room_id) = self.session_room(wallet) else {
            return Vec::new();
        };
        let Some(handle) = self.room_handle(room_id) else {
            return Vec::new();
        };
        handle.chat(wallet, text, sender_label).await
    }

    pub async fn disconnect(&self, wallet: WalletAddress) -> Events {
        let Some(room_id) = self.session_room(wallet) else {
            return Vec::new();
        };
        let Some(handle) = self.room_handle(room_id) else {
            return Vec::new();
        };
        handle.disconnect(wallet).await
    }

    /// Authenticates and processes a reconnect: the signature must recover
    /// to `wallet` or the session stays disconnected.
    pub async fn reconnect(
        &self,
        wallet: WalletAddress,
        signature_hex: &str,
        subscriber: SubscriberHandle,
    ) -> Result<Events, ReconnectError> {
        let room_id = self.session_room(wallet).ok_or(ReconnectError::NoActiveSession)?;
        let handle = self.room_handle(room_id).ok_or(ReconnectError::RoomNoLongerExists)?;
        reconnect::verify(wallet, signature_hex)?;
        Ok(handle.reconnect(wallet, subscriber).await)
    }

    fn spawn_cleanup(self: &Arc<Self>, room_id: RoomId, join_handle: tokio::task::JoinHandle<()>) {
        let this = self.clone();
        tokio::spawn(async move {
            let _ = join_handle.await;
            this.rooms.remove(&room_id);
            this.sessions.retain(|_, bound_room| *bound_room != room_id);
        });
    }

    fn spawn_verification(self: &Arc<Self>, room_id: RoomId, handle: RoomHandle, wallet: WalletAddress, stake: u64) {
        let escrow = self.escrow.clone();
        let onchain_game_id = self
            .rooms
            .get(&room_id)
            .map(|e| e.onchain_game_id)
            .unwrap_or_default();
        tokio::spawn(async move {
            match escrow.verify(onchain_game_id, wallet, stake as u128).await {
                Ok(()) => handle.mark_verified().await,
                Err(e) => {
                    tracing::warn!(room_id = %room_id, error = %e, "escrow verification failed, cancelling room");
                    handle.cancel("stake verification failed".to_string()).await;
                }
            }
        });
    }
}
