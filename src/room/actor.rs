//! Runs one [`Room`] as a dedicated task draining a command queue — the
//! "one logical serial executor per Room" the concurrency model calls for.
//! Every mutation goes through this task, so `Room` itself never needs a
//! lock.

use super::state::{Events, Room, RoomId, SubscriberHandle, Verdict};
use crate::address::WalletAddress;
use crate::error::{AdmissionError, MoveError};
use crate::signer::VerdictSigner;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

const CLOCK_TICK: std::time::Duration = std::time::Duration::from_secs(1);

pub struct RoomSnapshot {
    pub id: RoomId,
    pub onchain_game_id: u64,
    pub stake: u64,
    pub time_budget_seconds: u64,
    pub player_count: usize,
    pub started: bool,
    pub ended: bool,
    pub cancelled: bool,
    pub fen: String,
    pub pgn: String,
    pub white_remaining: u64,
    pub black_remaining: u64,
    pub verdict: Option<Verdict>,
}

enum Command {
    Join {
        wallet: WalletAddress,
        subscriber: SubscriberHandle,
        reply: oneshot::Sender<Result<Events, AdmissionError>>,
    },
    ApplyMove {
        wallet: WalletAddress,
        mv: String,
        reply: oneshot::Sender<Result<Events, MoveError>>,
    },
    OfferDraw {
        wallet: WalletAddress,
        reply: oneshot::Sender<Events>,
    },
    AcceptDraw {
        wallet: WalletAddress,
        reply: oneshot::Sender<Events>,
    },
    DeclineDraw {
        wallet: WalletAddress,
        reply: oneshot::Sender<Events>,
    },
    Resign {
        wallet: WalletAddress,
        reply: oneshot::Sender<Result<Events, MoveError>>,
    },
    Chat {
        wallet: WalletAddress,
        text: String,
        sender_label: String,
        reply: oneshot::Sender<Events>,
    },
    Disconnect {
        wallet: WalletAddress,
        reply: oneshot::Sender<Events>,
    },
    Reconnect {
        wallet: WalletAddress,
        subscriber: SubscriberHandle,
        reply: oneshot::Sender<Events>,
    },
    MarkVerified,
    Cancel {
        reason: String,
        reply: oneshot::Sender<Events>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
}

/// Cheap, cloneable front for a room's actor task. All methods send a
/// command and await its reply; the room itself is never touched outside
/// the actor task.
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<Command>,
}

macro_rules! ask {
    ($self:ident, $variant:ident { $($field:ident),* }) => {{
        let (reply, rx) = oneshot::channel();
        let _ = $self.tx.send(Command::$variant { $($field),*, reply }).await;
        rx.await.unwrap_or_default()
    }};
}

impl RoomHandle {
    pub async fn join(&self, wallet: WalletAddress, subscriber: SubscriberHandle) -> Result<Events, AdmissionError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Join { wallet, subscriber, reply }).await;
        rx.await.unwrap_or(Err(AdmissionError::RoomNotFound))
    }

    pub async fn apply_move(&self, wallet: WalletAddress, mv: String) -> Result<Events, MoveError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::ApplyMove { wallet, mv, reply }).await;
        rx.await.unwrap_or(Err(MoveError::GameOver))
    }

    pub async fn offer_draw(&self, wallet: WalletAddress) -> Events {
        ask!(self, OfferDraw { wallet })
    }

    pub async fn accept_draw(&self, wallet: WalletAddress) -> Events {
        ask!(self, AcceptDraw { wallet })
    }

    pub async fn decline_draw(&self, wallet: WalletAddress) -> Events {
        ask!(self, DeclineDraw { wallet })
    }

    pub async fn resign(&self, wallet: WalletAddress) -> Result<Events, MoveError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Resign { wallet, reply }).await;
        rx.await.unwrap_or(Err(MoveError::GameOver))
    }

    pub async fn chat(&self, wallet: WalletAddress, text: String, sender_label: String) -> Events {
        ask!(self, Chat { wallet, text, sender_label })
    }

    pub async fn disconnect(&self, wallet: WalletAddress) -> Events {
        ask!(self, Disconnect { wallet })
    }

    pub async fn reconnect(&self, wallet: WalletAddress, subscriber: SubscriberHandle) -> Events {
        ask!(self, Reconnect { wallet, subscriber })
    }

    pub async fn mark_verified(&self) {
        let _ = self.tx.send(Command::MarkVerified).await;
    }

    pub async fn cancel(&self, reason: String) -> Events {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Cancel { reason, reply }).await;
        rx.await.unwrap_or_default()
    }

    pub async fn snapshot(&self) -> Option<RoomSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot { reply }).await.ok()?;
        rx.await.ok()
    }
}

fn snapshot_of(room: &Room) -> RoomSnapshot {
    let (white_remaining, black_remaining) = room.clock_snapshot();
    RoomSnapshot {
        id: room.id(),
        onchain_game_id: room.onchain_game_id(),
        stake: room.stake(),
        time_budget_seconds: room.time_budget_seconds(),
        player_count: room.player_count(),
        started: room.started(),
        ended: room.ended(),
        cancelled: room.cancelled(),
        fen: room.fen(),
        pgn: room.pgn(),
        white_remaining,
        black_remaining,
        verdict: room.verdict().cloned(),
    }
}

/// Spawns the room's actor task and returns a handle to it. `on_events` is
/// invoked with every batch of outbound events so the gateway can fan them
/// out to the right transport connections; it runs inline on the room's
/// task, so it must not block.
pub fn spawn<F>(
    room: Room,
    signer: Arc<VerdictSigner>,
    chain_id: u64,
    contract: WalletAddress,
    gc_delay: Duration,
    on_events: F,
) -> (RoomHandle, tokio::task::JoinHandle<()>)
where
    F: Fn(Events) + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    let handle = RoomHandle { tx };
    let join_handle = tokio::spawn(run(room, signer, chain_id, contract, gc_delay, rx, on_events));
    (handle, join_handle)
}

fn earliest_deadline(room: &Room, gc_at: Option<Instant>) -> Option<Instant> {
    let mut deadlines = Vec::new();
    if let Some(d) = room.draw_offer_deadline() {
        deadlines.push(d);
    }
    for player in room.players() {
        if let Some(d) = room.disconnect_deadline(player.wallet) {
            deadlines.push(d);
        }
    }
    if let Some(d) = gc_at {
        deadlines.push(d);
    }
    deadlines.into_iter().min()
}

async fn run<F>(
    mut room: Room,
    signer: Arc<VerdictSigner>,
    chain_id: u64,
    contract: WalletAddress,
    gc_delay: Duration,
    mut rx: mpsc::Receiver<Command>,
    on_events: F,
) where
    F: Fn(Events) + Send + 'static,
{
    let mut clock_ticker = tokio::time::interval(CLOCK_TICK);
    clock_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut gc_at: Option<Instant> = None;

    loop {
        if room.ended() && gc_at.is_none() {
            gc_at = Some(Instant::now() + gc_delay);
        }
        if room.cancelled() && gc_at.is_none() {
            gc_at = Some(Instant::now());
        }

        let wake_at = earliest_deadline(&room, gc_at);
        let sleep = async {
            match wake_at {
                Some(instant) => tokio::time::sleep_until(instant.into()).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            maybe_cmd = rx.recv() => {
                match maybe_cmd {
                    Some(cmd) => handle_command(&mut room, &signer, chain_id, contract, cmd, &on_events),
                    None => break,
                }
            }
            _ = clock_ticker.tick(), if room.clock_running() && !room.ended() => {
                let events = room.tick(&signer, chain_id, contract);
                on_events(events);
            }
            _ = sleep, if wake_at.is_some() => {
                if let Some(gc) = gc_at {
                    if Instant::now() >= gc {
                        break;
                    }
                }
                let mut fired = Vec::new();
                if let Some(d) = room.draw_offer_deadline() {
                    if Instant::now() >= d {
                        fired.extend(room.expire_draw_offer());
                    }
                }
                let disconnected_wallets: Vec<WalletAddress> = room
                    .players()
                    .iter()
                    .filter(|p| room.disconnect_deadline(p.wallet).is_some_and(|d| Instant::now() >= d))
                    .map(|p| p.wallet)
                    .collect();
                for wallet in disconnected_wallets {
                    fired.extend(room.forfeit_on_disconnect(wallet, &signer, chain_id, contract));
                }
                on_events(fired);
            }
        }
    }

    tracing::debug!(room_id = %room.id(), "room actor exiting");
}

fn handle_command<F>(
    room: &mut Room,
    signer: &VerdictSigner,
    chain_id: u64,
    contract: WalletAddress,
    cmd: Command,
    on_events: &F,
) where
    F: Fn(Events),
{
    match cmd {
        Command::Join { wallet, subscriber, reply } => {
            let result = room.join(wallet, subscriber);
            if let Ok(events) = &result {
                on_events(events.clone());
            }
            let _ = reply.send(result);
        }
        Command::ApplyMove { wallet, mv, reply } => {
            let result = room.apply_move(wallet, &mv, signer, chain_id, contract);
            if let Ok(events) = &result {
                on_events(events.clone());
            }
            let _ = reply.send(result);
        }
        Command::OfferDraw { wallet, reply } => {
            let events = room.offer_draw(wallet);
            on_events(events.clone());
            let _ = reply.send(events);
        }
        Command::AcceptDraw { wallet, reply } => {
            let events = room.accept_draw(wallet, signer, chain_id, contract);
            on_events(events.clone());
            let _ = reply.send(events);
        }
        Command::DeclineDraw { wallet, reply } => {
            let events = room.decline_draw(wallet);
            on_events(events.clone());
            let _ = reply.send(events);
        }
        Command::Resign { wallet, reply } => {
            let result = room.resign(wallet, signer, chain_id, contract);
            if let Ok(events) = &result {
                on_events(events.clone());
            }
            let _ = reply.send(result);
        }
        Command::Chat { wallet, text, sender_label, reply } => {
            let events = room.chat(wallet, &text, &sender_label);
            on_events(events.clone());
            let _ = reply.send(events);
        }
        Command::Disconnect { wallet, reply } => {
            let events = room.disconnect(wallet);
            on_events(events.clone());
            let _ = reply.send(events);
        }
        Command::Reconnect { wallet, subscriber, reply } => {
            let events = room.reconnect(wallet, subscriber);
            on_events(events.clone());
            let _ = reply.send(events);
        }
        Command::MarkVerified => {
            room.mark_verified();
        }
        Command::Cancel { reason, reply } => {
            let events = room.cancel(&reason);
            on_events(events.clone());
            let _ = reply.send(events);
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(snapshot_of(room));
        }
    }
}
