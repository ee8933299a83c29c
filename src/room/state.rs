//! The `Room` state machine itself: pure, synchronous, single-threaded.
//! No locking and no awaiting — every method here runs to completion before
//! returning, which is what lets [`super::actor::RoomActor`] serialize all
//! access to one `Room` just by running it on one task.

use crate::address::WalletAddress;
use crate::chess::{ChessEngine, GameTermination, MoveRejection};
use crate::error::{AdmissionError, MoveError};
use crate::protocol::{ChatEntry, Color, ServerEvent};
use crate::signer::{Signature65, VerdictSigner};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub type SubscriberHandle = u64;
pub type Events = Vec<(SubscriberHandle, ServerEvent)>;

const CHAT_RING_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(u64);

impl RoomId {
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    /// Parses the `room-xxxxxxxx` form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.strip_prefix("room-")?;
        u64::from_str_radix(hex, 16).ok().map(Self)
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "room-{:08x}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Player {
    pub wallet: WalletAddress,
    pub color: Color,
    pub subscriber: SubscriberHandle,
}

#[derive(Debug, Clone, Copy)]
struct DrawOffer {
    offerer: WalletAddress,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    White,
    Black,
    Draw,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::White => "white",
            Outcome::Black => "black",
            Outcome::Draw => "draw",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub winner: Outcome,
    pub reason: &'static str,
    pub signature_white: Option<Signature65>,
    pub signature_black: Option<Signature65>,
}

pub struct Room {
    id: RoomId,
    onchain_game_id: u64,
    stake: u64,
    time_budget_seconds: u64,
    players: Vec<Player>,
    engine: ChessEngine,
    white_remaining: u64,
    black_remaining: u64,
    clock_running: bool,
    chat_ring: VecDeque<ChatEntry>,
    draw_offer: Option<DrawOffer>,
    verified: bool,
    started: bool,
    ended: bool,
    cancelled: bool,
    verdict: Option<Verdict>,
    disconnect_deadlines: Vec<(WalletAddress, Instant)>,
    draw_offer_ttl: Duration,
    disconnect_forfeit_ttl: Duration,
}

impl Room {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: RoomId,
        onchain_game_id: u64,
        stake: u64,
        time_budget_seconds: u64,
        creator: WalletAddress,
        creator_subscriber: SubscriberHandle,
        draw_offer_ttl: Duration,
        disconnect_forfeit_ttl: Duration,
    ) -> Self {
        Self {
            id,
            onchain_game_id,
            stake,
            time_budget_seconds,
            players: vec![Player {
                wallet: creator,
                color: Color::White,
                subscriber: creator_subscriber,
            }],
            engine: ChessEngine::new(),
            white_remaining: time_budget_seconds,
            black_remaining: time_budget_seconds,
            clock_running: false,
            chat_ring: VecDeque::new(),
            draw_offer: None,
            verified: false,
            started: false,
            ended: false,
            cancelled: false,
            verdict: None,
            disconnect_deadlines: Vec::new(),
            draw_offer_ttl,
            disconnect_forfeit_ttl,
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn onchain_game_id(&self) -> u64 {
        self.onchain_game_id
    }

    pub fn stake(&self) -> u64 {
        self.stake
    }

    pub fn time_budget_seconds(&self) -> u64 {
        self.time_budget_seconds
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn has_wallet(&self, wallet: WalletAddress) -> bool {
        self.players.iter().any(|p| p.wallet == wallet)
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    pub fn fen(&self) -> String {
        self.engine.fen()
    }

    pub fn pgn(&self) -> String {
        self.engine.pgn()
    }

    pub fn clock_snapshot(&self) -> (u64, u64) {
        (self.white_remaining, self.black_remaining)
    }

    pub fn clock_running(&self) -> bool {
        self.clock_running
    }

    /// Deadline of the currently pending draw offer, if any, for the actor
    /// to arm/disarm its expiry timer against.
    pub fn draw_offer_deadline(&self) -> Option<Instant> {
        self.draw_offer.map(|o| o.expires_at)
    }

    pub fn disconnect_deadline(&self, wallet: WalletAddress) -> Option<Instant> {
        self.disconnect_deadlines
            .iter()
            .find(|(w, _)| *w == wallet)
            .map(|(_, deadline)| *deadline)
    }

    fn player(&self, wallet: WalletAddress) -> Option<&Player> {
        self.players.iter().find(|p| p.wallet == wallet)
    }

    fn opponent(&self, wallet: WalletAddress) -> Option<&Player> {
        self.players.iter().find(|p| p.wallet != wallet)
    }

    fn to_all(&self, event: ServerEvent) -> Events {
        self.players.iter().map(|p| (p.subscriber, event.clone())).collect()
    }

    fn to_wallet(&self, wallet: WalletAddress, event: ServerEvent) -> Events {
        self.player(wallet)
            .map(|p| vec![(p.subscriber, event)])
            .unwrap_or_default()
    }

    fn to_opponent(&self, wallet: WalletAddress, event: ServerEvent) -> Events {
        self.opponent(wallet)
            .map(|p| vec![(p.subscriber, event)])
            .unwrap_or_default()
    }

    /// Mark the room's stake as confirmed by the escrow verifier. Called
    /// asynchronously; does not itself emit events.
    pub fn mark_verified(&mut self) {
        self.verified = true;
    }

    /// Admit a second player. `SelfPlay` and `AlreadyStarted`/`RoomFull` are
    /// the only failure modes the room itself can detect; `AlreadyInGame`
    /// and `RoomNotFound` are Coordinator-level checks made before this is
    /// called.
    pub fn join(
        &mut self,
        wallet: WalletAddress,
        subscriber: SubscriberHandle,
    ) -> Result<Events, AdmissionError> {
        if self.started {
            return Err(AdmissionError::AlreadyStarted);
        }
        if self.players.len() >= 2 {
            return Err(AdmissionError::RoomFull);
        }
        if self.players[0].wallet == wallet {
            return Err(AdmissionError::SelfPlay);
        }

        self.players.push(Player {
            wallet,
            color: Color::Black,
            subscriber,
        });
        self.started = true;

        let white = self.players[0];
        let black = self.players[1];
        let timers = crate::protocol::ClockSnapshot {
            white: self.white_remaining,
            black: self.black_remaining,
        };
        let chat_history: Vec<ChatEntry> = self.chat_ring.iter().cloned().collect();

        let mut events = Vec::new();
        events.push((
            white.subscriber,
            ServerEvent::StartGame {
                player_number: 1,
                color: Color::White,
                opponent: Some(black.wallet.checksummed_hex()),
                timers,
                game_id: self.onchain_game_id,
                room_id: self.id.to_string(),
                chat_history: chat_history.clone(),
            },
        ));
        events.push((
            black.subscriber,
            ServerEvent::StartGame {
                player_number: 2,
                color: Color::Black,
                opponent: Some(white.wallet.checksummed_hex()),
                timers,
                game_id: self.onchain_game_id,
                room_id: self.id.to_string(),
                chat_history,
            },
        ));
        Ok(events)
    }

    pub fn apply_move(
        &mut self,
        wallet: WalletAddress,
        mv: &str,
        signer: &VerdictSigner,
        chain_id: u64,
        contract: WalletAddress,
    ) -> Result<Events, MoveError> {
        if self.ended {
            return Err(MoveError::GameOver);
        }
        let player = self.player(wallet).copied().ok_or(MoveError::NotParticipant)?;
        if self.engine.side_to_move() != player.color.into() {
            return Err(MoveError::NotYourTurn);
        }

        let outcome = self.engine.try_apply(mv).map_err(|e| match e {
            MoveRejection::InvalidFormat => MoveError::InvalidMoveFormat,
            MoveRejection::Illegal => MoveError::IllegalMove,
        })?;

        if !self.clock_running {
            self.clock_running = true;
        }
        self.draw_offer = None;

        let player_num = if player.color == Color::White { 1 } else { 2 };
        let mut events = self.to_all(ServerEvent::MoveAccepted {
            r#move: outcome.san.clone(),
            fen: outcome.fen,
            pgn: self.engine.pgn(),
            turn: outcome.side_to_move_after.into(),
            player_num,
        });

        if let Some(termination) = self.engine.terminal_state() {
            let winner = match termination {
                GameTermination::Checkmate => {
                    if player.color == Color::White {
                        Outcome::White
                    } else {
                        Outcome::Black
                    }
                }
                _ => Outcome::Draw,
            };
            events.extend(self.end(
                winner,
                termination.reason_str(),
                Some(signer),
                Some((chain_id, contract)),
            ));
        }

        Ok(events)
    }

    /// No-op (per the protocol's deliberate silence on invalid transitions,
    /// to avoid letting probing clients learn room state) unless a new
    /// offer can actually be recorded.
    pub fn offer_draw(&mut self, wallet: WalletAddress) -> Events {
        if self.ended || self.draw_offer.is_some() || !self.has_wallet(wallet) {
            return Vec::new();
        }
        self.draw_offer = Some(DrawOffer {
            offerer: wallet,
            expires_at: Instant::now() + self.draw_offer_ttl,
        });
        self.to_opponent(wallet, ServerEvent::DrawOffered)
    }

    pub fn accept_draw(
        &mut self,
        wallet: WalletAddress,
        signer: &VerdictSigner,
        chain_id: u64,
        contract: WalletAddress,
    ) -> Events {
        match self.draw_offer {
            Some(offer) if offer.offerer != wallet => {}
            _ => return Vec::new(),
        }
        self.draw_offer = None;
        self.end(Outcome::Draw, "mutual agreement", Some(signer), Some((chain_id, contract)))
    }

    pub fn decline_draw(&mut self, wallet: WalletAddress) -> Events {
        match self.draw_offer {
            Some(offer) if offer.offerer != wallet => {}
            _ => return Vec::new(),
        }
        self.draw_offer = None;
        self.to_opponent(wallet, ServerEvent::DrawDeclined)
    }

    /// Draw-offer expiry, fired by the actor's timer. A no-op if the offer
    /// was already resolved by the time the timer fires.
    pub fn expire_draw_offer(&mut self) -> Events {
        let Some(offer) = self.draw_offer else {
            return Vec::new();
        };
        self.draw_offer = None;
        self.to_wallet(offer.offerer, ServerEvent::DrawDeclined)
    }

    pub fn resign(
        &mut self,
        wallet: WalletAddress,
        signer: &VerdictSigner,
        chain_id: u64,
        contract: WalletAddress,
    ) -> Result<Events, MoveError> {
        if self.ended {
            return Err(MoveError::GameOver);
        }
        let player = self.player(wallet).copied().ok_or(MoveError::NotParticipant)?;
        let winner = match player.color {
            Color::White => Outcome::Black,
            Color::Black => Outcome::White,
        };
        Ok(self.end(winner, "resignation", Some(signer), Some((chain_id, contract))))
    }

    pub fn chat(&mut self, wallet: WalletAddress, text: &str, sender_label: &str) -> Events {
        if !self.has_wallet(wallet) {
            return Vec::new();
        }
        let sanitized = sanitize_chat(text);
        if sanitized.is_empty() {
            return Vec::new();
        }

        let entry = ChatEntry {
            sender: sender_label.to_string(),
            sender_short: short_label(sender_label),
            message: sanitized,
            timestamp: unix_timestamp(),
        };
        if self.chat_ring.len() >= CHAT_RING_CAPACITY {
            self.chat_ring.pop_front();
        }
        self.chat_ring.push_back(entry.clone());

        self.to_all(ServerEvent::ChatMessage {
            sender: entry.sender,
            sender_short: entry.sender_short,
            message: entry.message,
            timestamp: entry.timestamp,
        })
    }

    /// Arms a 60 s forfeit deadline for `wallet` and notifies the opponent.
    /// A no-op if the room has already ended.
    pub fn disconnect(&mut self, wallet: WalletAddress) -> Events {
        if self.ended || !self.has_wallet(wallet) {
            return Vec::new();
        }
        self.disconnect_deadlines.retain(|(w, _)| *w != wallet);
        self.disconnect_deadlines
            .push((wallet, Instant::now() + self.disconnect_forfeit_ttl));
        self.to_opponent(
            wallet,
            ServerEvent::OpponentDisconnected {
                message: "Your opponent disconnected. Waiting for reconnect...".to_string(),
            },
        )
    }

    /// Disconnect deadline firing, fired by the actor's timer. A no-op if
    /// the player reconnected before the timer fired.
    pub fn forfeit_on_disconnect(
        &mut self,
        wallet: WalletAddress,
        signer: &VerdictSigner,
        chain_id: u64,
        contract: WalletAddress,
    ) -> Events {
        if self.ended || self.disconnect_deadline(wallet).is_none() {
            return Vec::new();
        }
        self.disconnect_deadlines.retain(|(w, _)| *w != wallet);
        let Some(player) = self.player(wallet).copied() else {
            return Vec::new();
        };
        let winner = match player.color {
            Color::White => Outcome::Black,
            Color::Black => Outcome::White,
        };
        self.end(winner, "disconnect", Some(signer), Some((chain_id, contract)))
    }

    /// Rebinds `wallet`'s subscriber handle, clears any forfeit deadline,
    /// notifies the opponent, and returns a full snapshot event for the
    /// reconnecting client.
    pub fn reconnect(&mut self, wallet: WalletAddress, new_subscriber: SubscriberHandle) -> Events {
        let Some(player) = self.players.iter_mut().find(|p| p.wallet == wallet) else {
            return Vec::new();
        };
        player.subscriber = new_subscriber;
        self.disconnect_deadlines.retain(|(w, _)| *w != wallet);

        let mut events = self.to_opponent(
            wallet,
            ServerEvent::OpponentReconnected {
                message: "Your opponent reconnected.".to_string(),
            },
        );

        if let Some(verdict) = &self.verdict {
            events.push((
                new_subscriber,
                ServerEvent::GameEnded {
                    winner: verdict.winner.label().to_string(),
                    reason: verdict.reason.to_string(),
                    pgn: self.engine.pgn(),
                    game_id: self.onchain_game_id,
                    winner_address: self.winner_address(verdict.winner),
                    scores: scores_for(verdict.winner),
                    signature_white: verdict.signature_white.map(|s| s.to_hex()),
                    signature_black: verdict.signature_black.map(|s| s.to_hex()),
                },
            ));
        } else {
            events.push((
                new_subscriber,
                ServerEvent::TimerUpdate {
                    white: self.white_remaining,
                    black: self.black_remaining,
                },
            ));
        }
        events
    }

    /// 1 Hz tick, fired by the actor's interval timer. A no-op before the
    /// first move or once the game has ended. Returns the timer-update and,
    /// if the active player's clock reaches zero, the end-of-game events.
    pub fn tick(
        &mut self,
        signer: &VerdictSigner,
        chain_id: u64,
        contract: WalletAddress,
    ) -> Events {
        if !self.clock_running || self.ended {
            return Vec::new();
        }

        let to_move: Color = self.engine.side_to_move().into();
        let remaining = match to_move {
            Color::White => &mut self.white_remaining,
            Color::Black => &mut self.black_remaining,
        };

        if *remaining == 0 {
            let winner = match to_move {
                Color::White => Outcome::Black,
                Color::Black => Outcome::White,
            };
            return self.end(winner, "timeout", Some(signer), Some((chain_id, contract)));
        }

        *remaining -= 1;
        let hit_zero = *remaining == 0;
        let mut events = self.to_all(ServerEvent::TimerUpdate {
            white: self.white_remaining,
            black: self.black_remaining,
        });

        if hit_zero {
            let winner = match to_move {
                Color::White => Outcome::Black,
                Color::Black => Outcome::White,
            };
            events.extend(self.end(winner, "timeout", Some(signer), Some((chain_id, contract))));
        }
        events
    }

    fn winner_address(&self, winner: Outcome) -> Option<String> {
        let color = match winner {
            Outcome::White => Color::White,
            Outcome::Black => Color::Black,
            Outcome::Draw => return None,
        };
        self.players
            .iter()
            .find(|p| p.color == color)
            .map(|p| p.wallet.checksummed_hex())
    }

    /// Atomically latches the terminal outcome, stops the clock, signs the
    /// verdict (when verified and a signer/contract pair is supplied), and
    /// emits `gameEnded` to all subscribers. Verdicts are withheld — the
    /// game is still recorded as ended, just without signatures — if the
    /// room never reached `verified`, so no signature is ever produced for
    /// stakes the escrow never confirmed.
    fn end(
        &mut self,
        winner: Outcome,
        reason: &'static str,
        signer: Option<&VerdictSigner>,
        chain: Option<(u64, WalletAddress)>,
    ) -> Events {
        if self.ended {
            return Vec::new();
        }
        self.ended = true;
        self.clock_running = false;
        self.draw_offer = None;

        let (signature_white, signature_black) = match (self.verified, signer, chain) {
            (true, Some(signer), Some((chain_id, contract))) => {
                self.sign_verdict(winner, signer, chain_id, contract)
            }
            _ => (None, None),
        };

        self.verdict = Some(Verdict {
            winner,
            reason,
            signature_white,
            signature_black,
        });

        self.to_all(ServerEvent::GameEnded {
            winner: winner.label().to_string(),
            reason: reason.to_string(),
            pgn: self.engine.pgn(),
            game_id: self.onchain_game_id,
            winner_address: self.winner_address(winner),
            scores: scores_for(winner),
            signature_white: signature_white.map(|s| s.to_hex()),
            signature_black: signature_black.map(|s| s.to_hex()),
        })
    }

    fn sign_verdict(
        &self,
        winner: Outcome,
        signer: &VerdictSigner,
        chain_id: u64,
        contract: WalletAddress,
    ) -> (Option<Signature65>, Option<Signature65>) {
        let white_wallet = self.players.iter().find(|p| p.color == Color::White).map(|p| p.wallet);
        let black_wallet = self.players.iter().find(|p| p.color == Color::Black).map(|p| p.wallet);

        match winner {
            Outcome::White => (
                white_wallet.and_then(|w| signer.sign_win(self.onchain_game_id, &w, chain_id, &contract).ok()),
                None,
            ),
            Outcome::Black => (
                None,
                black_wallet.and_then(|w| signer.sign_win(self.onchain_game_id, &w, chain_id, &contract).ok()),
            ),
            Outcome::Draw => (
                white_wallet.and_then(|w| signer.sign_draw(self.onchain_game_id, &w, chain_id, &contract).ok()),
                black_wallet.and_then(|w| signer.sign_draw(self.onchain_game_id, &w, chain_id, &contract).ok()),
            ),
        }
    }

    /// Escrow verification denial: tears the room down with no verdict.
    pub fn cancel(&mut self, reason: &str) -> Events {
        if self.ended || self.cancelled {
            return Vec::new();
        }
        self.cancelled = true;
        self.to_all(ServerEvent::GameCancelled {
            reason: reason.to_string(),
        })
    }
}

fn scores_for(winner: Outcome) -> crate::protocol::Scores {
    match winner {
        Outcome::White => crate::protocol::Scores { white: 1000, black: 0 },
        Outcome::Black => crate::protocol::Scores { white: 0, black: 1000 },
        Outcome::Draw => crate::protocol::Scores { white: 500, black: 500 },
    }
}

/// Strips characters with HTML significance and clamps length; profanity
/// masking is intentionally conservative (substring match on a short list)
/// since perfect filtering isn't the point, just not amplifying the worst.
fn sanitize_chat(input: &str) -> String {
    let stripped: String = input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '&' | '"' | '\''))
        .collect();
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let clamped: String = trimmed.chars().take(200).collect();
    mask_profanity(&clamped)
}

const BLOCKED_WORDS: &[&str] = &["fuck", "shit", "cunt"];

fn mask_profanity(input: &str) -> String {
    let mut lower = input.to_lowercase();
    let mut out = input.to_string();
    for word in BLOCKED_WORDS {
        while let Some(pos) = lower.find(word) {
            let mask: String = std::iter::repeat('*').take(word.len()).collect();
            out.replace_range(pos..pos + word.len(), &mask);
            lower.replace_range(pos..pos + word.len(), &mask);
        }
    }
    out
}

fn short_label(full: &str) -> String {
    if full.len() <= 10 {
        full.to_string()
    } else {
        format!("{}…", &full[..8.min(full.len())])
    }
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(byte: u8) -> WalletAddress {
        WalletAddress::from_bytes([byte; 20])
    }

    fn signer_and_contract() -> (VerdictSigner, u64, WalletAddress) {
        (VerdictSigner::ephemeral(), 1337, wallet(0xee))
    }

    #[test]
    fn second_join_starts_the_game_and_emits_start_game_to_both() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        let events = room.join(black, 20).unwrap();
        assert!(room.started());
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn joining_your_own_room_is_rejected() {
        let white = wallet(1);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        assert_eq!(room.join(white, 20), Err(AdmissionError::SelfPlay));
    }

    #[test]
    fn fools_mate_ends_in_checkmate_with_signed_black_win() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        room.mark_verified();

        let (signer, chain_id, contract) = signer_and_contract();
        room.apply_move(white, "f3", &signer, chain_id, contract).unwrap();
        room.apply_move(black, "e5", &signer, chain_id, contract).unwrap();
        room.apply_move(white, "g4", &signer, chain_id, contract).unwrap();
        let events = room.apply_move(black, "Qh4#", &signer, chain_id, contract).unwrap();

        assert!(room.ended());
        let verdict = room.verdict().unwrap();
        assert_eq!(verdict.winner, Outcome::Black);
        assert_eq!(verdict.reason, "checkmate");
        assert!(verdict.signature_black.is_some());
        assert!(!events.is_empty());
    }

    #[test]
    fn resignation_ends_game_with_signed_verdict_when_verified() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        room.mark_verified();

        let (signer, chain_id, contract) = signer_and_contract();
        room.resign(white, &signer, chain_id, contract).unwrap();

        let verdict = room.verdict().unwrap();
        assert_eq!(verdict.winner, Outcome::Black);
        assert!(verdict.signature_black.is_some());
        assert!(verdict.signature_white.is_none());
    }

    #[test]
    fn resignation_before_verification_produces_no_signature() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        // Deliberately not calling mark_verified().

        let (signer, chain_id, contract) = signer_and_contract();
        room.resign(white, &signer, chain_id, contract).unwrap();

        let verdict = room.verdict().unwrap();
        assert!(verdict.signature_black.is_none());
    }

    #[test]
    fn draw_offer_then_accept_produces_two_signatures() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        room.mark_verified();

        let offer_events = room.offer_draw(white);
        assert_eq!(offer_events.len(), 1);

        let (signer, chain_id, contract) = signer_and_contract();
        room.accept_draw(black, &signer, chain_id, contract);
        let verdict = room.verdict().unwrap();
        assert_eq!(verdict.winner, Outcome::Draw);
        assert!(verdict.signature_white.is_some());
        assert!(verdict.signature_black.is_some());
        assert_ne!(
            verdict.signature_white.unwrap().to_hex(),
            verdict.signature_black.unwrap().to_hex()
        );
    }

    #[test]
    fn accepting_your_own_draw_offer_is_a_silent_no_op() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        room.offer_draw(white);

        let (signer, chain_id, contract) = signer_and_contract();
        let events = room.accept_draw(white, &signer, chain_id, contract);
        assert!(events.is_empty());
        assert!(!room.ended());
    }

    #[test]
    fn not_your_turn_is_rejected() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        let (signer, chain_id, contract) = signer_and_contract();
        assert_eq!(
            room.apply_move(black, "e5", &signer, chain_id, contract),
            Err(MoveError::NotYourTurn)
        );
    }

    #[test]
    fn clock_hits_zero_exactly_once_and_ends_the_game() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 1, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        room.mark_verified();
        let (signer, chain_id, contract) = signer_and_contract();
        room.apply_move(white, "e4", &signer, chain_id, contract).unwrap();

        let events = room.tick(&signer, chain_id, contract);
        assert!(room.ended());
        assert_eq!(room.verdict().unwrap().winner, Outcome::Black);
        assert_eq!(room.verdict().unwrap().reason, "timeout");

        // Further ticks after the game ends must not re-decrement or re-end.
        let events2 = room.tick(&signer, chain_id, contract);
        assert!(events2.is_empty());
        assert!(!events.is_empty());
    }

    #[test]
    fn clock_does_not_run_before_the_first_move() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 1, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        assert!(!room.clock_running());

        let (signer, chain_id, contract) = signer_and_contract();
        let events = room.tick(&signer, chain_id, contract);
        assert!(events.is_empty());
        assert!(!room.ended());
    }

    #[test]
    fn disconnect_then_forfeit_declares_opponent_winner() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        room.mark_verified();

        room.disconnect(black);
        assert!(room.disconnect_deadline(black).is_some());

        let (signer, chain_id, contract) = signer_and_contract();
        let events = room.forfeit_on_disconnect(black, &signer, chain_id, contract);
        assert!(room.ended());
        assert_eq!(room.verdict().unwrap().winner, Outcome::White);
        assert!(!events.is_empty());
    }

    #[test]
    fn reconnecting_before_the_deadline_clears_it_and_no_forfeit_occurs() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        room.disconnect(black);
        room.reconnect(black, 99);
        assert!(room.disconnect_deadline(black).is_none());

        let (signer, chain_id, contract) = signer_and_contract();
        let events = room.forfeit_on_disconnect(black, &signer, chain_id, contract);
        assert!(events.is_empty());
        assert!(!room.ended());
    }

    #[test]
    fn chat_strips_html_significant_characters_and_masks_profanity() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        let events = room.chat(white, "<script>this is shit</script>", "alice");
        assert_eq!(events.len(), 2);
        if let ServerEvent::ChatMessage { message, .. } = &events[0].1 {
            assert!(!message.contains('<'));
            assert!(message.contains("****"));
        } else {
            panic!("expected a ChatMessage event");
        }
    }

    #[test]
    fn chat_ring_evicts_oldest_beyond_capacity() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        for i in 0..CHAT_RING_CAPACITY + 5 {
            room.chat(white, &format!("msg {i}"), "alice");
        }
        assert_eq!(room.chat_ring.len(), CHAT_RING_CAPACITY);
        assert_eq!(room.chat_ring.front().unwrap().message, "msg 5");
    }

    #[test]
    fn cancellation_is_idempotent_and_emits_no_verdict() {
        let white = wallet(1);
        let black = wallet(2);
        let mut room = Room::new(RoomId::new(1), 1, 1000, 300, white, 10, Duration::from_secs(30), Duration::from_secs(60));
        room.join(black, 20).unwrap();
        let events = room.cancel("stake verification failed");
        assert_eq!(events.len(), 2);
        assert!(room.cancelled());
        assert!(room.verdict().is_none());
        assert!(room.cancel("again").is_empty());
    }
}
