//! Escrow verifier: confirms a room's on-chain stake before gameplay is
//! trusted, by polling the escrow contract over JSON-RPC `eth_call`.
//!
//! Admission is optimistic (the room is live before this resolves); this
//! module is the asynchronous safety net that tears a room down if the
//! chain disagrees. See [`crate::room`] for the cancellation path.

use crate::address::WalletAddress;
use sha3::{Digest, Keccak256};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Escrow contract game status codes. Anything `>= COMPLETED` is terminal
/// from the coordinator's perspective regardless of the contract's own
/// finer-grained semantics for codes beyond this range.
pub mod status {
    pub const PENDING: u8 = 0;
    pub const ACTIVE: u8 = 1;
    pub const COMPLETED: u8 = 2;
    pub const CANCELLED: u8 = 3;
}

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("all configured RPC endpoints failed: {0}")]
    RpcUnreachable(String),
    #[error("malformed RPC response: {0}")]
    MalformedResponse(String),
    #[error("game {game_id} is not staked by wallet {wallet}")]
    WalletNotStaked { game_id: u64, wallet: WalletAddress },
    #[error("game {game_id} stake {actual} does not match expected {expected}")]
    StakeMismatch {
        game_id: u64,
        expected: u128,
        actual: u128,
    },
    #[error("game {game_id} is no longer pending or active (status {status})")]
    GameClosed { game_id: u64, status: u8 },
    #[error("verification did not resolve within {0} attempts")]
    AttemptsExhausted(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct GameInfo {
    pub player1: WalletAddress,
    pub player2: WalletAddress,
    pub stake_per_player: u128,
    pub total_staked: u128,
    pub created_at: u64,
    pub status: u8,
    pub winner: WalletAddress,
}

/// Rotates across a small list of RPC endpoints, failing over to the next
/// on transport error. `next_index` tracks which endpoint to try first on
/// the next call, so repeated failures don't keep hammering a dead node.
pub struct EscrowClient {
    endpoints: Vec<String>,
    contract: WalletAddress,
    http: reqwest::Client,
    next_index: Mutex<usize>,
    max_attempts: u32,
    backoff_unit: Duration,
}

impl EscrowClient {
    pub fn new(endpoints: Vec<String>, contract: WalletAddress, max_attempts: u32, backoff_unit: Duration) -> Self {
        assert!(!endpoints.is_empty(), "escrow client needs at least one RPC endpoint");
        Self {
            endpoints,
            contract,
            http: reqwest::Client::new(),
            next_index: Mutex::new(0),
            max_attempts,
            backoff_unit,
        }
    }

    /// Poll `getGameInfo(game_id)` with endpoint failover, retrying the
    /// whole rotation with linear backoff until one endpoint answers or all
    /// have failed.
    async fn get_game_info(&self, game_id: u64) -> Result<GameInfo, EscrowError> {
        let start = *self.next_index.lock().await;
        let mut last_err = String::new();

        for offset in 0..self.endpoints.len() {
            let idx = (start + offset) % self.endpoints.len();
            match self.call_get_game_info(&self.endpoints[idx], game_id).await {
                Ok(info) => {
                    *self.next_index.lock().await = idx;
                    return Ok(info);
                }
                Err(e) => last_err = e.to_string(),
            }
        }
        Err(EscrowError::RpcUnreachable(last_err))
    }

    async fn call_get_game_info(&self, endpoint: &str, game_id: u64) -> Result<GameInfo, EscrowError> {
        let calldata = encode_call(&selector("getGameInfo(uint256)"), &[u256_word(game_id as u128)]);
        let result = self.eth_call(endpoint, &calldata).await?;
        decode_game_info(&result)
    }

    /// `trustedSigner()` startup self-check: the coordinator's own signing
    /// key must derive the address the contract trusts, or every verdict it
    /// emits will be rejected on-chain.
    pub async fn trusted_signer(&self) -> Result<WalletAddress, EscrowError> {
        let calldata = encode_call(&selector("trustedSigner()"), &[]);
        let mut last_err = String::new();
        for endpoint in &self.endpoints {
            match self.eth_call(endpoint, &calldata).await {
                Ok(result) => return decode_address_result(&result),
                Err(e) => last_err = e.to_string(),
            }
        }
        Err(EscrowError::RpcUnreachable(last_err))
    }

    async fn eth_call(&self, endpoint: &str, calldata: &[u8]) -> Result<Vec<u8>, EscrowError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_call",
            "params": [
                { "to": self.contract.lower_hex(), "data": format!("0x{}", hex::encode(calldata)) },
                "latest"
            ],
            "id": 1,
        });

        let resp = self
            .http
            .post(endpoint)
            .json(&body)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| EscrowError::RpcUnreachable(e.to_string()))?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EscrowError::MalformedResponse(e.to_string()))?;

        if let Some(err) = json.get("error") {
            return Err(EscrowError::MalformedResponse(err.to_string()));
        }

        let result_hex = json["result"]
            .as_str()
            .ok_or_else(|| EscrowError::MalformedResponse("missing result field".into()))?;
        hex::decode(result_hex.strip_prefix("0x").unwrap_or(result_hex))
            .map_err(|e| EscrowError::MalformedResponse(e.to_string()))
    }

    /// Poll until the on-chain record confirms `wallet` staked `expected_stake`
    /// for `game_id` and the game is still open, or give up after
    /// `max_attempts` attempts with linear backoff. An explicit denial
    /// (status already closed, or the wallet/stake mismatch) returns
    /// immediately without further retries.
    pub async fn verify(
        &self,
        game_id: u64,
        wallet: WalletAddress,
        expected_stake: u128,
    ) -> Result<(), EscrowError> {
        for attempt in 1..=self.max_attempts {
            match self.get_game_info(game_id).await {
                Ok(info) => return self.evaluate(game_id, wallet, expected_stake, info),
                Err(EscrowError::RpcUnreachable(_)) if attempt < self.max_attempts => {
                    tokio::time::sleep(self.backoff_unit * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(EscrowError::AttemptsExhausted(self.max_attempts))
    }

    fn evaluate(
        &self,
        game_id: u64,
        wallet: WalletAddress,
        expected_stake: u128,
        info: GameInfo,
    ) -> Result<(), EscrowError> {
        if info.status >= status::COMPLETED {
            return Err(EscrowError::GameClosed {
                game_id,
                status: info.status,
            });
        }
        if info.player1 != wallet && info.player2 != wallet {
            return Err(EscrowError::WalletNotStaked { game_id, wallet });
        }
        if info.stake_per_player != expected_stake {
            return Err(EscrowError::StakeMismatch {
                game_id,
                expected: expected_stake,
                actual: info.stake_per_player,
            });
        }
        Ok(())
    }
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

fn u256_word(value: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

fn encode_call(selector: &[u8; 4], words: &[[u8; 32]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + words.len() * 32);
    out.extend_from_slice(selector);
    for word in words {
        out.extend_from_slice(word);
    }
    out
}

fn word_to_address(word: &[u8]) -> WalletAddress {
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..32]);
    WalletAddress::from_bytes(bytes)
}

fn word_to_u128(word: &[u8]) -> u128 {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&word[16..32]);
    u128::from_be_bytes(bytes)
}

fn decode_address_result(data: &[u8]) -> Result<WalletAddress, EscrowError> {
    if data.len() < 32 {
        return Err(EscrowError::MalformedResponse(
            "expected a single address word".into(),
        ));
    }
    Ok(word_to_address(&data[..32]))
}

/// `getGameInfo` returns `(address, address, uint256, uint256, uint256, uint8, address)`,
/// seven 32-byte words in standard (non-packed) ABI encoding.
fn decode_game_info(data: &[u8]) -> Result<GameInfo, EscrowError> {
    const WORDS: usize = 7;
    if data.len() < WORDS * 32 {
        return Err(EscrowError::MalformedResponse(format!(
            "expected {} bytes, got {}",
            WORDS * 32,
            data.len()
        )));
    }
    let word = |i: usize| &data[i * 32..(i + 1) * 32];
    Ok(GameInfo {
        player1: word_to_address(word(0)),
        player2: word_to_address(word(1)),
        stake_per_player: word_to_u128(word(2)),
        total_staked: word_to_u128(word(3)),
        created_at: word_to_u128(word(4)) as u64,
        status: *word(5).last().unwrap(),
        winner: word_to_address(word(6)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_four_bytes_of_the_function_signature_hash() {
        let s = selector("trustedSigner()");
        assert_eq!(s.len(), 4);
        // Regression pin: selectors must be stable across runs.
        assert_eq!(s, selector("trustedSigner()"));
        assert_ne!(s, selector("getGameInfo(uint256)"));
    }

    #[test]
    fn decode_game_info_round_trips_a_hand_built_response() {
        let player1 = WalletAddress::from_bytes([0x11; 20]);
        let player2 = WalletAddress::from_bytes([0x22; 20]);
        let winner = WalletAddress::from_bytes([0u8; 20]);

        let mut data = Vec::new();
        let mut push_addr = |addr: &WalletAddress| {
            data.extend_from_slice(&[0u8; 12]);
            data.extend_from_slice(addr.as_bytes());
        };
        push_addr(&player1);
        push_addr(&player2);
        data.extend_from_slice(&u256_word(1000));
        data.extend_from_slice(&u256_word(2000));
        data.extend_from_slice(&u256_word(1_700_000_000));
        data.extend_from_slice(&u256_word(status::ACTIVE as u128));
        push_addr(&winner);

        let info = decode_game_info(&data).unwrap();
        assert_eq!(info.player1, player1);
        assert_eq!(info.player2, player2);
        assert_eq!(info.stake_per_player, 1000);
        assert_eq!(info.total_staked, 2000);
        assert_eq!(info.status, status::ACTIVE);
        assert_eq!(info.winner, winner);
    }

    #[test]
    fn evaluate_rejects_wallet_not_in_the_game() {
        let client = EscrowClient::new(
            vec!["http://localhost:1".into()],
            WalletAddress::from_bytes([1; 20]),
            15,
            Duration::from_secs(3),
        );
        let info = GameInfo {
            player1: WalletAddress::from_bytes([0x11; 20]),
            player2: WalletAddress::from_bytes([0x22; 20]),
            stake_per_player: 1000,
            total_staked: 2000,
            created_at: 0,
            status: status::ACTIVE,
            winner: WalletAddress::from_bytes([0; 20]),
        };
        let outsider = WalletAddress::from_bytes([0x33; 20]);
        let result = client.evaluate(1, outsider, 1000, info);
        assert!(matches!(result, Err(EscrowError::WalletNotStaked { .. })));
    }

    #[test]
    fn evaluate_rejects_closed_games() {
        let client = EscrowClient::new(
            vec!["http://localhost:1".into()],
            WalletAddress::from_bytes([1; 20]),
            15,
            Duration::from_secs(3),
        );
        let player1 = WalletAddress::from_bytes([0x11; 20]);
        let info = GameInfo {
            player1,
            player2: WalletAddress::from_bytes([0x22; 20]),
            stake_per_player: 1000,
            total_staked: 2000,
            created_at: 0,
            status: status::COMPLETED,
            winner: player1,
        };
        let result = client.evaluate(1, player1, 1000, info);
        assert!(matches!(result, Err(EscrowError::GameClosed { .. })));
    }
}
