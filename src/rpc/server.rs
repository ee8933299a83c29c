//! Line-delimited JSON-RPC TCP listener for operators: `getHealth`,
//! `listOpenRooms`, `getRoomInfo`. Kept separate from the websocket gateway
//! so a misbehaving player connection can never starve health checks.

use crate::coordinator::Coordinator;
use crate::room::RoomId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn err(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(RpcError { code, message: message.into() }) }
    }
}

pub struct AdminServer {
    coordinator: Arc<Coordinator>,
    started_at: Instant,
}

impl AdminServer {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator, started_at: Instant::now() }
    }

    pub async fn serve(self: Arc<Self>, addr: &str, shutdown: CancellationToken) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "admin surface listening");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let this = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = this.handle_connection(stream).await {
                                    tracing::debug!(%peer, error = %e, "admin connection ended with error");
                                }
                            });
                        }
                        Err(e) => tracing::error!(error = %e, "admin accept error"),
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("admin surface shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_connection(&self, stream: tokio::net::TcpStream) -> Result<(), std::io::Error> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => RpcResponse::err(Value::Null, -32700, format!("parse error: {e}")),
            };
            let mut payload = serde_json::to_vec(&response).unwrap_or_default();
            payload.push(b'\n');
            write_half.write_all(&payload).await?;
        }
        Ok(())
    }

    async fn handle_request(&self, request: RpcRequest) -> RpcResponse {
        match request.method.as_str() {
            "getHealth" => RpcResponse::ok(
                request.id,
                serde_json::json!({
                    "status": "ok",
                    "roomCount": self.coordinator.room_count(),
                    "sessionCount": self.coordinator.session_count(),
                    "uptimeSeconds": self.started_at.elapsed().as_secs(),
                }),
            ),
            "listOpenRooms" => {
                let mut rooms = Vec::new();
                for room_id in self.coordinator.list_open_rooms() {
                    if let Some(snapshot) = self.coordinator.room_info(room_id).await {
                        rooms.push(serde_json::json!({
                            "roomId": snapshot.id.to_string(),
                            "gameId": snapshot.onchain_game_id,
                            "stake": snapshot.stake,
                            "timeBudgetSeconds": snapshot.time_budget_seconds,
                        }));
                    }
                }
                RpcResponse::ok(request.id, Value::Array(rooms))
            }
            "getRoomInfo" => {
                let Some(room_id) = request
                    .params
                    .get("roomId")
                    .and_then(Value::as_str)
                    .and_then(RoomId::parse)
                else {
                    return RpcResponse::err(request.id, -32602, "missing or invalid roomId param");
                };
                match self.coordinator.room_info(room_id).await {
                    Some(s) => RpcResponse::ok(
                        request.id,
                        serde_json::json!({
                            "roomId": s.id.to_string(),
                            "gameId": s.onchain_game_id,
                            "stake": s.stake,
                            "playerCount": s.player_count,
                            "started": s.started,
                            "ended": s.ended,
                            "fen": s.fen,
                        }),
                    ),
                    None => RpcResponse::err(request.id, -32001, "room not found"),
                }
            }
            other => RpcResponse::err(request.id, -32601, format!("unknown method: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::WalletAddress;
    use crate::escrow::EscrowClient;
    use crate::signer::VerdictSigner;

    fn wallet(byte: u8) -> WalletAddress {
        WalletAddress::from_bytes([byte; 20])
    }

    fn test_server() -> AdminServer {
        let signer = Arc::new(VerdictSigner::ephemeral());
        let escrow = Arc::new(EscrowClient::new(
            vec!["http://127.0.0.1:1".to_string()],
            wallet(0xee),
            15,
            std::time::Duration::from_secs(3),
        ));
        let room_config = crate::config::RoomConfig {
            default_time_budget_seconds: 300,
            draw_offer_expiry_seconds: 30,
            disconnect_grace_seconds: 60,
            post_game_gc_seconds: 30,
        };
        let coordinator = Coordinator::new(signer, escrow, 1337, wallet(0xee), &room_config);
        AdminServer::new(coordinator)
    }

    #[tokio::test]
    async fn health_reports_zero_rooms_and_sessions_when_empty() {
        let server = test_server();
        let response = server
            .handle_request(RpcRequest { id: Value::from(1), method: "getHealth".to_string(), params: Value::Null })
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["roomCount"], 0);
        assert_eq!(result["sessionCount"], 0);
    }

    #[tokio::test]
    async fn list_open_rooms_reflects_a_freshly_created_room() {
        let server = test_server();
        let room_id = server
            .coordinator
            .create_room(wallet(1), 10, 1000, None, 1, |_| {})
            .await
            .unwrap();

        let response = server
            .handle_request(RpcRequest { id: Value::from(1), method: "listOpenRooms".to_string(), params: Value::Null })
            .await;
        let rooms = response.result.unwrap();
        assert_eq!(rooms.as_array().unwrap().len(), 1);
        assert_eq!(rooms[0]["roomId"], room_id.to_string());
    }

    #[tokio::test]
    async fn get_room_info_for_an_unknown_room_errors() {
        let server = test_server();
        let response = server
            .handle_request(RpcRequest {
                id: Value::from(1),
                method: "getRoomInfo".to_string(),
                params: serde_json::json!({ "roomId": "room-deadbeef" }),
            })
            .await;
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let server = test_server();
        let response = server
            .handle_request(RpcRequest { id: Value::from(1), method: "nonsense".to_string(), params: Value::Null })
            .await;
        assert_eq!(response.error.unwrap().code, -32601);
    }
}
