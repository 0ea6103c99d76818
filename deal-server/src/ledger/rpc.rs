//! JSON-RPC escrow gateway client
//!
//! The gateway fronts the escrow program: it builds the transactions,
//! collects the required signatures and submits them. This client only
//! speaks JSON-RPC 2.0 over HTTP.

use super::{
    EscrowAccount, EscrowLedger, EscrowRef, InitializeEscrow, LedgerError, LedgerResult,
    Settlement,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const METHOD_INITIALIZE: &str = "initializeEscrow";
const METHOD_CONFIRM: &str = "confirmDelivery";
const METHOD_REFUND: &str = "refundTimeout";
const METHOD_FETCH: &str = "getEscrow";

#[derive(Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Escrow ledger reached through a JSON-RPC gateway
#[derive(Debug, Clone)]
pub struct RpcEscrowLedger {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl RpcEscrowLedger {
    pub fn new(url: impl Into<String>, timeout: Duration) -> LedgerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            http,
            url: url.into(),
            timeout,
        })
    }

    async fn call<P: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> LedgerResult<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: uuid::Uuid::new_v4().to_string(),
            method,
            params,
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(method, e))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LedgerError::Unavailable(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }
        if !status.is_success() {
            return Err(LedgerError::Rejected(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(method, e))?;

        if let Some(err) = body.error {
            tracing::debug!(method, code = err.code, message = %err.message, "Escrow RPC error");
            return Err(LedgerError::from_program_code(err.code, err.message));
        }

        serde_json::from_value(body.result.unwrap_or(serde_json::Value::Null)).map_err(|e| {
            LedgerError::Unavailable(format!("{} returned malformed result: {}", method, e))
        })
    }

    fn map_transport_error(&self, method: &str, err: reqwest::Error) -> LedgerError {
        if err.is_timeout() {
            LedgerError::Timeout(self.timeout)
        } else if err.is_decode() {
            LedgerError::Unavailable(format!("{} returned undecodable body: {}", method, err))
        } else {
            LedgerError::Unavailable(format!("{} failed: {}", method, err))
        }
    }
}

#[async_trait]
impl EscrowLedger for RpcEscrowLedger {
    async fn initialize_escrow(&self, request: &InitializeEscrow) -> LedgerResult<EscrowRef> {
        self.call(METHOD_INITIALIZE, request).await
    }

    async fn confirm_delivery(&self, escrow: &EscrowRef) -> LedgerResult<Settlement> {
        self.call(METHOD_CONFIRM, escrow).await
    }

    async fn refund_timeout(&self, escrow: &EscrowRef) -> LedgerResult<Settlement> {
        self.call(METHOD_REFUND, escrow).await
    }

    async fn fetch_escrow(&self, escrow: &EscrowRef) -> LedgerResult<Option<EscrowAccount>> {
        self.call(METHOD_FETCH, escrow).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EscrowState;
    use crate::ledger::error::program_codes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP request with a fixed status and JSON body
    async fn serve_once(status: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    fn escrow() -> EscrowRef {
        EscrowRef::derive("buyer", "seller", "order-1")
    }

    #[tokio::test]
    async fn test_settlement_result() {
        let escrow = escrow();
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": { "address": escrow.address, "state": "COMPLETED", "signature": "5sig" }
        })
        .to_string();
        let url = serve_once("200 OK", body).await;
        let ledger = RpcEscrowLedger::new(url, Duration::from_secs(5)).unwrap();

        let settlement = ledger.confirm_delivery(&escrow).await.unwrap();
        assert_eq!(settlement.state, EscrowState::Completed);
        assert_eq!(settlement.signature, "5sig");
    }

    #[tokio::test]
    async fn test_program_error_is_already_settled() {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "1",
            "error": { "code": program_codes::INVALID_STATE, "message": "Invalid Escrow State" }
        })
        .to_string();
        let url = serve_once("200 OK", body).await;
        let ledger = RpcEscrowLedger::new(url, Duration::from_secs(5)).unwrap();

        let result = ledger.confirm_delivery(&escrow()).await;
        assert!(matches!(result, Err(LedgerError::AlreadySettled(_))));
    }

    #[tokio::test]
    async fn test_missing_escrow_is_none() {
        let body = serde_json::json!({ "jsonrpc": "2.0", "id": "1", "result": null }).to_string();
        let url = serve_once("200 OK", body).await;
        let ledger = RpcEscrowLedger::new(url, Duration::from_secs(5)).unwrap();

        assert_eq!(ledger.fetch_escrow(&escrow()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let url = serve_once("503 Service Unavailable", "{}".to_string()).await;
        let ledger = RpcEscrowLedger::new(url, Duration::from_secs(5)).unwrap();

        let result = ledger.refund_timeout(&escrow()).await;
        assert!(matches!(result, Err(LedgerError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let ledger = RpcEscrowLedger::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();

        let result = ledger.fetch_escrow(&escrow()).await;
        assert!(matches!(result, Err(LedgerError::Unavailable(_))));
    }
}
