//! JSON-RPC over stdio transport.
//!
//! Handles the wire exchange with one provider process:
//! - Writing one JSON-RPC request per line to stdin
//! - A dedicated reader task that decodes every stdout line and hands each
//!   response to the waiter registered under its `id`
//! - Per-request timeout, with recent stderr attached to the error
//!
//! Because responses are matched by id, several requests may be in flight on
//! the same provider at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;

use super::errors::ProviderError;
use super::logs::LogHandle;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Generate a fresh correlation id.
pub fn next_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ─── Pending Calls ───────────────────────────────────────────────────────────

/// What the reader task delivers to a waiting request.
#[derive(Debug)]
enum Reply {
    Response(JsonRpcResponse),
    Malformed(String),
    Closed,
}

/// Id-indexed map of requests awaiting a response.
#[derive(Default)]
struct PendingCalls {
    waiters: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
    closed: AtomicBool,
}

impl PendingCalls {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Reply>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter. `None` once the output stream has closed.
    fn register(&self, id: &str) -> Option<oneshot::Receiver<Reply>> {
        let mut waiters = self.lock();
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        waiters.insert(id.to_string(), tx);
        Some(rx)
    }

    fn cancel(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Hand `reply` to the waiter for `id`. Returns `false` if nobody waits.
    fn fulfil(&self, id: &str, reply: Reply) -> bool {
        match self.lock().remove(id) {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Hand `reply` to the only pending waiter, if there is exactly one.
    fn fulfil_sole(&self, reply: Reply) -> bool {
        let mut waiters = self.lock();
        if waiters.len() != 1 {
            return false;
        }
        let Some(id) = waiters.keys().next().cloned() else {
            return false;
        };
        match waiters.remove(&id) {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Mark the stream closed and fail every waiter.
    fn close(&self) {
        let mut waiters = self.lock();
        self.closed.store(true, Ordering::SeqCst);
        for (_, tx) in waiters.drain() {
            let _ = tx.send(Reply::Closed);
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Tunables for a [`StdioTransport`].
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    /// Upper bound on waiting for a response.
    pub timeout: Duration,
    /// Stderr lines attached to timeout / no-response errors.
    pub log_context_lines: usize,
}

/// Bi-directional JSON-RPC transport over a provider's stdin/stdout.
pub struct StdioTransport {
    provider: String,
    writer: TokioMutex<Option<BoxedWriter>>,
    pending: Arc<PendingCalls>,
    logs: LogHandle,
    options: TransportOptions,
    reader: JoinHandle<()>,
}

impl StdioTransport {
    /// Create a transport and start its reader task on `stdout`.
    pub fn new<W, R>(
        provider: &str,
        stdin: W,
        stdout: R,
        logs: LogHandle,
        options: TransportOptions,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending = Arc::new(PendingCalls::default());
        let reader = tokio::spawn(read_responses(
            provider.to_string(),
            stdout,
            Arc::clone(&pending),
        ));

        Self {
            provider: provider.to_string(),
            writer: TokioMutex::new(Some(Box::new(stdin))),
            pending,
            logs,
            options,
            reader,
        }
    }

    /// Send a JSON-RPC request and wait for the response with the same id.
    ///
    /// Returns the `result` member (an empty object if absent).
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ProviderError> {
        let id = next_request_id();
        let line = self.encode(&JsonRpcRequest::new(&id, method, params))?;

        let Some(rx) = self.pending.register(&id) else {
            return Err(self.no_response(method).await);
        };

        if let Err(e) = self.write_line(&line).await {
            self.pending.cancel(&id);
            return Err(e);
        }
        tracing::debug!(provider = %self.provider, method, id = %id, "request sent");

        let reply = match tokio::time::timeout(self.options.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Reply::Closed,
            Err(_) => {
                self.pending.cancel(&id);
                tracing::warn!(
                    provider = %self.provider,
                    method,
                    timeout_ms = self.timeout_ms(),
                    "provider request timed out"
                );
                return Err(ProviderError::Timeout {
                    provider: self.provider.clone(),
                    method: method.to_string(),
                    timeout_ms: self.timeout_ms(),
                    recent_logs: self.recent_logs().await,
                });
            }
        };

        match reply {
            Reply::Response(response) => extract_result(&self.provider, response),
            Reply::Malformed(reason) => Err(ProviderError::MalformedResponse {
                provider: self.provider.clone(),
                reason,
            }),
            Reply::Closed => Err(self.no_response(method).await),
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ProviderError> {
        let line = self.encode(&JsonRpcNotification::new(method, params))?;
        self.write_line(&line).await
    }

    /// Number of requests currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Stop reading, fail in-flight requests and drop stdin (EOF to the provider).
    ///
    /// Stdin is left alone if a write currently holds it.
    pub fn close(&self) {
        self.reader.abort();
        self.pending.close();
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
    }

    fn encode<T: Serialize>(&self, message: &T) -> Result<String, ProviderError> {
        let mut json = serde_json::to_string(message).map_err(|e| ProviderError::WriteFailed {
            provider: self.provider.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        json.push('\n');
        Ok(json)
    }

    async fn write_line(&self, line: &str) -> Result<(), ProviderError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| ProviderError::WriteFailed {
            provider: self.provider.clone(),
            reason: "stdin already closed".into(),
        })?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ProviderError::WriteFailed {
                provider: self.provider.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer
            .flush()
            .await
            .map_err(|e| ProviderError::WriteFailed {
                provider: self.provider.clone(),
                reason: format!("failed to flush stdin: {e}"),
            })
    }

    async fn recent_logs(&self) -> Vec<String> {
        self.logs.recent_lines(self.options.log_context_lines).await
    }

    async fn no_response(&self, method: &str) -> ProviderError {
        ProviderError::NoResponse {
            provider: self.provider.clone(),
            method: method.to_string(),
            recent_logs: self.recent_logs().await,
        }
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.options.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader.abort();
        self.pending.close();
    }
}

// ─── Reader Loop ─────────────────────────────────────────────────────────────

/// Classification of one stdout line.
#[derive(Debug)]
enum Decoded {
    /// A response addressed to a request id.
    Addressed { id: String, response: JsonRpcResponse },
    /// Something a single in-flight request should receive, but which carries
    /// no usable id (parse failures, id-less error envelopes).
    Unaddressed(Reply),
    /// A provider-initiated message (has `method`); not ours to answer.
    Notification { method: String },
}

fn decode_line(line: &str) -> Decoded {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return Decoded::Unaddressed(Reply::Malformed(format!("invalid JSON: {e}"))),
    };

    if let Some(method) = value.get("method").and_then(|m| m.as_str()) {
        return Decoded::Notification {
            method: method.to_string(),
        };
    }

    let response: JsonRpcResponse = match serde_json::from_value(value) {
        Ok(response) => response,
        Err(e) => {
            return Decoded::Unaddressed(Reply::Malformed(format!(
                "not a JSON-RPC response: {e}"
            )))
        }
    };

    match response.correlation_id() {
        Some(id) => Decoded::Addressed { id, response },
        None if response.error.is_some() => Decoded::Unaddressed(Reply::Response(response)),
        None => Decoded::Unaddressed(Reply::Malformed("response carries no id".into())),
    }
}

fn dispatch_line(provider: &str, pending: &PendingCalls, line: &str) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }

    match decode_line(trimmed) {
        Decoded::Addressed { id, response } => {
            if !pending.fulfil(&id, Reply::Response(response)) {
                tracing::warn!(provider, id = %id, "dropping response with no pending request");
            }
        }
        Decoded::Unaddressed(reply) => {
            if !pending.fulfil_sole(reply) {
                tracing::warn!(provider, line = trimmed, "dropping unattributable provider output");
            }
        }
        Decoded::Notification { method } => {
            tracing::debug!(provider, method = %method, "ignoring provider notification");
        }
    }
}

/// Decode stdout lines until EOF, then fail whatever is still pending.
async fn read_responses<R>(provider: String, stdout: R, pending: Arc<PendingCalls>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => dispatch_line(&provider, &pending, &String::from_utf8_lossy(&buf)),
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "failed to read provider stdout");
                break;
            }
        }
    }

    tracing::debug!(provider = %provider, "provider stdout closed");
    pending.close();
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors.
pub fn extract_result(
    provider: &str,
    response: JsonRpcResponse,
) -> Result<serde_json::Value, ProviderError> {
    if let Some(payload) = response.error {
        return Err(ProviderError::RpcError {
            provider: provider.to_string(),
            payload,
        });
    }
    Ok(response
        .result
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::logs::LogMonitor;
    use tokio::io::{duplex, DuplexStream, Lines};

    fn options(timeout_ms: u64) -> TransportOptions {
        TransportOptions {
            timeout: Duration::from_millis(timeout_ms),
            log_context_lines: 5,
        }
    }

    /// Transport wired to in-memory pipes. Returns the provider's side:
    /// a line reader over what we wrote and a writer for our stdout.
    fn wired(
        timeout_ms: u64,
        stderr: &'static [u8],
    ) -> (StdioTransport, LogMonitor, Lines<BufReader<DuplexStream>>, DuplexStream) {
        let (client_in, provider_in) = duplex(64 * 1024);
        let (provider_out, client_out) = duplex(64 * 1024);
        let monitor = LogMonitor::spawn("mock", stderr, 100);
        let transport =
            StdioTransport::new("mock", client_in, client_out, monitor.handle(), options(timeout_ms));
        (transport, monitor, BufReader::new(provider_in).lines(), provider_out)
    }

    async fn read_request(lines: &mut Lines<BufReader<DuplexStream>>) -> serde_json::Value {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn reply(out: &mut DuplexStream, body: String) {
        out.write_all(body.as_bytes()).await.unwrap();
        out.write_all(b"\n").await.unwrap();
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(next_request_id(), next_request_id());
    }

    #[test]
    fn test_extract_result_defaults_to_empty_object() {
        let resp: JsonRpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":"1"}"#).unwrap();
        let result = extract_result("mock", resp).unwrap();
        assert_eq!(result, serde_json::json!({}));
    }

    #[test]
    fn test_extract_result_error_keeps_payload() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":"1","error":{"code":-32601,"message":"Method not found","data":{"x":1}}}"#,
        )
        .unwrap();
        match extract_result("mock", resp).unwrap_err() {
            ProviderError::RpcError { payload, .. } => {
                assert_eq!(payload["code"], -32601);
                assert_eq!(payload["data"]["x"], 1);
            }
            other => panic!("expected RpcError, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_line_variants() {
        assert!(matches!(
            decode_line(r#"{"jsonrpc":"2.0","id":"a","result":{}}"#),
            Decoded::Addressed { ref id, .. } if id == "a"
        ));
        assert!(matches!(
            decode_line(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#),
            Decoded::Notification { .. }
        ));
        assert!(matches!(
            decode_line("Server listening on stdio"),
            Decoded::Unaddressed(Reply::Malformed(_))
        ));
        assert!(matches!(
            decode_line(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700}}"#),
            Decoded::Unaddressed(Reply::Response(_))
        ));
        assert!(matches!(
            decode_line(r#"{"jsonrpc":"2.0","result":{}}"#),
            Decoded::Unaddressed(Reply::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_request_writes_one_line_and_returns_result() {
        let (transport, _monitor, mut lines, mut out) = wired(2_000, b"");

        let provider = tokio::spawn(async move {
            let req = read_request(&mut lines).await;
            assert_eq!(req["jsonrpc"], "2.0");
            assert_eq!(req["method"], "tools/list");
            assert_eq!(req["params"], serde_json::json!({}));
            let id = req["id"].as_str().unwrap().to_string();
            reply(&mut out, format!(r#"{{"jsonrpc":"2.0","id":"{id}","result":{{"tools":[]}}}}"#)).await;
            (lines, out)
        });

        let result = transport
            .request("tools/list", Some(serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"tools": []}));
        assert_eq!(transport.in_flight(), 0);
        let _ = provider.await.unwrap();
    }

    #[tokio::test]
    async fn test_params_omitted_when_absent() {
        let (transport, _monitor, mut lines, mut out) = wired(2_000, b"");

        let provider = tokio::spawn(async move {
            let req = read_request(&mut lines).await;
            assert!(req.get("params").is_none());
            let id = req["id"].as_str().unwrap().to_string();
            reply(&mut out, format!(r#"{{"jsonrpc":"2.0","id":"{id}"}}"#)).await;
            (lines, out)
        });

        let result = transport.request("ping", None).await.unwrap();
        assert_eq!(result, serde_json::json!({}));
        let _ = provider.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_demultiplexed_by_id() {
        let (transport, _monitor, mut lines, mut out) = wired(2_000, b"");

        let provider = tokio::spawn(async move {
            let first = read_request(&mut lines).await;
            let second = read_request(&mut lines).await;
            // Answer in reverse order, echoing the method back.
            for req in [second, first] {
                let id = req["id"].as_str().unwrap();
                let method = req["method"].as_str().unwrap();
                reply(
                    &mut out,
                    format!(r#"{{"jsonrpc":"2.0","id":"{id}","result":{{"echo":"{method}"}}}}"#),
                )
                .await;
            }
            (lines, out)
        });

        let (a, b) = tokio::join!(transport.request("alpha", None), transport.request("beta", None));
        assert_eq!(a.unwrap()["echo"], "alpha");
        assert_eq!(b.unwrap()["echo"], "beta");
        let _ = provider.await.unwrap();
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces_payload() {
        let (transport, _monitor, mut lines, mut out) = wired(2_000, b"");

        let provider = tokio::spawn(async move {
            let req = read_request(&mut lines).await;
            let id = req["id"].as_str().unwrap().to_string();
            reply(
                &mut out,
                format!(r#"{{"jsonrpc":"2.0","id":"{id}","error":{{"code":-32602,"message":"bad params"}}}}"#),
            )
            .await;
            (lines, out)
        });

        let err = transport.request("tools/call", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::RpcError { .. }));
        assert!(err.to_string().contains("bad params"));
        let _ = provider.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_line_fails_the_single_pending_request() {
        let (transport, _monitor, mut lines, mut out) = wired(2_000, b"");

        let provider = tokio::spawn(async move {
            let _ = read_request(&mut lines).await;
            reply(&mut out, "this is not json".to_string()).await;
            (lines, out)
        });

        let err = transport.request("initialize", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
        let _ = provider.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_leaves_transport_usable_and_reports_stderr() {
        let (transport, monitor, mut lines, mut out) =
            wired(150, b"starting\nError: STRIPE_SECRET_KEY not set\n");
        for _ in 0..100 {
            if monitor.handle().snapshot(None).await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let started = std::time::Instant::now();
        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(150));
        match &err {
            ProviderError::Timeout { timeout_ms, recent_logs, .. } => {
                assert_eq!(*timeout_ms, 150);
                assert_eq!(recent_logs.len(), 2);
                assert!(recent_logs[1].contains("STRIPE_SECRET_KEY"));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert_eq!(transport.in_flight(), 0);

        // A late answer to the timed-out id is dropped; the next call still works.
        let stale = read_request(&mut lines).await;
        let stale_id = stale["id"].as_str().unwrap().to_string();
        let provider = tokio::spawn(async move {
            reply(&mut out, format!(r#"{{"jsonrpc":"2.0","id":"{stale_id}","result":{{"late":true}}}}"#)).await;
            let req = read_request(&mut lines).await;
            let id = req["id"].as_str().unwrap().to_string();
            reply(&mut out, format!(r#"{{"jsonrpc":"2.0","id":"{id}","result":{{"late":false}}}}"#)).await;
            (lines, out)
        });
        let result = transport.request("tools/list", None).await.unwrap();
        assert_eq!(result["late"], false);
        let _ = provider.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_stdout_yields_no_response() {
        let (transport, _monitor, lines, out) = wired(2_000, b"");
        drop(out);
        drop(lines);

        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(
            matches!(err, ProviderError::NoResponse { .. } | ProviderError::WriteFailed { .. }),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn test_close_fails_in_flight_requests() {
        let (transport, _monitor, mut lines, out) = wired(5_000, b"");
        let transport = Arc::new(transport);

        let waiting = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.request("tools/list", None).await })
        };
        let _ = read_request(&mut lines).await;
        transport.close();

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, ProviderError::NoResponse { .. }));
        drop(out);
    }
}
