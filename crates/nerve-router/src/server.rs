// crates/nerve-router/src/server.rs
// ============================================================================
// Module: Control Server
// Description: JSON-RPC 2.0 over newline-delimited JSON.
// Purpose: Expose sessions, dispatch, plans, and audit queries to local shells.
// Dependencies: nerve-config, nerve-core, serde, serde_json, tokio, tracing
// ============================================================================

//! ## Overview
//! Each input line carries one JSON-RPC 2.0 request; each output line carries
//! one response. Lines longer than the configured limit are discarded up to
//! the next newline and answered with an invalid-request error, so a single
//! oversized payload never desynchronizes the stream.
//!
//! `dispatch` requests are prepared inline, in line order, which fixes their
//! position in the session's execution order before the provider call is
//! moved to a background task. Responses may therefore arrive out of line
//! order; callers correlate them by `id`. Input is untrusted: every parameter
//! object rejects unknown fields.
//!
//! Servers start in client mode. `grant`, `reload_policy`, `audit`, and
//! opening a `system`-class session are refused with `admin_required` unless
//! the host enabled administration with [`ControlServer::with_admin`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::sync::Arc;

use nerve_config::PolicyTableConfig;
use nerve_core::AuditEntry;
use nerve_core::AuditFilter;
use nerve_core::CapabilityName;
use nerve_core::CapabilityPattern;
use nerve_core::Grant;
use nerve_core::Plan;
use nerve_core::PlanId;
use nerve_core::Request;
use nerve_core::RequestId;
use nerve_core::Requestor;
use nerve_core::RequestorClass;
use nerve_core::RequestorId;
use nerve_core::Scope;
use nerve_core::SessionId;
use nerve_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::router::PreparedDispatch;
use crate::runtime::NerveRuntime;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default maximum request line length in bytes, newline excluded.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;
/// Default number of audit entries returned per query.
pub const DEFAULT_AUDIT_PAGE: usize = 100;
/// Maximum number of audit entries returned per query.
pub const MAX_AUDIT_PAGE: usize = 1_000;

/// JSON-RPC protocol version.
const JSONRPC_VERSION: &str = "2.0";
/// Invalid JSON.
const PARSE_ERROR: i64 = -32_700;
/// Not a valid request envelope.
const INVALID_REQUEST: i64 = -32_600;
/// Unknown method.
const METHOD_NOT_FOUND: i64 = -32_601;
/// Parameters failed to decode or validate.
const INVALID_PARAMS: i64 = -32_602;
/// Operation rejected by a component.
const OPERATION_FAILED: i64 = -32_000;
/// Responses buffered ahead of the writer.
const RESPONSE_QUEUE: usize = 64;
/// Operation reason for administrative methods on a client server.
const ADMIN_REQUIRED: &str = "admin_required";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Control server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Reading requests or writing responses failed.
    #[error("control transport failed: {0}")]
    Transport(String),
}

impl ServerError {
    /// Stable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport_failed",
        }
    }
}

// ============================================================================
// SECTION: Envelopes
// ============================================================================

/// Incoming JSON-RPC request.
#[derive(Debug, Deserialize)]
struct RpcRequest {
    /// Protocol version; must be `2.0`.
    jsonrpc: String,
    /// Request identifier echoed in the response.
    #[serde(default)]
    id: Value,
    /// Method name.
    method: String,
    /// Method parameters.
    #[serde(default)]
    params: Option<Value>,
}

/// Outgoing JSON-RPC response.
#[derive(Debug, Serialize)]
struct RpcResponse {
    /// Protocol version.
    jsonrpc: &'static str,
    /// Request identifier.
    id: Value,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    /// Error payload on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl RpcResponse {
    /// Builds a response from a handler outcome.
    fn from_outcome(id: Value, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => Self {
                jsonrpc: JSONRPC_VERSION,
                id,
                result: Some(result),
                error: None,
            },
            Err(error) => Self {
                jsonrpc: JSONRPC_VERSION,
                id,
                result: None,
                error: Some(error),
            },
        }
    }
}

/// JSON-RPC error payload.
#[derive(Debug, Serialize)]
struct RpcError {
    /// Protocol error code.
    code: i64,
    /// Human-readable message.
    message: String,
    /// Stable reason code for operation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl RpcError {
    /// Protocol-level error without a reason code.
    fn protocol(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Operation failure carrying a stable reason code.
    fn operation(reason: &'static str, message: impl ToString) -> Self {
        Self {
            code: OPERATION_FAILED,
            message: message.to_string(),
            data: Some(json!({ "code": reason })),
        }
    }

    /// Parameter decoding failure.
    fn params(err: &serde_json::Error) -> Self {
        Self::protocol(INVALID_PARAMS, format!("invalid params: {err}"))
    }
}

// ============================================================================
// SECTION: Parameters
// ============================================================================

/// `open` parameters.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OpenParams {
    /// Requestor identity.
    requestor_id: RequestorId,
    /// Requestor class.
    class: RequestorClass,
    /// Reuse an open session of the same requestor when one exists.
    #[serde(default)]
    resume: bool,
}

/// `grant` parameters.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GrantParams {
    /// Target session.
    session_id: SessionId,
    /// Capabilities selected by the grant.
    pattern: CapabilityPattern,
    /// Parameter scope; unrestricted when absent.
    #[serde(default = "unrestricted")]
    scope: Scope,
    /// Grant expiry in unix milliseconds.
    #[serde(default)]
    expires_at_ms: Option<Timestamp>,
    /// Whether the grant authorizes irreversible capabilities.
    #[serde(default)]
    elevated: bool,
}

/// `revoke` parameters.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RevokeParams {
    /// Target session.
    session_id: SessionId,
    /// Pattern of the grant to remove.
    pattern: CapabilityPattern,
}

/// `close` parameters.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CloseParams {
    /// Session to close.
    session_id: SessionId,
}

/// `dispatch` parameters.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DispatchParams {
    /// Caller-chosen request id.
    #[serde(default)]
    request_id: Option<RequestId>,
    /// Session the request runs under.
    session_id: SessionId,
    /// Requested capability.
    capability: CapabilityName,
    /// Capability parameters.
    #[serde(default)]
    params: Value,
    /// Deadline; the router default applies when absent.
    #[serde(default)]
    deadline_ms: Option<u64>,
}

/// `cancel` parameters.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CancelParams {
    /// In-flight request to cancel.
    request_id: RequestId,
}

/// `audit` parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuditParams {
    /// First sequence number to return.
    #[serde(default)]
    from_sequence: Option<u64>,
    /// Session filter.
    #[serde(default)]
    session_id: Option<SessionId>,
    /// Request filter.
    #[serde(default)]
    request_id: Option<RequestId>,
    /// Plan filter.
    #[serde(default)]
    plan_id: Option<PlanId>,
    /// Page size.
    #[serde(default)]
    limit: Option<usize>,
}

/// One page of audit entries.
#[derive(Debug, Serialize)]
struct AuditPage {
    /// Matching entries in sequence order.
    entries: Vec<AuditEntry>,
    /// Sequence to resume from; absent when the query is exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    next_sequence: Option<u64>,
}

/// Default grant scope.
const fn unrestricted() -> Scope {
    Scope::Unrestricted
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// JSON-lines control server bound to a runtime.
pub struct ControlServer {
    /// Runtime every method operates on.
    runtime: Arc<NerveRuntime>,
    /// Maximum request line length.
    max_line_bytes: usize,
    /// Whether administrative methods are served.
    admin: bool,
}

impl ControlServer {
    /// Creates a server with the default line limit.
    #[must_use]
    pub const fn new(runtime: Arc<NerveRuntime>) -> Self {
        Self {
            runtime,
            max_line_bytes: MAX_LINE_BYTES,
            admin: false,
        }
    }

    /// Enables or disables administrative methods.
    #[must_use]
    pub const fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    /// Overrides the request line limit.
    #[must_use]
    pub const fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Serves requests on stdin and writes responses to stdout.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when stdio fails.
    pub async fn serve_stdio(&self) -> Result<(), ServerError> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
    }

    /// Serves requests from `reader` until end of input, then waits for
    /// in-flight requests to settle.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when reading or writing fails.
    pub async fn serve<R, W>(&self, mut reader: R, writer: W) -> Result<(), ServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(RESPONSE_QUEUE);
        let writer_task = tokio::spawn(write_responses(writer, rx));
        let mut inflight = JoinSet::new();
        let mut line = Vec::new();
        info!(max_line_bytes = self.max_line_bytes, "control server started");
        let read_result = loop {
            reap_finished(&mut inflight);
            match read_line(&mut reader, &mut line, self.max_line_bytes).await {
                Ok(LineRead::Eof) => break Ok(()),
                Ok(LineRead::Oversize) => {
                    warn!(limit = self.max_line_bytes, "oversized request line discarded");
                    let error = RpcError::protocol(INVALID_REQUEST, "request line too large");
                    respond(&tx, RpcResponse::from_outcome(Value::Null, Err(error))).await;
                }
                Ok(LineRead::Line) => {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    self.handle_line(&line, &tx, &mut inflight).await;
                }
                Err(err) => break Err(ServerError::Transport(format!("read failed: {err}"))),
            }
        };
        while let Some(joined) = inflight.join_next().await {
            log_join_failure(&joined);
        }
        drop(tx);
        let written = writer_task
            .await
            .map_err(|err| ServerError::Transport(format!("writer task failed: {err}")))?;
        read_result?;
        written.map_err(|err| ServerError::Transport(format!("write failed: {err}")))?;
        info!("control server stopped");
        Ok(())
    }

    /// Decodes one line and answers it or schedules its answer.
    async fn handle_line(
        &self,
        line: &[u8],
        tx: &mpsc::Sender<RpcResponse>,
        inflight: &mut JoinSet<()>,
    ) {
        let value: Value = match serde_json::from_slice(line) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "unparseable request line");
                let error = RpcError::protocol(PARSE_ERROR, "parse error");
                respond(tx, RpcResponse::from_outcome(Value::Null, Err(error))).await;
                return;
            }
        };
        let request: RpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(err) => {
                let error = RpcError::protocol(INVALID_REQUEST, format!("invalid request: {err}"));
                respond(tx, RpcResponse::from_outcome(Value::Null, Err(error))).await;
                return;
            }
        };
        if request.jsonrpc != JSONRPC_VERSION {
            let error = RpcError::protocol(INVALID_REQUEST, "invalid json-rpc version");
            respond(tx, RpcResponse::from_outcome(request.id, Err(error))).await;
            return;
        }
        debug!(method = %request.method, "control request");
        let params = request.params.unwrap_or(Value::Null);
        let id = request.id;
        match request.method.as_str() {
            "dispatch" => match self.prepare_dispatch(params) {
                Ok(prepared) => {
                    let router = Arc::clone(self.runtime.router());
                    let tx = tx.clone();
                    inflight.spawn(async move {
                        let outcome = router
                            .run(prepared)
                            .await
                            .map_err(|err| RpcError::operation(err.code(), &err))
                            .and_then(|response| to_result(&response));
                        respond(&tx, RpcResponse::from_outcome(id, outcome)).await;
                    });
                }
                Err(error) => respond(tx, RpcResponse::from_outcome(id, Err(error))).await,
            },
            "execute_plan" => match decode::<Plan>(params) {
                Ok(plan) => {
                    let intent = Arc::clone(self.runtime.intent());
                    let tx = tx.clone();
                    inflight.spawn(async move {
                        let outcome = intent
                            .execute(&plan)
                            .await
                            .map_err(|err| RpcError::operation(err.code(), &err))
                            .and_then(|result| to_result(&result));
                        respond(&tx, RpcResponse::from_outcome(id, outcome)).await;
                    });
                }
                Err(error) => respond(tx, RpcResponse::from_outcome(id, Err(error))).await,
            },
            method => {
                let outcome = self.call(method, params);
                respond(tx, RpcResponse::from_outcome(id, outcome)).await;
            }
        }
    }

    /// Validates a dispatch and takes its place in the session order.
    fn prepare_dispatch(&self, params: Value) -> Result<PreparedDispatch, RpcError> {
        let params: DispatchParams = decode(params)?;
        let router = self.runtime.router();
        let deadline_ms = params.deadline_ms.unwrap_or(router.settings().default_deadline_ms);
        let mut request =
            Request::new(params.session_id, params.capability, params.params, deadline_ms);
        request.request_id = params.request_id;
        router.prepare(request).map_err(|err| RpcError::operation(err.code(), &err))
    }

    /// Refuses an administrative operation on a client server.
    fn require_admin(&self, method: &str) -> Result<(), RpcError> {
        if self.admin {
            return Ok(());
        }
        warn!(method, "administrative operation refused");
        Err(RpcError::operation(
            ADMIN_REQUIRED,
            format!("{method} requires an administrative control server"),
        ))
    }

    /// Handles methods that complete without awaiting a provider.
    fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let runtime = &self.runtime;
        match method {
            "open" => {
                let params: OpenParams = decode(params)?;
                if params.class == RequestorClass::System {
                    self.require_admin("opening a system session")?;
                }
                let requestor = Requestor::new(params.requestor_id, params.class);
                let session = if params.resume {
                    runtime.sessions().open_or_resume(requestor)
                } else {
                    runtime.sessions().open(requestor)
                }
                .map_err(|err| RpcError::operation(err.code(), &err))?;
                to_result(&session)
            }
            "grant" => {
                self.require_admin(method)?;
                let params: GrantParams = decode(params)?;
                let grant = Grant {
                    pattern: params.pattern,
                    scope: params.scope,
                    expires_at: params.expires_at_ms,
                    elevated: params.elevated,
                };
                let epoch = runtime
                    .sessions()
                    .grant(&params.session_id, grant)
                    .map_err(|err| RpcError::operation(err.code(), &err))?;
                Ok(json!({ "grant_epoch": epoch }))
            }
            "revoke" => {
                let params: RevokeParams = decode(params)?;
                let revoked = runtime
                    .sessions()
                    .revoke(&params.session_id, &params.pattern)
                    .map_err(|err| RpcError::operation(err.code(), &err))?;
                Ok(json!({ "revoked": revoked }))
            }
            "close" => {
                let params: CloseParams = decode(params)?;
                Ok(json!({ "closed": runtime.sessions().close(&params.session_id) }))
            }
            "cancel" => {
                let params: CancelParams = decode(params)?;
                Ok(json!({ "cancelled": runtime.router().cancel(&params.request_id) }))
            }
            "audit" => {
                self.require_admin(method)?;
                let params: AuditParams =
                    if params.is_null() { AuditParams::default() } else { decode(params)? };
                to_result(&self.audit_page(params))
            }
            "providers" => {
                let status = runtime
                    .registry()
                    .status()
                    .map_err(|err| RpcError::operation(err.code(), &err))?;
                Ok(json!({ "providers": status }))
            }
            "capabilities" => {
                let capabilities = runtime
                    .registry()
                    .capabilities()
                    .map_err(|err| RpcError::operation(err.code(), &err))?;
                Ok(json!({ "capabilities": capabilities }))
            }
            "metrics" => to_result(&runtime.metrics().snapshot()),
            "reload_policy" => {
                self.require_admin(method)?;
                let table: PolicyTableConfig = decode(params)?;
                let version = runtime
                    .reload_policy(&table)
                    .map_err(|err| RpcError::operation(err.code(), &err))?;
                Ok(json!({ "policy_version": version }))
            }
            _ => Err(RpcError::protocol(METHOD_NOT_FOUND, "method not found")),
        }
    }

    /// Collects one page of audit entries.
    fn audit_page(&self, params: AuditParams) -> AuditPage {
        let limit = params.limit.unwrap_or(DEFAULT_AUDIT_PAGE).clamp(1, MAX_AUDIT_PAGE);
        let filter = AuditFilter {
            from_sequence: params.from_sequence,
            session_id: params.session_id,
            request_id: params.request_id,
            plan_id: params.plan_id,
            ..AuditFilter::default()
        };
        let mut cursor = self.runtime.audit().query(filter);
        let entries: Vec<AuditEntry> = cursor.by_ref().take(limit).collect();
        let next_sequence = cursor.next().map(|entry| entry.sequence);
        AuditPage {
            entries,
            next_sequence,
        }
    }
}

// ============================================================================
// SECTION: Framing
// ============================================================================

/// Result of reading one request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineRead {
    /// A complete line is in the buffer.
    Line,
    /// The line exceeded the limit and was discarded.
    Oversize,
    /// Input ended.
    Eof,
}

/// Reads one newline-terminated line of at most `limit` bytes into `line`.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let mut oversize = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(match (oversize, line.is_empty()) {
                (true, _) => LineRead::Oversize,
                (false, true) => LineRead::Eof,
                (false, false) => LineRead::Line,
            });
        }
        let newline = available.iter().position(|byte| *byte == b'\n');
        let content = newline.unwrap_or(available.len());
        if !oversize {
            if line.len() + content > limit {
                oversize = true;
                line.clear();
            } else {
                line.extend_from_slice(&available[..content]);
            }
        }
        let consumed = newline.map_or(available.len(), |index| index + 1);
        reader.consume(consumed);
        if newline.is_some() {
            return Ok(if oversize { LineRead::Oversize } else { LineRead::Line });
        }
    }
}

/// Joins tasks that already finished and returns how many were joined.
fn reap_finished(inflight: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(joined) = inflight.try_join_next() {
        log_join_failure(&joined);
        reaped += 1;
    }
    reaped
}

/// Logs a request task that panicked or was aborted.
fn log_join_failure(joined: &Result<(), JoinError>) {
    if let Err(err) = joined {
        warn!(error = %err, "control request task failed");
    }
}

/// Drains the response queue into `writer`, one JSON document per line.
async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<RpcResponse>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        writer.write_all(&payload).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

/// Queues a response; a closed writer drops it.
async fn respond(tx: &mpsc::Sender<RpcResponse>, response: RpcResponse) {
    if tx.send(response).await.is_err() {
        debug!("response dropped after writer closed");
    }
}

/// Decodes method parameters.
fn decode<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|err| RpcError::params(&err))
}

/// Encodes a method result.
fn to_result<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|err| RpcError::operation("serialization_failed", err))
}
