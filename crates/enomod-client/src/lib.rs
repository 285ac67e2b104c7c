//! Async client for Enovates ENO one chargers.
//!
//! [`EnoOneClient`] talks to one Modbus unit id of a charger and reads its
//! register maps as typed values. A dual-port charger is two independent
//! clients, bundled by [`Charger`].

#![forbid(unsafe_code)]

pub mod charger;
pub mod entities;
pub mod probe;

pub use charger::{Charger, ChargerConfig};
pub use probe::{probe, probe_client, ProbeError, ProbeReport};

pub use enomod_core::registers;
pub use enomod_datalink::{DataLink, DataLinkError, ModbusTcpTransport};

use enomod_core::encoding::{Reader, Writer};
use enomod_core::frame::tcp;
use enomod_core::pdu::{
    ExceptionResponse, ReadHoldingRegistersRequest, Request, Response, WriteSingleRegisterRequest,
};
use enomod_core::registers::{
    ApiVersion, RegisterError, RegisterMap, RegisterMapKind, RegisterMapValue, EMS_LIMIT_MAX,
    EMS_LIMIT_MIN,
};
use enomod_core::{DecodeError, EncodeError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

#[cfg(feature = "metrics")]
use std::sync::Arc;

/// Which requests are retried after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RetryPolicy {
    Never,
    ReadOnly,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Limit for one attempt, connecting included.
    pub response_timeout: Duration,
    pub retry_count: u8,
    /// Minimum spacing between two operations on the same client.
    pub throttle_delay: Option<Duration>,
    pub retry_policy: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::polling()
    }
}

impl ClientConfig {
    /// Profile for periodic polling: 3 retries, 3 s per attempt.
    pub fn polling() -> Self {
        Self {
            response_timeout: Duration::from_secs(3),
            retry_count: 3,
            throttle_delay: None,
            retry_policy: RetryPolicy::All,
        }
    }

    /// Profile for validating a freshly entered charger address: many short
    /// attempts so a charger that is still booting gets a chance to answer.
    pub fn first_contact() -> Self {
        Self {
            response_timeout: Duration::from_secs(1),
            retry_count: 10,
            ..Self::polling()
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u8) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_throttle_delay(mut self, throttle_delay: Option<Duration>) -> Self {
        self.throttle_delay = throttle_delay;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

/// A failure that may go away on its own and is retried within budget.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("connection failed: {0}")]
    Connection(#[source] DataLinkError),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("device rejected request: {0}")]
    Exception(ExceptionResponse),
}

/// Coarse classification of [`ClientError`], for callers that only need to
/// know how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The charger could not be reached or refused the request.
    Unavailable,
    UnsupportedApiVersion,
    /// The charger answered with something that could not be understood.
    Decode,
    InvalidArgument,
    Internal,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("charger unavailable after {attempts} attempt(s): {cause}")]
    Unavailable {
        attempts: usize,
        #[source]
        cause: TransientError,
    },
    #[error("unsupported api version {major}.{minor}")]
    UnsupportedApiVersion { major: u16, minor: u16 },
    #[error("register decode error: {0}")]
    Decode(#[from] RegisterError),
    #[error("malformed response: {0}")]
    Malformed(#[from] DecodeError),
    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),
    #[error("{what} {value} outside {min}..={max}")]
    OutOfRange {
        what: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },
    /// The transport received a frame it could not accept: bad MBAP header,
    /// wrong unit id or an oversized PDU.
    #[error("malformed frame: {0}")]
    Framing(#[source] DataLinkError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("datalink error: {0}")]
    DataLink(#[source] DataLinkError),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::UnsupportedApiVersion { .. } => ErrorKind::UnsupportedApiVersion,
            Self::Decode(_)
            | Self::Malformed(_)
            | Self::InvalidResponse(_)
            | Self::Framing(_) => ErrorKind::Decode,
            Self::OutOfRange { .. } => ErrorKind::InvalidArgument,
            Self::Encode(_) | Self::DataLink(_) => ErrorKind::Internal,
        }
    }

    /// The charger was reachable but answered with a Modbus exception.
    pub fn is_protocol_failure(&self) -> bool {
        self.exception().is_some()
    }

    pub fn exception(&self) -> Option<&ExceptionResponse> {
        match self {
            Self::Unavailable {
                cause: TransientError::Exception(ex),
                ..
            } => Some(ex),
            _ => None,
        }
    }
}

#[cfg(feature = "metrics")]
#[derive(Debug, Default)]
pub struct ClientMetrics {
    requests_total: AtomicU64,
    successful_responses: AtomicU64,
    retries_total: AtomicU64,
    timeouts_total: AtomicU64,
    transport_errors_total: AtomicU64,
    exceptions_total: AtomicU64,
    decode_errors_total: AtomicU64,
}

#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientMetricsSnapshot {
    pub requests_total: u64,
    pub successful_responses: u64,
    pub retries_total: u64,
    pub timeouts_total: u64,
    pub transport_errors_total: u64,
    pub exceptions_total: u64,
    pub decode_errors_total: u64,
}

#[cfg(feature = "metrics")]
impl ClientMetrics {
    fn snapshot(&self) -> ClientMetricsSnapshot {
        ClientMetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            successful_responses: self.successful_responses.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            timeouts_total: self.timeouts_total.load(Ordering::Relaxed),
            transport_errors_total: self.transport_errors_total.load(Ordering::Relaxed),
            exceptions_total: self.exceptions_total.load(Ordering::Relaxed),
            decode_errors_total: self.decode_errors_total.load(Ordering::Relaxed),
        }
    }

    fn record_failure(&self, cause: &TransientError) {
        let counter = match cause {
            TransientError::Connection(_) => &self.transport_errors_total,
            TransientError::Timeout(_) => &self.timeouts_total,
            TransientError::Exception(_) => &self.exceptions_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Owned result of one successful exchange.
#[derive(Debug)]
enum Reply {
    Registers(Vec<u16>),
    Written,
}

enum Outcome {
    Reply(Reply),
    Exception(ExceptionResponse),
}

/// Client for one unit id of an ENO one charger.
///
/// Operations on one client are serialized: a read and a write issued
/// concurrently never interleave on the connection, and retries of one
/// operation complete before the next operation starts.
pub struct EnoOneClient<D: DataLink = ModbusTcpTransport> {
    datalink: D,
    unit_id: u8,
    config: ClientConfig,
    // Held for a whole operation; stores when the previous one started.
    exchange_lock: Mutex<Option<Instant>>,
    request_counter: AtomicU64,
    #[cfg(feature = "metrics")]
    metrics: Arc<ClientMetrics>,
}

impl EnoOneClient<ModbusTcpTransport> {
    /// Create a client for `unit_id` on `host:port`. Nothing is sent until
    /// the first operation.
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8, config: ClientConfig) -> Self {
        Self::with_datalink(ModbusTcpTransport::new(host, port), unit_id, config)
    }

    pub fn host(&self) -> &str {
        self.datalink.host()
    }

    pub fn port(&self) -> u16 {
        self.datalink.port()
    }
}

impl<D: DataLink> EnoOneClient<D> {
    pub fn with_datalink(datalink: D, unit_id: u8, config: ClientConfig) -> Self {
        Self {
            datalink,
            unit_id,
            config,
            exchange_lock: Mutex::new(None),
            request_counter: AtomicU64::new(1),
            #[cfg(feature = "metrics")]
            metrics: Arc::new(ClientMetrics::default()),
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn config(&self) -> ClientConfig {
        self.config
    }

    pub fn datalink(&self) -> &D {
        &self.datalink
    }

    #[cfg(feature = "metrics")]
    pub fn metrics_snapshot(&self) -> ClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Read one register map.
    pub async fn fetch<M: RegisterMap>(&self) -> Result<M, ClientError> {
        let words = self
            .read_holding_registers(M::address(), M::word_count())
            .await?;
        Ok(M::decode(&words)?)
    }

    /// Read one register map chosen at runtime.
    pub async fn fetch_kind(&self, kind: RegisterMapKind) -> Result<RegisterMapValue, ClientError> {
        let words = self
            .read_holding_registers(kind.address(), kind.word_count())
            .await?;
        Ok(RegisterMapValue::decode(kind, &words)?)
    }

    /// Read the API version and make sure this client understands it.
    pub async fn check_version(&self) -> Result<ApiVersion, ClientError> {
        let version = self.fetch::<ApiVersion>().await?;
        if !version.is_supported() {
            return Err(ClientError::UnsupportedApiVersion {
                major: version.major,
                minor: version.minor,
            });
        }
        Ok(version)
    }

    /// Apply an EMS current limit in milliamps, or remove it with `-1`.
    pub async fn set_ems_limit(&self, milliamps: i16) -> Result<(), ClientError> {
        if !(EMS_LIMIT_MIN..=EMS_LIMIT_MAX).contains(&milliamps) {
            return Err(ClientError::OutOfRange {
                what: "EMS limit",
                value: i32::from(milliamps),
                min: i32::from(EMS_LIMIT_MIN),
                max: i32::from(EMS_LIMIT_MAX),
            });
        }
        self.write_register(RegisterMapKind::EmsLimit.address(), milliamps as u16)
            .await
    }

    pub async fn read_holding_registers(
        &self,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ClientError> {
        let request = Request::ReadHoldingRegisters(ReadHoldingRegistersRequest {
            start_address: start,
            quantity,
        });
        match self.execute(request).await? {
            Reply::Registers(words) => Ok(words),
            Reply::Written => Err(ClientError::InvalidResponse("unexpected function response")),
        }
    }

    /// Write one holding register, checking the echoed address and value.
    pub async fn write_register(&self, address: u16, value: u16) -> Result<(), ClientError> {
        let request = Request::WriteSingleRegister(WriteSingleRegisterRequest { address, value });
        match self.execute(request).await? {
            Reply::Written => Ok(()),
            Reply::Registers(_) => Err(ClientError::InvalidResponse("unexpected function response")),
        }
    }

    /// Drop the connection. The next operation reconnects.
    pub async fn close(&self) {
        self.datalink.close().await;
    }

    fn next_correlation_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::Relaxed)
    }

    async fn apply_throttle(&self, last: &mut Option<Instant>) {
        if let (Some(delay), Some(previous)) = (self.config.throttle_delay, *last) {
            let elapsed = previous.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn request_is_retry_eligible(&self, request: &Request) -> bool {
        match self.config.retry_policy {
            RetryPolicy::Never => false,
            RetryPolicy::All => true,
            RetryPolicy::ReadOnly => matches!(request, Request::ReadHoldingRegisters(_)),
        }
    }

    async fn execute(&self, request: Request) -> Result<Reply, ClientError> {
        let correlation_id = self.next_correlation_id();
        let unit_id = self.unit_id;
        let mut req_buf = [0u8; tcp::MAX_PDU_LEN];
        let mut writer = Writer::new(&mut req_buf);
        request.encode(&mut writer)?;
        let request_pdu = writer.as_written();

        let mut last_request_at = self.exchange_lock.lock().await;
        self.apply_throttle(&mut last_request_at).await;

        debug!(
            correlation_id,
            unit_id,
            function = request.function_code().as_u8(),
            pdu_len = request_pdu.len(),
            "dispatching modbus request"
        );
        #[cfg(feature = "metrics")]
        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

        let attempts = if self.request_is_retry_eligible(&request) {
            usize::from(self.config.retry_count) + 1
        } else {
            1
        };
        let mut response_buf = [0u8; tcp::MAX_PDU_LEN];

        for attempt in 1..=attempts {
            let result = timeout(
                self.config.response_timeout,
                self.datalink.exchange(unit_id, request_pdu, &mut response_buf),
            )
            .await;

            let cause = match result {
                Ok(Ok(len)) => match decode_reply(&request, &response_buf[..len]) {
                    Ok(Outcome::Reply(reply)) => {
                        debug!(correlation_id, unit_id, attempt, len, "modbus request succeeded");
                        #[cfg(feature = "metrics")]
                        self.metrics
                            .successful_responses
                            .fetch_add(1, Ordering::Relaxed);
                        return Ok(reply);
                    }
                    Ok(Outcome::Exception(ex)) => TransientError::Exception(ex),
                    Err(err) => return Err(self.fail(err)),
                },
                Ok(Err(err)) => match classify(err) {
                    Ok(cause) => cause,
                    Err(err) => return Err(self.fail(err)),
                },
                Err(_) => TransientError::Timeout(self.config.response_timeout),
            };

            #[cfg(feature = "metrics")]
            self.metrics.record_failure(&cause);

            if attempt == attempts {
                debug!(correlation_id, unit_id, attempt, error = %cause, "giving up on modbus request");
                return Err(ClientError::Unavailable {
                    attempts: attempt,
                    cause,
                });
            }
            warn!(
                correlation_id,
                unit_id,
                attempt,
                error = %cause,
                "retrying modbus request"
            );
            #[cfg(feature = "metrics")]
            self.metrics.retries_total.fetch_add(1, Ordering::Relaxed);
        }

        Err(ClientError::InvalidResponse("retry loop exhausted"))
    }

    fn fail(&self, err: ClientError) -> ClientError {
        #[cfg(feature = "metrics")]
        if err.kind() == ErrorKind::Decode {
            self.metrics
                .decode_errors_total
                .fetch_add(1, Ordering::Relaxed);
        }
        err
    }
}

/// Split link failures into those a retry on a fresh connection can cure
/// and those it cannot.
///
/// A transaction id mismatch is a desynchronised stream rather than a bad
/// frame, so it is retried; malformed frames are not.
fn classify(err: DataLinkError) -> Result<TransientError, ClientError> {
    match err {
        DataLinkError::Io(_)
        | DataLinkError::ConnectionClosed
        | DataLinkError::MismatchedTransactionId { .. } => Ok(TransientError::Connection(err)),
        DataLinkError::Decode(_)
        | DataLinkError::InvalidResponse(_)
        | DataLinkError::ResponseBufferTooSmall { .. } => Err(ClientError::Framing(err)),
        DataLinkError::Encode(_) | DataLinkError::InvalidRequest(_) => {
            Err(ClientError::DataLink(err))
        }
    }
}

fn decode_reply(request: &Request, pdu: &[u8]) -> Result<Outcome, ClientError> {
    let mut reader = Reader::new(pdu);
    let response = Response::decode(&mut reader)?;
    if !reader.is_empty() {
        return Err(ClientError::InvalidResponse("trailing bytes in response"));
    }

    match (request, response) {
        (_, Response::Exception(ex)) => {
            if ex.function_code != request.function_code().as_u8() {
                return Err(ClientError::InvalidResponse("exception for another function"));
            }
            Ok(Outcome::Exception(ex))
        }
        (Request::ReadHoldingRegisters(req), Response::ReadHoldingRegisters(data)) => {
            if data.register_count() != usize::from(req.quantity) {
                return Err(ClientError::InvalidResponse(
                    "register count differs from request",
                ));
            }
            Ok(Outcome::Reply(Reply::Registers(data.registers().collect())))
        }
        (Request::WriteSingleRegister(req), Response::WriteSingleRegister(echo)) => {
            if echo.address != req.address || echo.value != req.value {
                return Err(ClientError::InvalidResponse("write single register echo mismatch"));
            }
            Ok(Outcome::Reply(Reply::Written))
        }
        _ => Err(ClientError::InvalidResponse("unexpected function response")),
    }
}
