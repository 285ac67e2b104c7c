//! Async Modbus TCP transport for ENO one chargers.
//!
//! [`ModbusTcpTransport`] owns at most one socket, opened lazily and
//! discarded whenever it is found dead, desynchronised, or abandoned in the
//! middle of an exchange. [`ModbusTcpServer`] and [`SimulatedCharger`] serve
//! the same register layout for tests and the `enoone-sim` tool.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use enomod_core::encoding::{Reader, Writer};
use enomod_core::frame::tcp;
use enomod_core::{DecodeError, EncodeError};
use std::io;
use std::sync::atomic::{AtomicU16, Ordering};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

pub mod server;
pub mod sim;
pub use server::{ModbusService, ModbusTcpServer, ServiceError};
pub use sim::{encode_string, RegisterBank, SimulatedCharger};

#[derive(Debug, Error)]
pub enum DataLinkError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),
    #[error("transaction id mismatch: expected {expected}, got {got}")]
    MismatchedTransactionId { expected: u16, got: u16 },
    #[error("response buffer too small (needed {needed}, available {available})")]
    ResponseBufferTooSmall { needed: usize, available: usize },
}

impl DataLinkError {
    /// The failure came from the connection itself rather than from what the
    /// device sent back.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }
}

#[async_trait]
pub trait DataLink: Send + Sync {
    /// Send a request PDU to a unit and write the response PDU into `response_pdu`.
    ///
    /// Returns the number of response bytes written to `response_pdu`.
    async fn exchange(
        &self,
        unit_id: u8,
        request_pdu: &[u8],
        response_pdu: &mut [u8],
    ) -> Result<usize, DataLinkError>;

    /// Drop any open connection. Calling this on a closed link is a no-op.
    async fn close(&self) {}
}

#[derive(Debug, Default)]
struct ConnectionSlot {
    stream: Option<TcpStream>,
    // Set while a request is on the wire; still set on entry means the
    // previous exchange was cancelled or timed out part way.
    dirty: bool,
}

impl ConnectionSlot {
    fn discard(&mut self) {
        self.stream = None;
        self.dirty = false;
    }
}

/// Modbus TCP client side of one charger connection.
#[derive(Debug)]
pub struct ModbusTcpTransport {
    host: String,
    port: u16,
    slot: Mutex<ConnectionSlot>,
    next_transaction_id: AtomicU16,
}

impl ModbusTcpTransport {
    /// Create a transport for `host:port`. No connection is made until the
    /// first exchange.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            slot: Mutex::new(ConnectionSlot::default()),
            next_transaction_id: AtomicU16::new(1),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.stream.is_some()
    }

    fn next_tid(&self) -> u16 {
        self.next_transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Make sure `slot` holds a live connection, reconnecting if needed.
    async fn prepare(&self, slot: &mut ConnectionSlot) -> Result<(), DataLinkError> {
        if slot.dirty {
            debug!(host = %self.host, port = self.port, "discarding connection left mid-exchange");
            slot.discard();
        }
        if let Some(stream) = slot.stream.as_ref() {
            if !is_alive(stream) {
                debug!(host = %self.host, port = self.port, "discarding dead connection");
                slot.discard();
            }
        }

        if slot.stream.is_none() {
            let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            stream.set_nodelay(true)?;
            info!(host = %self.host, port = self.port, "connected");
            slot.stream = Some(stream);
        }
        Ok(())
    }
}

/// Non-blocking check that the peer has not closed the socket and that no
/// stray bytes are waiting to be read.
fn is_alive(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match stream.try_read(&mut probe) {
        Ok(0) => false,
        Ok(_) => false,
        Err(err) => err.kind() == io::ErrorKind::WouldBlock,
    }
}

async fn read_exact_or_connection_closed(
    stream: &mut TcpStream,
    buf: &mut [u8],
) -> Result<(), DataLinkError> {
    if let Err(err) = stream.read_exact(buf).await {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Err(DataLinkError::ConnectionClosed);
        }
        return Err(DataLinkError::Io(err));
    }
    Ok(())
}

async fn exchange_on(
    stream: &mut TcpStream,
    transaction_id: u16,
    unit_id: u8,
    request_frame: &[u8],
    response_pdu: &mut [u8],
) -> Result<usize, DataLinkError> {
    stream.write_all(request_frame).await?;

    let mut mbap = [0u8; tcp::MBAP_HEADER_LEN];
    read_exact_or_connection_closed(stream, &mut mbap).await?;
    let header = tcp::MbapHeader::decode(&mut Reader::new(&mbap))?;
    if header.transaction_id != transaction_id {
        return Err(DataLinkError::MismatchedTransactionId {
            expected: transaction_id,
            got: header.transaction_id,
        });
    }
    if header.unit_id != unit_id {
        return Err(DataLinkError::InvalidResponse("unit id mismatch"));
    }

    let pdu_len = header.pdu_len();
    if pdu_len > response_pdu.len() {
        return Err(DataLinkError::ResponseBufferTooSmall {
            needed: pdu_len,
            available: response_pdu.len(),
        });
    }
    read_exact_or_connection_closed(stream, &mut response_pdu[..pdu_len]).await?;
    Ok(pdu_len)
}

#[async_trait]
impl DataLink for ModbusTcpTransport {
    async fn exchange(
        &self,
        unit_id: u8,
        request_pdu: &[u8],
        response_pdu: &mut [u8],
    ) -> Result<usize, DataLinkError> {
        if request_pdu.is_empty() {
            return Err(DataLinkError::InvalidRequest("empty request pdu"));
        }

        let transaction_id = self.next_tid();
        let mut req_frame = vec![0u8; tcp::MBAP_HEADER_LEN + request_pdu.len()];
        let mut writer = Writer::new(&mut req_frame);
        tcp::encode_frame(&mut writer, transaction_id, unit_id, request_pdu)?;

        let mut slot = self.slot.lock().await;
        self.prepare(&mut slot).await?;
        trace!(
            transaction_id,
            unit_id,
            pdu_len = request_pdu.len(),
            "sending modbus tcp request"
        );

        slot.dirty = true;
        let stream = slot.stream.as_mut().ok_or(DataLinkError::ConnectionClosed)?;
        let result = exchange_on(
            stream,
            transaction_id,
            unit_id,
            writer.as_written(),
            response_pdu,
        )
        .await;

        match result {
            Ok(pdu_len) => {
                slot.dirty = false;
                trace!(transaction_id, unit_id, pdu_len, "received modbus tcp response");
                Ok(pdu_len)
            }
            Err(err) => {
                // Whatever is left on the socket can no longer be matched to a request.
                debug!(transaction_id, unit_id, error = %err, "dropping connection after failed exchange");
                slot.discard();
                Err(err)
            }
        }
    }

    async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if slot.stream.is_some() {
            info!(host = %self.host, port = self.port, "closing connection");
        }
        slot.discard();
    }
}
