use crate::DataLinkError;
use enomod_core::encoding::{Reader, Writer};
use enomod_core::frame::tcp;
use enomod_core::pdu::{ExceptionCode, ExceptionResponse, Request};
use enomod_core::DecodeError;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("modbus exception: {0}")]
    Exception(ExceptionCode),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

pub trait ModbusService: Send + Sync + 'static {
    /// Handle a decoded request and write a response PDU into `response_pdu`.
    ///
    /// Return the number of bytes written. The response must include function
    /// code and payload, but not MBAP header bytes.
    fn handle(
        &self,
        unit_id: u8,
        request: Request,
        response_pdu: &mut [u8],
    ) -> Result<usize, ServiceError>;
}

impl<T> ModbusService for Arc<T>
where
    T: ModbusService + ?Sized,
{
    fn handle(
        &self,
        unit_id: u8,
        request: Request,
        response_pdu: &mut [u8],
    ) -> Result<usize, ServiceError> {
        (**self).handle(unit_id, request, response_pdu)
    }
}

/// Serves a [`ModbusService`] over Modbus TCP, one task per connection.
pub struct ModbusTcpServer<S> {
    listener: TcpListener,
    service: Arc<S>,
}

impl<S: ModbusService> ModbusTcpServer<S> {
    pub async fn bind<A: ToSocketAddrs>(addr: A, service: S) -> Result<Self, DataLinkError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, service))
    }

    pub fn from_listener(listener: TcpListener, service: S) -> Self {
        Self {
            listener,
            service: Arc::new(service),
        }
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, DataLinkError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<(), DataLinkError> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            info!(%peer, "accepted modbus tcp connection");
            let service = Arc::clone(&self.service);

            tokio::spawn(async move {
                if let Err(err) = handle_connection(socket, service).await {
                    warn!(%peer, error = %err, "modbus tcp server connection ended with error");
                }
            });
        }
    }
}

async fn handle_connection<S: ModbusService>(
    mut socket: TcpStream,
    service: Arc<S>,
) -> Result<(), DataLinkError> {
    let mut request_pdu = [0u8; tcp::MAX_PDU_LEN];
    let mut response_pdu = [0u8; tcp::MAX_PDU_LEN];

    loop {
        let mut mbap = [0u8; tcp::MBAP_HEADER_LEN];
        match socket.read_exact(&mut mbap).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(DataLinkError::Io(err)),
        }

        let header = tcp::MbapHeader::decode(&mut Reader::new(&mbap))?;
        let request_pdu = &mut request_pdu[..header.pdu_len()];
        socket.read_exact(request_pdu).await?;

        let len = match answer(&*service, header.unit_id, request_pdu, &mut response_pdu) {
            Ok(len) => len,
            Err(exception) => {
                let mut w = Writer::new(&mut response_pdu);
                exception.encode(&mut w)?;
                w.as_written().len()
            }
        };
        send_pdu(
            &mut socket,
            header.transaction_id,
            header.unit_id,
            &response_pdu[..len],
        )
        .await?;
    }
}

/// Run one request PDU through `service`, turning every failure into the
/// exception the charger would answer with.
fn answer<S: ModbusService>(
    service: &S,
    unit_id: u8,
    request_pdu: &[u8],
    response_pdu: &mut [u8],
) -> Result<usize, ExceptionResponse> {
    let function_code = request_pdu.first().copied().unwrap_or(0) & 0x7F;
    let reject = |exception_code| ExceptionResponse {
        function_code,
        exception_code,
    };

    let mut reader = Reader::new(request_pdu);
    let request = Request::decode(&mut reader).map_err(|err| reject(exception_for(err)))?;
    if !reader.is_empty() {
        return Err(reject(ExceptionCode::IllegalDataValue));
    }

    debug!(
        unit_id,
        function = function_code,
        "received modbus tcp request"
    );

    match service.handle(unit_id, request, response_pdu) {
        Ok(len) if len == 0 || len > tcp::MAX_PDU_LEN => {
            Err(reject(ExceptionCode::ServerDeviceFailure))
        }
        Ok(len) => Ok(len),
        Err(ServiceError::Exception(code)) => Err(reject(code)),
        Err(ServiceError::InvalidRequest(_)) => Err(reject(ExceptionCode::IllegalDataValue)),
        Err(ServiceError::Internal(reason)) => {
            warn!(reason, "modbus service failed");
            Err(reject(ExceptionCode::ServerDeviceFailure))
        }
    }
}

fn exception_for(err: DecodeError) -> ExceptionCode {
    match err {
        DecodeError::InvalidFunctionCode | DecodeError::UnsupportedFunction(_) => {
            ExceptionCode::IllegalFunction
        }
        DecodeError::InvalidLength
        | DecodeError::InvalidProtocolId(_)
        | DecodeError::InvalidQuantity(_)
        | DecodeError::UnexpectedEof => ExceptionCode::IllegalDataValue,
    }
}

async fn send_pdu(
    socket: &mut TcpStream,
    transaction_id: u16,
    unit_id: u8,
    pdu: &[u8],
) -> Result<(), DataLinkError> {
    let mut frame = [0u8; tcp::MBAP_HEADER_LEN + tcp::MAX_PDU_LEN];
    let mut w = Writer::new(&mut frame);
    tcp::encode_frame(&mut w, transaction_id, unit_id, pdu)?;

    trace!(
        transaction_id,
        unit_id,
        pdu_len = pdu.len(),
        "sending modbus tcp response"
    );
    socket.write_all(w.as_written()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ModbusService, ModbusTcpServer, ServiceError};
    use crate::{DataLink, ModbusTcpTransport};
    use enomod_core::pdu::{ExceptionCode, Request};

    struct FixedVersionService;

    impl ModbusService for FixedVersionService {
        fn handle(
            &self,
            _unit_id: u8,
            request: Request,
            response_pdu: &mut [u8],
        ) -> Result<usize, ServiceError> {
            match request {
                Request::ReadHoldingRegisters(req) if req.start_address == 0 => {
                    let bytes = [0x03u8, 0x04, 0x00, 0x01, 0x00, 0x00];
                    response_pdu[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                _ => Err(ServiceError::Exception(ExceptionCode::IllegalDataAddress)),
            }
        }
    }

    async fn start() -> (ModbusTcpTransport, tokio::task::JoinHandle<()>) {
        let server = ModbusTcpServer::bind("127.0.0.1:0", FixedVersionService)
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let _ = server.run().await;
        });
        (ModbusTcpTransport::new("127.0.0.1", port), task)
    }

    #[tokio::test]
    async fn serves_read_request() {
        let (transport, task) = start().await;
        let mut response = [0u8; 32];
        let len = transport
            .exchange(1, &[0x03, 0x00, 0x00, 0x00, 0x02], &mut response)
            .await
            .unwrap();
        assert_eq!(&response[..len], &[0x03, 0x04, 0x00, 0x01, 0x00, 0x00]);

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn service_exception_is_sent_back() {
        let (transport, task) = start().await;
        let mut response = [0u8; 32];
        let len = transport
            .exchange(1, &[0x03, 0x01, 0x91, 0x00, 0x10], &mut response)
            .await
            .unwrap();
        assert_eq!(&response[..len], &[0x83, 0x02]);

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn unsupported_function_is_illegal_function() {
        let (transport, task) = start().await;
        let mut response = [0u8; 32];
        let len = transport
            .exchange(
                1,
                &[0x10, 0x00, 0x00, 0x00, 0x01, 0x02, 0x12, 0x34],
                &mut response,
            )
            .await
            .unwrap();
        assert_eq!(&response[..len], &[0x90, 0x01]);

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn trailing_request_bytes_are_illegal_data_value() {
        let (transport, task) = start().await;
        let mut response = [0u8; 32];
        let len = transport
            .exchange(1, &[0x06, 0x01, 0x90, 0x00, 0x10, 0xFF], &mut response)
            .await
            .unwrap();
        assert_eq!(&response[..len], &[0x86, 0x03]);

        task.abort();
        let _ = task.await;
    }
}
