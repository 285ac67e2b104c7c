use crate::encoding::{Reader, Writer};
use crate::pdu::request::MAX_READ_REGISTERS;
use crate::pdu::{ExceptionResponse, FunctionCode};
use crate::{DecodeError, EncodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadHoldingRegistersResponse<'a> {
    pub data: &'a [u8],
}

impl<'a> ReadHoldingRegistersResponse<'a> {
    fn decode_body(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let byte_count = usize::from(r.read_u8()?);
        if byte_count == 0
            || byte_count % 2 != 0
            || byte_count > usize::from(MAX_READ_REGISTERS) * 2
        {
            return Err(DecodeError::InvalidLength);
        }
        let data = r.read_exact(byte_count)?;
        Ok(Self { data })
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        if self.data.is_empty() || self.data.len() % 2 != 0 {
            return Err(EncodeError::InvalidLength);
        }
        let byte_count: u8 = self
            .data
            .len()
            .try_into()
            .map_err(|_| EncodeError::ValueOutOfRange)?;
        w.write_u8(FunctionCode::ReadHoldingRegisters.as_u8())?;
        w.write_u8(byte_count)?;
        w.write_all(self.data)
    }

    pub fn register_count(&self) -> usize {
        self.data.len() / 2
    }

    pub fn register(&self, index: usize) -> Option<u16> {
        let offset = index.checked_mul(2)?;
        let bytes = self.data.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn registers(&self) -> impl Iterator<Item = u16> + 'a {
        self.data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    }
}

/// FC06 echo of the written address and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleRegisterResponse {
    pub address: u16,
    pub value: u16,
}

impl WriteSingleRegisterResponse {
    fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let address = r.read_be_u16()?;
        let value = r.read_be_u16()?;
        Ok(Self { address, value })
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(FunctionCode::WriteSingleRegister.as_u8())?;
        w.write_be_u16(self.address)?;
        w.write_be_u16(self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'a> {
    ReadHoldingRegisters(ReadHoldingRegistersResponse<'a>),
    WriteSingleRegister(WriteSingleRegisterResponse),
    Exception(ExceptionResponse),
}

impl<'a> Response<'a> {
    pub fn decode(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let function_byte = r.read_u8()?;
        if FunctionCode::is_exception(function_byte) {
            return Ok(Self::Exception(ExceptionResponse::decode(function_byte, r)?));
        }

        match FunctionCode::from_u8(function_byte)? {
            FunctionCode::ReadHoldingRegisters => Ok(Self::ReadHoldingRegisters(
                ReadHoldingRegistersResponse::decode_body(r)?,
            )),
            FunctionCode::WriteSingleRegister => Ok(Self::WriteSingleRegister(
                WriteSingleRegisterResponse::decode_body(r)?,
            )),
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::ReadHoldingRegisters(resp) => resp.encode(w),
            Self::WriteSingleRegister(resp) => resp.encode(w),
            Self::Exception(resp) => resp.encode(w),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ReadHoldingRegistersResponse, Response, WriteSingleRegisterResponse};
    use crate::encoding::Reader;
    use crate::pdu::{ExceptionCode, ExceptionResponse};
    use crate::DecodeError;

    #[test]
    fn api_version_response_exposes_words() {
        let bytes = [0x03, 0x04, 0x00, 0x01, 0x00, 0x02];
        let mut r = Reader::new(&bytes);
        match Response::decode(&mut r).unwrap() {
            Response::ReadHoldingRegisters(resp) => {
                assert_eq!(resp.register_count(), 2);
                assert_eq!(resp.register(1), Some(2));
                assert_eq!(resp.register(2), None);
                assert_eq!(resp.registers().collect::<Vec<_>>(), vec![1, 2]);
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(r.is_empty());
    }

    #[test]
    fn odd_byte_count_is_rejected() {
        let mut r = Reader::new(&[0x03, 0x03, 0x00, 0x01, 0x00]);
        assert_eq!(Response::decode(&mut r).unwrap_err(), DecodeError::InvalidLength);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut r = Reader::new(&[0x03, 0x04, 0x00, 0x01]);
        assert_eq!(Response::decode(&mut r).unwrap_err(), DecodeError::UnexpectedEof);
    }

    #[test]
    fn write_echo_decodes() {
        let mut r = Reader::new(&[0x06, 0x01, 0x90, 0x3E, 0x80]);
        assert_eq!(
            Response::decode(&mut r).unwrap(),
            Response::WriteSingleRegister(WriteSingleRegisterResponse {
                address: 400,
                value: 16000,
            })
        );
    }

    #[test]
    fn exception_decodes_for_any_function() {
        let mut r = Reader::new(&[0x83, 0x02]);
        assert_eq!(
            Response::decode(&mut r).unwrap(),
            Response::Exception(ExceptionResponse {
                function_code: 0x03,
                exception_code: ExceptionCode::IllegalDataAddress,
            })
        );
    }

    #[test]
    fn encode_rejects_empty_register_payload() {
        let mut buf = [0u8; 4];
        let mut w = crate::encoding::Writer::new(&mut buf);
        assert!(ReadHoldingRegistersResponse { data: &[] }.encode(&mut w).is_err());
    }
}
