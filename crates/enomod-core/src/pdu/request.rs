use crate::encoding::{Reader, Writer};
use crate::pdu::FunctionCode;
use crate::{DecodeError, EncodeError};

/// Largest FC03 quantity allowed by the protocol.
pub const MAX_READ_REGISTERS: u16 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadHoldingRegistersRequest {
    pub start_address: u16,
    pub quantity: u16,
}

impl ReadHoldingRegistersRequest {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        if self.quantity == 0 || self.quantity > MAX_READ_REGISTERS {
            return Err(EncodeError::ValueOutOfRange);
        }
        if self.start_address.checked_add(self.quantity - 1).is_none() {
            return Err(EncodeError::ValueOutOfRange);
        }
        w.write_u8(FunctionCode::ReadHoldingRegisters.as_u8())?;
        w.write_be_u16(self.start_address)?;
        w.write_be_u16(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleRegisterRequest {
    pub address: u16,
    pub value: u16,
}

impl WriteSingleRegisterRequest {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(FunctionCode::WriteSingleRegister.as_u8())?;
        w.write_be_u16(self.address)?;
        w.write_be_u16(self.value)
    }
}

/// Requests issued by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    ReadHoldingRegisters(ReadHoldingRegistersRequest),
    WriteSingleRegister(WriteSingleRegisterRequest),
}

impl Request {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::ReadHoldingRegisters(req) => req.encode(w),
            Self::WriteSingleRegister(req) => req.encode(w),
        }
    }

    pub fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Self::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
        }
    }

    /// Decode a request PDU, as done by the simulator.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match FunctionCode::from_u8(r.read_u8()?)? {
            FunctionCode::ReadHoldingRegisters => {
                let start_address = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                if quantity == 0 || quantity > MAX_READ_REGISTERS {
                    return Err(DecodeError::InvalidQuantity(quantity));
                }
                Ok(Self::ReadHoldingRegisters(ReadHoldingRegistersRequest {
                    start_address,
                    quantity,
                }))
            }
            FunctionCode::WriteSingleRegister => {
                let address = r.read_be_u16()?;
                let value = r.read_be_u16()?;
                Ok(Self::WriteSingleRegister(WriteSingleRegisterRequest {
                    address,
                    value,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ReadHoldingRegistersRequest, Request, WriteSingleRegisterRequest};
    use crate::encoding::{Reader, Writer};
    use crate::{DecodeError, EncodeError};

    #[test]
    fn encodes_diagnostics_read() {
        let req = Request::ReadHoldingRegisters(ReadHoldingRegistersRequest {
            start_address: 5000,
            quantity: 80,
        });
        let mut buf = [0u8; 5];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w).unwrap();
        assert_eq!(w.as_written(), &[0x03, 0x13, 0x88, 0x00, 0x50]);
    }

    #[test]
    fn rejects_quantities_outside_protocol_bounds() {
        let mut buf = [0u8; 5];
        for quantity in [0, 126] {
            let mut w = Writer::new(&mut buf);
            let req = ReadHoldingRegistersRequest {
                start_address: 0,
                quantity,
            };
            assert_eq!(req.encode(&mut w).unwrap_err(), EncodeError::ValueOutOfRange);
        }

        let mut w = Writer::new(&mut buf);
        let wraps = ReadHoldingRegistersRequest {
            start_address: u16::MAX,
            quantity: 2,
        };
        assert_eq!(wraps.encode(&mut w).unwrap_err(), EncodeError::ValueOutOfRange);
    }

    #[test]
    fn decodes_ems_limit_write() {
        let mut r = Reader::new(&[0x06, 0x01, 0x90, 0xFF, 0xFF]);
        assert_eq!(
            Request::decode(&mut r).unwrap(),
            Request::WriteSingleRegister(WriteSingleRegisterRequest {
                address: 400,
                value: 0xFFFF,
            })
        );
    }

    #[test]
    fn decode_refuses_other_function_codes() {
        let mut r = Reader::new(&[0x10, 0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x00]);
        assert_eq!(
            Request::decode(&mut r).unwrap_err(),
            DecodeError::UnsupportedFunction(0x10)
        );
    }
}
