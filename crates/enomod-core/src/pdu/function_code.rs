use crate::DecodeError;

/// Function codes spoken by the charger. Anything else is refused at decode
/// time rather than passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FunctionCode {
    ReadHoldingRegisters,
    WriteSingleRegister,
}

impl FunctionCode {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::ReadHoldingRegisters => 0x03,
            Self::WriteSingleRegister => 0x06,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        if Self::is_exception(value) {
            return Err(DecodeError::InvalidFunctionCode);
        }
        match value {
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x06 => Ok(Self::WriteSingleRegister),
            other => Err(DecodeError::UnsupportedFunction(other)),
        }
    }

    pub const fn is_exception(value: u8) -> bool {
        (value & 0x80) != 0
    }
}
