use core::fmt;

/// A PDU or MBAP frame could not be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EncodeError {
    /// Output buffer shorter than the frame.
    BufferTooSmall,
    ValueOutOfRange,
    InvalidLength,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => f.write_str("output buffer too small for frame"),
            Self::ValueOutOfRange => f.write_str("field value out of range"),
            Self::InvalidLength => f.write_str("payload length not encodable"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncodeError {}

/// Bytes received from the charger (or a client of the simulator) did not
/// form a valid frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DecodeError {
    UnexpectedEof,
    /// Function byte 0 or an exception byte where a request was expected.
    InvalidFunctionCode,
    /// Valid Modbus function the charger contract does not use.
    UnsupportedFunction(u8),
    InvalidLength,
    /// MBAP protocol identifier other than 0.
    InvalidProtocolId(u16),
    /// Register quantity outside 1..=125.
    InvalidQuantity(u16),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => f.write_str("frame ended early"),
            Self::InvalidFunctionCode => f.write_str("invalid function code"),
            Self::UnsupportedFunction(code) => write!(f, "unsupported function code 0x{code:02X}"),
            Self::InvalidLength => f.write_str("length field does not match payload"),
            Self::InvalidProtocolId(id) => write!(f, "not a Modbus frame (protocol id {id})"),
            Self::InvalidQuantity(quantity) => write!(f, "register quantity {quantity} out of range"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}
