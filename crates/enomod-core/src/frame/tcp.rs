//! MBAP (Modbus Application Protocol) framing for Modbus TCP.

use crate::encoding::{Reader, Writer};
use crate::{DecodeError, EncodeError};

/// Registered Modbus TCP port.
pub const DEFAULT_PORT: u16 = 502;
pub const MBAP_HEADER_LEN: usize = 7;
/// Largest PDU a Modbus TCP frame may carry.
pub const MAX_PDU_LEN: usize = 253;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Unit-id byte plus PDU length.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn pdu_len(&self) -> usize {
        usize::from(self.length).saturating_sub(1)
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_be_u16(self.transaction_id)?;
        w.write_be_u16(self.protocol_id)?;
        w.write_be_u16(self.length)?;
        w.write_u8(self.unit_id)
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let transaction_id = r.read_be_u16()?;
        let protocol_id = r.read_be_u16()?;
        let length = r.read_be_u16()?;
        let unit_id = r.read_u8()?;

        if protocol_id != 0 {
            return Err(DecodeError::InvalidProtocolId(protocol_id));
        }
        if length < 2 || usize::from(length) - 1 > MAX_PDU_LEN {
            return Err(DecodeError::InvalidLength);
        }

        Ok(Self {
            transaction_id,
            protocol_id,
            length,
            unit_id,
        })
    }
}

pub fn encode_frame(
    w: &mut Writer<'_>,
    transaction_id: u16,
    unit_id: u8,
    pdu: &[u8],
) -> Result<(), EncodeError> {
    if pdu.is_empty() || pdu.len() > MAX_PDU_LEN {
        return Err(EncodeError::InvalidLength);
    }
    // Bounded by MAX_PDU_LEN above.
    let length = pdu.len() as u16 + 1;

    MbapHeader {
        transaction_id,
        protocol_id: 0,
        length,
        unit_id,
    }
    .encode(w)?;
    w.write_all(pdu)
}

pub fn decode_frame<'a>(r: &mut Reader<'a>) -> Result<(MbapHeader, &'a [u8]), DecodeError> {
    let header = MbapHeader::decode(r)?;
    let pdu = r.read_exact(header.pdu_len())?;
    Ok((header, pdu))
}

#[cfg(test)]
mod tests {
    use super::{decode_frame, encode_frame, MbapHeader, MAX_PDU_LEN};
    use crate::encoding::{Reader, Writer};
    use crate::{DecodeError, EncodeError};

    #[test]
    fn frames_state_block_read_for_second_port() {
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        encode_frame(&mut w, 7, 2, &[0x03, 0x00, 0x32, 0x00, 0x07]).unwrap();
        assert_eq!(
            w.as_written(),
            &[0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x02, 0x03, 0x00, 0x32, 0x00, 0x07]
        );

        let mut r = Reader::new(w.as_written());
        let (header, pdu) = decode_frame(&mut r).unwrap();
        assert_eq!(
            header,
            MbapHeader {
                transaction_id: 7,
                protocol_id: 0,
                length: 6,
                unit_id: 2,
            }
        );
        assert_eq!(pdu, &[0x03, 0x00, 0x32, 0x00, 0x07]);
    }

    #[test]
    fn rejects_non_zero_protocol_id() {
        let bytes = [0x00, 0x01, 0x00, 0x01, 0x00, 0x02, 0x01, 0x03];
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            decode_frame(&mut r).unwrap_err(),
            DecodeError::InvalidProtocolId(_)
        ));
    }

    #[test]
    fn rejects_lengths_without_a_pdu_or_beyond_the_tcp_limit() {
        let empty = [0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01];
        assert_eq!(
            MbapHeader::decode(&mut Reader::new(&empty)).unwrap_err(),
            DecodeError::InvalidLength
        );

        let huge = [0x00, 0x01, 0x00, 0x00, 0x00, 0xFF, 0x01];
        assert_eq!(
            MbapHeader::decode(&mut Reader::new(&huge)).unwrap_err(),
            DecodeError::InvalidLength
        );
    }

    #[test]
    fn refuses_oversized_pdu() {
        let pdu = [0u8; MAX_PDU_LEN + 1];
        let mut buf = [0u8; 300];
        let mut w = Writer::new(&mut buf);
        assert_eq!(
            encode_frame(&mut w, 1, 1, &pdu).unwrap_err(),
            EncodeError::InvalidLength
        );
    }
}
