use crate::{ModbusService, ServiceError};
use enomod_core::encoding::Writer;
use enomod_core::pdu::{ExceptionCode, FunctionCode, Request};
use enomod_core::registers::{
    LedColor, LockState, Mode3State, OcppState, RegisterMapKind, EMS_LIMIT_MAX, EMS_LIMIT_MIN,
    EMS_LIMIT_NONE,
};
use enomod_core::EncodeError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// One past the last register of the diagnostics block.
const REGISTER_SPACE: usize = 5080;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank {
    values: Vec<u16>,
}

impl RegisterBank {
    pub fn new(size: usize) -> Self {
        Self {
            values: vec![0u16; size],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u16> {
        self.values.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: u16) -> Result<(), ServiceError> {
        let slot = self
            .values
            .get_mut(index)
            .ok_or(ServiceError::InvalidRequest("register address out of range"))?;
        *slot = value;
        Ok(())
    }

    pub fn set_words(&mut self, start: usize, words: &[u16]) -> Result<(), ServiceError> {
        let slots = start
            .checked_add(words.len())
            .and_then(|end| self.values.get_mut(start..end))
            .ok_or(ServiceError::InvalidRequest("register range out of range"))?;
        slots.copy_from_slice(words);
        Ok(())
    }

    fn slice(&self, start: u16, quantity: u16) -> Option<&[u16]> {
        let start = usize::from(start);
        let end = start.checked_add(usize::from(quantity))?;
        if quantity == 0 {
            return None;
        }
        self.values.get(start..end)
    }
}

/// Pack ASCII text into `words` registers, two characters per register, NUL padded.
pub fn encode_string(text: &str, words: usize) -> Vec<u16> {
    let mut bytes: Vec<u8> = text.bytes().take(words * 2).collect();
    bytes.resize(words * 2, 0);
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// In-memory ENO one charger serving the device register layout.
///
/// Holds one register bank per unit id: unit 1, plus unit 2 for a dual-port
/// charger. With EMS control disabled the transaction token block answers
/// with an illegal data address exception, like the real device.
#[derive(Debug)]
pub struct SimulatedCharger {
    units: RwLock<BTreeMap<u8, RegisterBank>>,
    ems_control: AtomicBool,
    requests: AtomicU64,
}

impl SimulatedCharger {
    pub fn new(dual_port: bool, ems_control: bool) -> Self {
        let mut units = BTreeMap::new();
        let ports: &[u8] = if dual_port { &[1, 2] } else { &[1] };
        for &unit_id in ports {
            units.insert(unit_id, default_bank(unit_id));
        }
        Self {
            units: RwLock::new(units),
            ems_control: AtomicBool::new(ems_control),
            requests: AtomicU64::new(0),
        }
    }

    pub fn unit_ids(&self) -> Vec<u8> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn set_ems_control(&self, enabled: bool) {
        self.ems_control.store(enabled, Ordering::Relaxed);
    }

    pub fn ems_control(&self) -> bool {
        self.ems_control.load(Ordering::Relaxed)
    }

    /// Number of requests handled so far, across all units.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn register(&self, unit_id: u8, address: u16) -> Option<u16> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&unit_id)?
            .get(usize::from(address))
    }

    pub fn set_register(&self, unit_id: u8, address: u16, value: u16) -> Result<(), ServiceError> {
        self.set_words(unit_id, address, &[value])
    }

    pub fn set_words(&self, unit_id: u8, address: u16, words: &[u16]) -> Result<(), ServiceError> {
        self.units
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&unit_id)
            .ok_or(ServiceError::InvalidRequest("unknown unit id"))?
            .set_words(usize::from(address), words)
    }

    pub fn set_transaction_token(&self, unit_id: u8, token: &str) -> Result<(), ServiceError> {
        let kind = RegisterMapKind::TransactionToken;
        let words = encode_string(token, usize::from(kind.word_count()));
        self.set_words(unit_id, kind.address(), &words)
    }

    /// Move the Mode 3 state machine, keeping the offered current and the
    /// contactor consistent with it.
    pub fn set_mode3(
        &self,
        unit_id: u8,
        state: Mode3State,
        offered_milliamps: u16,
    ) -> Result<(), ServiceError> {
        let digit = match state {
            Mode3State::E | Mode3State::F => 0,
            _ => b'1' + (state.code() % 2) as u8,
        };
        let label = [state.letter() as u8, digit];
        let offered = if state.letter() == 'A' { 0 } else { offered_milliamps };
        let charging = u16::from(state.letter() == 'C');

        self.set_words(
            unit_id,
            RegisterMapKind::Mode3Details.address(),
            &[state.code(), u16::from_be_bytes(label), 0, offered],
        )?;
        self.set_register(unit_id, RegisterMapKind::State.address() + 5, charging)
    }

    fn read(&self, unit_id: u8, start: u16, quantity: u16, out: &mut Writer<'_>) -> Result<(), ServiceError> {
        if !self.ems_control() && overlaps_token(start, quantity) {
            return Err(ServiceError::Exception(ExceptionCode::IllegalDataAddress));
        }

        let units = self.units.read().unwrap_or_else(PoisonError::into_inner);
        let words = units
            .get(&unit_id)
            .and_then(|bank| bank.slice(start, quantity))
            .ok_or(ServiceError::Exception(ExceptionCode::IllegalDataAddress))?;
        let byte_count = u8::try_from(words.len() * 2)
            .map_err(|_| ServiceError::Internal("register response too large"))?;

        out.write_u8(FunctionCode::ReadHoldingRegisters.as_u8())
            .map_err(map_encode)?;
        out.write_u8(byte_count).map_err(map_encode)?;
        out.write_registers(words).map_err(map_encode)
    }

    fn write(&self, unit_id: u8, address: u16, value: u16, out: &mut Writer<'_>) -> Result<(), ServiceError> {
        if address != RegisterMapKind::EmsLimit.address() {
            return Err(ServiceError::Exception(ExceptionCode::IllegalDataAddress));
        }
        let limit = value as i16;
        if !(EMS_LIMIT_MIN..=EMS_LIMIT_MAX).contains(&limit) {
            return Err(ServiceError::Exception(ExceptionCode::IllegalDataValue));
        }

        self.units
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&unit_id)
            .ok_or(ServiceError::Exception(ExceptionCode::IllegalDataAddress))?
            .set(usize::from(address), value)?;

        out.write_u8(FunctionCode::WriteSingleRegister.as_u8())
            .map_err(map_encode)?;
        out.write_be_u16(address).map_err(map_encode)?;
        out.write_be_u16(value).map_err(map_encode)
    }
}

impl Default for SimulatedCharger {
    fn default() -> Self {
        Self::new(false, false)
    }
}

impl ModbusService for SimulatedCharger {
    fn handle(
        &self,
        unit_id: u8,
        request: Request,
        response_pdu: &mut [u8],
    ) -> Result<usize, ServiceError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let mut w = Writer::new(response_pdu);
        match request {
            Request::ReadHoldingRegisters(req) => {
                self.read(unit_id, req.start_address, req.quantity, &mut w)?
            }
            Request::WriteSingleRegister(req) => self.write(unit_id, req.address, req.value, &mut w)?,
        }
        Ok(w.position())
    }
}

fn overlaps_token(start: u16, quantity: u16) -> bool {
    let kind = RegisterMapKind::TransactionToken;
    let token = u32::from(kind.address())..u32::from(kind.address()) + u32::from(kind.word_count());
    let end = u32::from(start) + u32::from(quantity);
    u32::from(start) < token.end && token.start < end
}

fn default_bank(unit_id: u8) -> RegisterBank {
    let mut bank = RegisterBank::new(REGISTER_SPACE);
    let mut put = |kind: RegisterMapKind, words: &[u16]| {
        let _ = bank.set_words(usize::from(kind.address()), words);
    };

    put(RegisterMapKind::ApiVersion, &[1, 0]);
    put(
        RegisterMapKind::State,
        &[
            3,
            32,
            OcppState::Accepted.code(),
            0,
            LockState::Unlocked.code(),
            0,
            LedColor::Green.code(),
        ],
    );
    put(
        RegisterMapKind::Measurements,
        &[
            0, 0, 0, // currents
            230, 231, 229, // voltages
            0, 0, 0, 0, // power
            0, 0, 0, 0, 0, 0, // installation currents
            0, 12_345, // energy
        ],
    );
    put(
        RegisterMapKind::Mode3Details,
        &[Mode3State::A1.code(), u16::from_be_bytes(*b"A1"), 0, 0, 1000, 0, 12, 12],
    );
    put(RegisterMapKind::EmsLimit, &[EMS_LIMIT_NONE as u16]);

    let mut diagnostics = Vec::with_capacity(80);
    let serial = format!("24030{unit_id:05}");
    for text in ["Enovates", "eNovates", serial.as_str(), "ENO-ONE-22", "1.8.3"] {
        diagnostics.extend(encode_string(text, 16));
    }
    put(RegisterMapKind::Diagnostics, &diagnostics);
    bank
}

fn map_encode(err: EncodeError) -> ServiceError {
    let msg = match err {
        EncodeError::BufferTooSmall => "response buffer too small",
        EncodeError::ValueOutOfRange => "response value out of range",
        EncodeError::InvalidLength => "response length invalid",
    };
    ServiceError::Internal(msg)
}

#[cfg(test)]
mod tests {
    use super::{encode_string, SimulatedCharger};
    use crate::{ModbusService, ServiceError};
    use enomod_core::encoding::Reader;
    use enomod_core::pdu::{
        ExceptionCode, ReadHoldingRegistersRequest, Request, Response, WriteSingleRegisterRequest,
    };
    use enomod_core::registers::{
        Diagnostics, Mode3Details, Mode3State, RegisterMap, RegisterMapKind, State,
    };

    fn read(sim: &SimulatedCharger, unit_id: u8, kind: RegisterMapKind) -> Result<Vec<u16>, ServiceError> {
        let mut pdu = [0u8; 253];
        let request = Request::ReadHoldingRegisters(ReadHoldingRegistersRequest {
            start_address: kind.address(),
            quantity: kind.word_count(),
        });
        let len = sim.handle(unit_id, request, &mut pdu)?;
        match Response::decode(&mut Reader::new(&pdu[..len])) {
            Ok(Response::ReadHoldingRegisters(resp)) => Ok(resp.registers().collect()),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    fn write(sim: &SimulatedCharger, address: u16, value: u16) -> Result<usize, ServiceError> {
        let mut pdu = [0u8; 8];
        let request = Request::WriteSingleRegister(WriteSingleRegisterRequest { address, value });
        sim.handle(1, request, &mut pdu)
    }

    #[test]
    fn serves_decodable_default_maps() {
        let sim = SimulatedCharger::new(true, true);
        for kind in RegisterMapKind::ALL {
            for unit in [1, 2] {
                let words = read(&sim, unit, kind).unwrap();
                assert_eq!(words.len(), usize::from(kind.word_count()));
            }
        }
        let diag = Diagnostics::decode(&read(&sim, 2, RegisterMapKind::Diagnostics).unwrap()).unwrap();
        assert_eq!(diag.manufacturer, "Enovates");
        assert_eq!(diag.serial_nr, "2403000002");
        assert!(State::decode(&read(&sim, 1, RegisterMapKind::State).unwrap()).is_ok());
    }

    #[test]
    fn token_block_needs_ems_control() {
        let sim = SimulatedCharger::new(false, false);
        assert!(matches!(
            read(&sim, 1, RegisterMapKind::TransactionToken),
            Err(ServiceError::Exception(ExceptionCode::IllegalDataAddress))
        ));
        assert!(read(&sim, 1, RegisterMapKind::EmsLimit).is_ok());

        sim.set_ems_control(true);
        sim.set_transaction_token(1, "04A1B2C3").unwrap();
        let words = read(&sim, 1, RegisterMapKind::TransactionToken).unwrap();
        assert_eq!(words[..4], encode_string("04A1B2C3", 4)[..]);
    }

    #[test]
    fn only_the_ems_limit_is_writable() {
        let sim = SimulatedCharger::default();
        assert_eq!(write(&sim, 400, 16000).unwrap(), 5);
        assert_eq!(sim.register(1, 400), Some(16000));
        assert_eq!(write(&sim, 400, 0xFFFF).unwrap(), 5);

        assert!(matches!(
            write(&sim, 50, 1),
            Err(ServiceError::Exception(ExceptionCode::IllegalDataAddress))
        ));
        assert!(matches!(
            write(&sim, 400, 32001),
            Err(ServiceError::Exception(ExceptionCode::IllegalDataValue))
        ));
        assert!(matches!(
            write(&sim, 400, 0xFFFE),
            Err(ServiceError::Exception(ExceptionCode::IllegalDataValue))
        ));
    }

    #[test]
    fn unknown_unit_is_rejected() {
        let sim = SimulatedCharger::new(false, false);
        assert!(read(&sim, 2, RegisterMapKind::ApiVersion).is_err());
        assert_eq!(sim.unit_ids(), vec![1]);
    }

    #[test]
    fn mode3_transitions_update_related_registers() {
        let sim = SimulatedCharger::default();
        sim.set_mode3(1, Mode3State::C2, 16000).unwrap();

        let mode3 = Mode3Details::decode(&read(&sim, 1, RegisterMapKind::Mode3Details).unwrap()).unwrap();
        assert_eq!(mode3.state_num, Mode3State::C2);
        assert_eq!(mode3.state_str, "C2");
        assert!(mode3.is_evse_offering_power());

        let state = State::decode(&read(&sim, 1, RegisterMapKind::State).unwrap()).unwrap();
        assert!(state.is_charging());
        assert_eq!(
            read(&sim, 1, RegisterMapKind::CurrentOffered).unwrap(),
            vec![16000]
        );

        sim.set_mode3(1, Mode3State::A1, 16000).unwrap();
        let mode3 = Mode3Details::decode(&read(&sim, 1, RegisterMapKind::Mode3Details).unwrap()).unwrap();
        assert!(!mode3.is_ev_connected());
        assert!(!mode3.is_evse_offering_power());
    }
}
