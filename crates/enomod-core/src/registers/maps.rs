use alloc::string::String;
use core::time::Duration;

use super::codec::WordReader;
use super::{RegisterError, RegisterMapKind, RegisterMapValue};

/// API major version this crate understands.
pub const SUPPORTED_API_MAJOR: u16 = 1;

/// EMS limit value meaning "no limit applied".
pub const EMS_LIMIT_NONE: i16 = -1;
pub const EMS_LIMIT_MIN: i16 = EMS_LIMIT_NONE;
/// Upper bound of the EMS limit, in milliamps.
pub const EMS_LIMIT_MAX: i16 = 32_000;

/// A block of holding registers decoded into one value.
pub trait RegisterMap: Sized {
    const KIND: RegisterMapKind;
    const REFRESH_INTERVAL: Duration = Self::KIND.refresh_interval();

    fn decode(words: &[u16]) -> Result<Self, RegisterError>;

    fn into_value(self) -> RegisterMapValue;

    fn from_value(value: RegisterMapValue) -> Option<Self>;

    fn address() -> u16 {
        Self::KIND.address()
    }

    fn word_count() -> u16 {
        Self::KIND.word_count()
    }
}

fn reader<'a>(kind: RegisterMapKind, words: &'a [u16]) -> Result<WordReader<'a>, RegisterError> {
    WordReader::new(kind.name(), usize::from(kind.word_count()), words)
}

macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $($(#[$vmeta:meta])* $variant:ident = $code:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const fn code(self) -> u16 {
                match self {
                    $(Self::$variant => $code),+
                }
            }

            pub fn from_code(code: u16) -> Result<Self, RegisterError> {
                match code {
                    $($code => Ok(Self::$variant),)+
                    code => Err(RegisterError::UnknownCode { field: $field, code }),
                }
            }
        }
    };
}

code_enum! {
    /// Connector lock of a socketed charger.
    LockState, "lock state" {
        Unlocked = 0,
        Locked = 1,
        /// Fixed cable, no socket lock.
        NoLockPresent = 2,
    }
}

code_enum! {
    LedColor, "LED color" {
        Off = 0,
        Red = 1,
        Green = 2,
        Blue = 3,
        Cyan = 4,
        Yellow = 5,
        Pink = 6,
        White = 7,
        Orange = 8,
        Purple = 9,
    }
}

code_enum! {
    /// OCPP back-office registration. Chargers without OCPP report `Accepted`.
    OcppState, "OCPP state" {
        NotAccepted = 0,
        Accepted = 1,
    }
}

code_enum! {
    /// IEC 61851 Mode 3 control pilot state.
    Mode3State, "Mode3 state" {
        A1 = 0,
        A2 = 1,
        B1 = 2,
        B2 = 3,
        C1 = 4,
        C2 = 5,
        D1 = 6,
        D2 = 7,
        E = 8,
        F = 9,
    }
}

impl Mode3State {
    /// State letter without the PWM digit.
    pub const fn letter(self) -> char {
        match self {
            Self::A1 | Self::A2 => 'A',
            Self::B1 | Self::B2 => 'B',
            Self::C1 | Self::C2 => 'C',
            Self::D1 | Self::D2 => 'D',
            Self::E => 'E',
            Self::F => 'F',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ApiVersion {
    pub major: u16,
    pub minor: u16,
}

impl ApiVersion {
    pub fn is_supported(&self) -> bool {
        self.major == SUPPORTED_API_MAJOR
    }
}

impl RegisterMap for ApiVersion {
    const KIND: RegisterMapKind = RegisterMapKind::ApiVersion;

    fn decode(words: &[u16]) -> Result<Self, RegisterError> {
        let mut r = reader(Self::KIND, words)?;
        Ok(Self {
            major: r.u16(),
            minor: r.u16(),
        })
    }

    fn into_value(self) -> RegisterMapValue {
        RegisterMapValue::ApiVersion(self)
    }

    fn from_value(value: RegisterMapValue) -> Option<Self> {
        match value {
            RegisterMapValue::ApiVersion(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct State {
    pub number_of_phases: u16,
    /// Hardware current limit per phase, in amps.
    pub max_amp_per_phase: u16,
    pub ocpp_state: OcppState,
    /// A load-shedding device is configured.
    pub load_shedding_state: bool,
    pub lock_state: LockState,
    pub contactor_state: bool,
    pub led_color: LedColor,
}

impl State {
    pub fn is_locked(&self) -> bool {
        self.lock_state == LockState::Locked
    }

    /// Socketed charger, as opposed to a fixed cable.
    pub fn has_lock(&self) -> bool {
        self.lock_state != LockState::NoLockPresent
    }

    pub fn is_charging(&self) -> bool {
        self.contactor_state
    }

    pub fn is_ocpp_connected(&self) -> bool {
        self.ocpp_state == OcppState::Accepted
    }

    pub fn is_load_shedding_connected(&self) -> bool {
        self.load_shedding_state
    }
}

impl RegisterMap for State {
    const KIND: RegisterMapKind = RegisterMapKind::State;

    fn decode(words: &[u16]) -> Result<Self, RegisterError> {
        let mut r = reader(Self::KIND, words)?;
        Ok(Self {
            number_of_phases: r.u16(),
            max_amp_per_phase: r.u16(),
            ocpp_state: OcppState::from_code(r.u16())?,
            load_shedding_state: r.flag("loadshedding state")?,
            lock_state: LockState::from_code(r.u16())?,
            contactor_state: r.flag("contactor state")?,
            led_color: LedColor::from_code(r.u16())?,
        })
    }

    fn into_value(self) -> RegisterMapValue {
        RegisterMapValue::State(self)
    }

    fn from_value(value: RegisterMapValue) -> Option<Self> {
        match value {
            RegisterMapValue::State(v) => Some(v),
            _ => None,
        }
    }
}

/// Live electrical measurements. Currents in mA, voltages in V, power in W,
/// energy in Wh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Measurements {
    pub current_l1: u16,
    pub current_l2: u16,
    pub current_l3: u16,
    pub voltage_l1: i16,
    pub voltage_l2: i16,
    pub voltage_l3: i16,
    pub charger_active_power_total: u16,
    pub charger_active_power_l1: u16,
    pub charger_active_power_l2: u16,
    pub charger_active_power_l3: u16,
    /// Grid connection currents, reported by the load-shedding meter.
    pub installation_current_l1: i32,
    pub installation_current_l2: i32,
    pub installation_current_l3: i32,
    pub active_energy_import_total: u32,
}

impl RegisterMap for Measurements {
    const KIND: RegisterMapKind = RegisterMapKind::Measurements;

    fn decode(words: &[u16]) -> Result<Self, RegisterError> {
        let mut r = reader(Self::KIND, words)?;
        Ok(Self {
            current_l1: r.u16(),
            current_l2: r.u16(),
            current_l3: r.u16(),
            voltage_l1: r.i16(),
            voltage_l2: r.i16(),
            voltage_l3: r.i16(),
            charger_active_power_total: r.u16(),
            charger_active_power_l1: r.u16(),
            charger_active_power_l2: r.u16(),
            charger_active_power_l3: r.u16(),
            installation_current_l1: r.i32(),
            installation_current_l2: r.i32(),
            installation_current_l3: r.i32(),
            active_energy_import_total: r.u32(),
        })
    }

    fn into_value(self) -> RegisterMapValue {
        RegisterMapValue::Measurements(self)
    }

    fn from_value(value: RegisterMapValue) -> Option<Self> {
        match value {
            RegisterMapValue::Measurements(v) => Some(v),
            _ => None,
        }
    }
}

/// Mode 3 state and control pilot / proximity pilot readings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mode3Details {
    pub state_num: Mode3State,
    /// State as reported in text by the charger, e.g. `"B2"`.
    pub state_str: String,
    /// Current advertised through the PWM duty cycle, in mA.
    pub pwm_amp: u16,
    pub pwm: u16,
    pub pp: u16,
    pub cp_pos: u16,
    pub cp_neg: i16,
}

impl Mode3Details {
    /// State letter taken from the charger's own label, not from the code
    /// word. `None` when the label is empty.
    pub fn state_letter(&self) -> Option<char> {
        self.state_str.chars().next()
    }

    pub fn is_ev_connected(&self) -> bool {
        matches!(self.state_letter(), Some(letter) if letter != 'A')
    }

    pub fn is_ev_requesting_power(&self) -> bool {
        self.state_letter() == Some('C')
    }

    pub fn is_evse_offering_power(&self) -> bool {
        self.pwm_amp > 0
    }
}

impl RegisterMap for Mode3Details {
    const KIND: RegisterMapKind = RegisterMapKind::Mode3Details;

    fn decode(words: &[u16]) -> Result<Self, RegisterError> {
        let mut r = reader(Self::KIND, words)?;
        let state_num = Mode3State::from_code(r.u16())?;
        let state_str = r.string(1);
        r.skip(1);
        Ok(Self {
            state_num,
            state_str,
            pwm_amp: r.u16(),
            pwm: r.u16(),
            pp: r.u16(),
            cp_pos: r.u16(),
            cp_neg: r.i16(),
        })
    }

    fn into_value(self) -> RegisterMapValue {
        RegisterMapValue::Mode3Details(self)
    }

    fn from_value(value: RegisterMapValue) -> Option<Self> {
        match value {
            RegisterMapValue::Mode3Details(v) => Some(v),
            _ => None,
        }
    }
}

/// Whether a cable is plugged into the charger.
///
/// Fixed-cable chargers always report plugged in; socketed ones use the
/// proximity pilot.
pub fn is_cable_plugged_in(state: &State, mode3: &Mode3Details) -> bool {
    !state.has_lock() || mode3.pp > 0
}

/// Current the charger currently offers to the EV, in mA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CurrentOffered {
    pub active_current_offered: u16,
}

impl RegisterMap for CurrentOffered {
    const KIND: RegisterMapKind = RegisterMapKind::CurrentOffered;

    fn decode(words: &[u16]) -> Result<Self, RegisterError> {
        let mut r = reader(Self::KIND, words)?;
        Ok(Self {
            active_current_offered: r.u16(),
        })
    }

    fn into_value(self) -> RegisterMapValue {
        RegisterMapValue::CurrentOffered(self)
    }

    fn from_value(value: RegisterMapValue) -> Option<Self> {
        match value {
            RegisterMapValue::CurrentOffered(v) => Some(v),
            _ => None,
        }
    }
}

/// Soft current limit applied by an energy management system, in mA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmsLimit {
    pub ems_limit: i16,
}

impl EmsLimit {
    pub fn is_limited(&self) -> bool {
        self.ems_limit != EMS_LIMIT_NONE
    }
}

impl RegisterMap for EmsLimit {
    const KIND: RegisterMapKind = RegisterMapKind::EmsLimit;

    fn decode(words: &[u16]) -> Result<Self, RegisterError> {
        let mut r = reader(Self::KIND, words)?;
        Ok(Self { ems_limit: r.i16() })
    }

    fn into_value(self) -> RegisterMapValue {
        RegisterMapValue::EmsLimit(self)
    }

    fn from_value(value: RegisterMapValue) -> Option<Self> {
        match value {
            RegisterMapValue::EmsLimit(v) => Some(v),
            _ => None,
        }
    }
}

/// Last RFID token presented to the charger. Only readable with EMS control
/// enabled on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransactionToken {
    pub transaction_token: String,
}

impl RegisterMap for TransactionToken {
    const KIND: RegisterMapKind = RegisterMapKind::TransactionToken;

    fn decode(words: &[u16]) -> Result<Self, RegisterError> {
        let mut r = reader(Self::KIND, words)?;
        Ok(Self {
            transaction_token: r.string(16),
        })
    }

    fn into_value(self) -> RegisterMapValue {
        RegisterMapValue::TransactionToken(self)
    }

    fn from_value(value: RegisterMapValue) -> Option<Self> {
        match value {
            RegisterMapValue::TransactionToken(v) => Some(v),
            _ => None,
        }
    }
}

/// Device identity strings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostics {
    pub manufacturer: String,
    pub vendor_id: String,
    pub serial_nr: String,
    pub model_id: String,
    pub firmware_version: String,
}

impl RegisterMap for Diagnostics {
    const KIND: RegisterMapKind = RegisterMapKind::Diagnostics;

    fn decode(words: &[u16]) -> Result<Self, RegisterError> {
        let mut r = reader(Self::KIND, words)?;
        Ok(Self {
            manufacturer: r.string(16),
            vendor_id: r.string(16),
            serial_nr: r.string(16),
            model_id: r.string(16),
            firmware_version: r.string(16),
        })
    }

    fn into_value(self) -> RegisterMapValue {
        RegisterMapValue::Diagnostics(self)
    }

    fn from_value(value: RegisterMapValue) -> Option<Self> {
        match value {
            RegisterMapValue::Diagnostics(v) => Some(v),
            _ => None,
        }
    }
}
