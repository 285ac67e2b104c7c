//! Catalogue of the values a charger exposes to a home automation frontend.
//!
//! Each [`EntityDescription`] names one value, the register map it comes
//! from and how to pull it out of a decoded map. Frontends keep a
//! [`Snapshot`] of the latest maps and evaluate descriptions against it.

use crate::{ClientError, DataLink, EnoOneClient};
use enomod_core::registers::{
    is_cable_plugged_in, EmsLimit, RegisterMapKind, RegisterMapValue, State, EMS_LIMIT_MAX,
    EMS_LIMIT_MIN,
};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use Requirement::{Always, EmsControl, HasLoadShedding, HasLock};
use RegisterMapKind::{CurrentOffered, Measurements, Mode3Details, TransactionToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Sensor,
    BinarySensor,
    Number,
}

/// Device feature an entity only makes sense with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Always,
    HasLock,
    HasLoadShedding,
    EmsControl,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceFeatures {
    pub has_lock: bool,
    pub has_load_shedding: bool,
    pub ems_control: bool,
}

impl DeviceFeatures {
    /// Lock and load shedding presence as reported by the charger.
    pub fn from_state(state: &State, ems_control: bool) -> Self {
        Self {
            has_lock: state.has_lock(),
            has_load_shedding: state.is_load_shedding_connected(),
            ems_control,
        }
    }

    pub fn satisfies(&self, requirement: Requirement) -> bool {
        match requirement {
            Requirement::Always => true,
            Requirement::HasLock => self.has_lock,
            Requirement::HasLoadShedding => self.has_load_shedding,
            Requirement::EmsControl => self.ems_control,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityValue {
    Integer(i64),
    Text(String),
    Flag(bool),
}

impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Flag(true) => f.write_str("on"),
            Self::Flag(false) => f.write_str("off"),
        }
    }
}

#[derive(Clone, Copy)]
pub enum Accessor {
    /// Value derived from the source map alone.
    Map(fn(&RegisterMapValue) -> Option<EntityValue>),
    /// Value combining several maps.
    Snapshot(fn(&Snapshot) -> Option<EntityValue>),
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Map(_) => f.write_str("Accessor::Map"),
            Self::Snapshot(_) => f.write_str("Accessor::Snapshot"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberRange {
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct EntityDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub platform: Platform,
    /// Map whose refresh updates this entity.
    pub source: RegisterMapKind,
    pub unit: Option<&'static str>,
    pub requirement: Requirement,
    pub range: Option<NumberRange>,
    pub accessor: Accessor,
}

impl EntityDescription {
    pub fn value(&self, snapshot: &Snapshot) -> Option<EntityValue> {
        match self.accessor {
            Accessor::Map(get) => snapshot.get(self.source).and_then(get),
            Accessor::Snapshot(get) => get(snapshot),
        }
    }

    /// Identifier stable across restarts. Port 1 keeps the bare
    /// `serial_key` form; other ports carry their unit id.
    pub fn unique_id(&self, serial: &str, unit_id: u8) -> String {
        if unit_id == 1 {
            format!("{serial}_{}", self.key)
        } else {
            format!("{serial}_{unit_id}_{}", self.key)
        }
    }
}

/// Latest decoded value of each register map of one port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    values: HashMap<RegisterMapKind, RegisterMapValue>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, replacing the previous value of the same map.
    pub fn update(&mut self, value: RegisterMapValue) {
        self.values.insert(value.kind(), value);
    }

    pub fn get(&self, kind: RegisterMapKind) -> Option<&RegisterMapValue> {
        self.values.get(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

macro_rules! field {
    ($variant:ident, |$m:ident| $value:expr) => {
        Accessor::Map(|value| match value {
            RegisterMapValue::$variant($m) => Some($value),
            _ => None,
        })
    };
}

const fn sensor(
    key: &'static str,
    name: &'static str,
    source: RegisterMapKind,
    unit: Option<&'static str>,
    requirement: Requirement,
    accessor: Accessor,
) -> EntityDescription {
    EntityDescription {
        key,
        name,
        platform: Platform::Sensor,
        source,
        unit,
        requirement,
        range: None,
        accessor,
    }
}

const fn binary(
    key: &'static str,
    name: &'static str,
    source: RegisterMapKind,
    requirement: Requirement,
    accessor: Accessor,
) -> EntityDescription {
    EntityDescription {
        key,
        name,
        platform: Platform::BinarySensor,
        source,
        unit: None,
        requirement,
        range: None,
        accessor,
    }
}

const MA: Option<&str> = Some("mA");
const A: Option<&str> = Some("A");
const V: Option<&str> = Some("V");
const W: Option<&str> = Some("W");
const WH: Option<&str> = Some("Wh");

pub const EMS_LIMIT: EntityDescription = EntityDescription {
    key: "ems_limit",
    name: "EMS limit",
    platform: Platform::Number,
    source: RegisterMapKind::EmsLimit,
    unit: MA,
    requirement: EmsControl,
    range: Some(NumberRange {
        min: EMS_LIMIT_MIN as i32,
        max: EMS_LIMIT_MAX as i32,
    }),
    accessor: field!(EmsLimit, |m| EntityValue::Integer(m.ems_limit.into())),
};

pub static ENTITIES: &[EntityDescription] = &[
    sensor("number_of_phases", "Number of phases", RegisterMapKind::State, None, Always,
        field!(State, |m| EntityValue::Integer(m.number_of_phases.into()))),
    sensor("max_amp_per_phase", "Charger hard max current", RegisterMapKind::State, A, Always,
        field!(State, |m| EntityValue::Integer(m.max_amp_per_phase.into()))),
    sensor("charger_current_l1", "Charger current L1", Measurements, MA, Always,
        field!(Measurements, |m| EntityValue::Integer(m.current_l1.into()))),
    sensor("charger_current_l2", "Charger current L2", Measurements, MA, Always,
        field!(Measurements, |m| EntityValue::Integer(m.current_l2.into()))),
    sensor("charger_current_l3", "Charger current L3", Measurements, MA, Always,
        field!(Measurements, |m| EntityValue::Integer(m.current_l3.into()))),
    sensor("charger_voltage_l1", "Charger voltage L1", Measurements, V, Always,
        field!(Measurements, |m| EntityValue::Integer(m.voltage_l1.into()))),
    sensor("charger_voltage_l2", "Charger voltage L2", Measurements, V, Always,
        field!(Measurements, |m| EntityValue::Integer(m.voltage_l2.into()))),
    sensor("charger_voltage_l3", "Charger voltage L3", Measurements, V, Always,
        field!(Measurements, |m| EntityValue::Integer(m.voltage_l3.into()))),
    sensor("charger_active_power_l1", "Charger active power L1", Measurements, W, Always,
        field!(Measurements, |m| EntityValue::Integer(m.charger_active_power_l1.into()))),
    sensor("charger_active_power_l2", "Charger active power L2", Measurements, W, Always,
        field!(Measurements, |m| EntityValue::Integer(m.charger_active_power_l2.into()))),
    sensor("charger_active_power_l3", "Charger active power L3", Measurements, W, Always,
        field!(Measurements, |m| EntityValue::Integer(m.charger_active_power_l3.into()))),
    sensor("charger_active_power_total", "Charger active power total", Measurements, W, Always,
        field!(Measurements, |m| EntityValue::Integer(m.charger_active_power_total.into()))),
    sensor("active_energy_import_total", "Energy delivered", Measurements, WH, Always,
        field!(Measurements, |m| EntityValue::Integer(m.active_energy_import_total.into()))),
    sensor("installation_current_l1", "Installation current L1", Measurements, MA, HasLoadShedding,
        field!(Measurements, |m| EntityValue::Integer(m.installation_current_l1.into()))),
    sensor("installation_current_l2", "Installation current L2", Measurements, MA, HasLoadShedding,
        field!(Measurements, |m| EntityValue::Integer(m.installation_current_l2.into()))),
    sensor("installation_current_l3", "Installation current L3", Measurements, MA, HasLoadShedding,
        field!(Measurements, |m| EntityValue::Integer(m.installation_current_l3.into()))),
    sensor("charger_pwm", "Charger PWM", Mode3Details, None, Always,
        field!(Mode3Details, |m| EntityValue::Integer(m.pwm.into()))),
    sensor("charger_pwm_as_amp", "Charger PWM as current", Mode3Details, MA, Always,
        field!(Mode3Details, |m| EntityValue::Integer(m.pwm_amp.into()))),
    sensor("charger_cp_plus", "Charger CP+", Mode3Details, None, Always,
        field!(Mode3Details, |m| EntityValue::Integer(m.cp_pos.into()))),
    sensor("charger_cp_min", "Charger CP-", Mode3Details, None, Always,
        field!(Mode3Details, |m| EntityValue::Integer(m.cp_neg.into()))),
    sensor("charger_pp", "Charger PP", Mode3Details, None, HasLock,
        field!(Mode3Details, |m| EntityValue::Integer(m.pp.into()))),
    sensor("mode_3_state", "Mode3 state", Mode3Details, None, Always,
        field!(Mode3Details, |m| EntityValue::Text(m.state_str.clone()))),
    sensor("active_current_offered", "Current offered", CurrentOffered, MA, Always,
        field!(CurrentOffered, |m| EntityValue::Integer(m.active_current_offered.into()))),
    sensor("charger_last_token", "Last scanned token", TransactionToken, None, EmsControl,
        field!(TransactionToken, |m| EntityValue::Text(if m.transaction_token.is_empty() {
            "(none)".to_owned()
        } else {
            m.transaction_token.clone()
        }))),
    binary("charging", "Charging", RegisterMapKind::State, Always,
        field!(State, |m| EntityValue::Flag(m.is_charging()))),
    binary("ocpp_connected", "OCPP connected", RegisterMapKind::State, Always,
        field!(State, |m| EntityValue::Flag(m.is_ocpp_connected()))),
    binary("ev_requesting_power", "EV requesting power", Mode3Details, Always,
        field!(Mode3Details, |m| EntityValue::Flag(m.is_ev_requesting_power()))),
    binary("evse_offering_power", "EVSE offering power", Mode3Details, Always,
        field!(Mode3Details, |m| EntityValue::Flag(m.is_evse_offering_power()))),
    binary("ev_connected", "EV connected", Mode3Details, Always,
        field!(Mode3Details, |m| EntityValue::Flag(m.is_ev_connected()))),
    // Lock device class: on means unlocked.
    binary("lock", "Cable locked", RegisterMapKind::State, HasLock,
        field!(State, |m| EntityValue::Flag(!m.is_locked()))),
    binary("cable_plugged_in", "Cable plugged in", Mode3Details, HasLock,
        Accessor::Snapshot(cable_plugged_in)),
    binary("loadshedding_connected", "Loadshedding device connected", RegisterMapKind::State,
        HasLoadShedding, field!(State, |m| EntityValue::Flag(m.is_load_shedding_connected()))),
    EMS_LIMIT,
];

fn cable_plugged_in(snapshot: &Snapshot) -> Option<EntityValue> {
    let state = match snapshot.get(RegisterMapKind::State)? {
        RegisterMapValue::State(state) => state,
        _ => return None,
    };
    let mode3 = match snapshot.get(Mode3Details)? {
        RegisterMapValue::Mode3Details(mode3) => mode3,
        _ => return None,
    };
    Some(EntityValue::Flag(is_cable_plugged_in(state, mode3)))
}

/// Descriptions applicable to a device with `features`.
pub fn entities_for(features: DeviceFeatures) -> impl Iterator<Item = &'static EntityDescription> {
    ENTITIES
        .iter()
        .filter(move |description| features.satisfies(description.requirement))
}

/// The writable EMS limit of one port.
///
/// Holds the last value read from the charger. A failed write leaves it
/// untouched; a successful one is followed by a fresh read so the value shown
/// is what the charger applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmsLimitNumber {
    value: Option<i16>,
}

impl EmsLimitNumber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(&self) -> &'static EntityDescription {
        &EMS_LIMIT
    }

    pub fn value(&self) -> Option<i16> {
        self.value
    }

    pub fn update(&mut self, limit: &EmsLimit) {
        self.value = Some(limit.ems_limit);
    }

    pub async fn set<D: DataLink>(
        &mut self,
        client: &EnoOneClient<D>,
        milliamps: i16,
    ) -> Result<i16, ClientError> {
        let old = self.value;
        client.set_ems_limit(milliamps).await?;
        let applied = client.fetch::<EmsLimit>().await?;
        self.update(&applied);
        debug!(?old, requested = milliamps, applied = applied.ems_limit, "EMS limit set");
        Ok(applied.ems_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enomod_core::registers::{
        ApiVersion, LedColor, LockState, Mode3Details as Mode3, Mode3State, OcppState,
    };

    fn state(lock_state: LockState, load_shedding: bool) -> State {
        State {
            number_of_phases: 3,
            max_amp_per_phase: 32,
            ocpp_state: OcppState::Accepted,
            load_shedding_state: load_shedding,
            lock_state,
            contactor_state: false,
            led_color: LedColor::Green,
        }
    }

    fn mode3(pp: u16) -> Mode3 {
        Mode3 {
            state_num: Mode3State::B1,
            state_str: "B1".to_owned(),
            pwm_amp: 0,
            pwm: 1000,
            pp,
            cp_pos: 9,
            cp_neg: -12,
        }
    }

    fn find(key: &str) -> &'static EntityDescription {
        ENTITIES.iter().find(|d| d.key == key).unwrap()
    }

    #[test]
    fn keys_are_unique() {
        let mut keys: Vec<_> = ENTITIES.iter().map(|d| d.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), ENTITIES.len());
    }

    #[test]
    fn selection_follows_device_features() {
        let basic: Vec<_> = entities_for(DeviceFeatures::default()).map(|d| d.key).collect();
        assert!(basic.contains(&"charging"));
        assert!(!basic.contains(&"lock"));
        assert!(!basic.contains(&"installation_current_l1"));
        assert!(!basic.contains(&"ems_limit"));
        assert!(!basic.contains(&"charger_last_token"));

        let full = DeviceFeatures {
            has_lock: true,
            has_load_shedding: true,
            ems_control: true,
        };
        assert_eq!(entities_for(full).count(), ENTITIES.len());
    }

    #[test]
    fn features_come_from_state() {
        let features = DeviceFeatures::from_state(&state(LockState::NoLockPresent, true), false);
        assert!(!features.has_lock);
        assert!(features.has_load_shedding);
    }

    #[test]
    fn lock_sensor_reports_unlocked_as_on() {
        let mut snapshot = Snapshot::new();
        snapshot.update(RegisterMapValue::State(state(LockState::Locked, false)));
        assert_eq!(find("lock").value(&snapshot), Some(EntityValue::Flag(false)));

        snapshot.update(RegisterMapValue::State(state(LockState::Unlocked, false)));
        assert_eq!(find("lock").value(&snapshot), Some(EntityValue::Flag(true)));
    }

    #[test]
    fn cable_plugged_in_needs_both_maps() {
        let description = find("cable_plugged_in");
        let mut snapshot = Snapshot::new();
        snapshot.update(RegisterMapValue::State(state(LockState::Unlocked, false)));
        assert_eq!(description.value(&snapshot), None);

        snapshot.update(RegisterMapValue::Mode3Details(mode3(0)));
        assert_eq!(description.value(&snapshot), Some(EntityValue::Flag(false)));

        snapshot.update(RegisterMapValue::Mode3Details(mode3(20)));
        assert_eq!(description.value(&snapshot), Some(EntityValue::Flag(true)));
    }

    #[test]
    fn accessor_ignores_other_maps() {
        let mut snapshot = Snapshot::new();
        snapshot.update(RegisterMapValue::ApiVersion(ApiVersion { major: 1, minor: 0 }));
        assert_eq!(find("number_of_phases").value(&snapshot), None);
    }

    #[test]
    fn empty_token_reads_as_none() {
        let mut snapshot = Snapshot::new();
        snapshot.update(RegisterMapValue::TransactionToken(
            enomod_core::registers::TransactionToken {
                transaction_token: String::new(),
            },
        ));
        assert_eq!(
            find("charger_last_token").value(&snapshot),
            Some(EntityValue::Text("(none)".to_owned()))
        );
    }

    #[test]
    fn ems_limit_number_range_and_ids() {
        assert_eq!(EMS_LIMIT.range, Some(NumberRange { min: -1, max: 32_000 }));
        assert_eq!(EMS_LIMIT.platform, Platform::Number);
        assert_eq!(EMS_LIMIT.unique_id("2403000001", 1), "2403000001_ems_limit");
        assert_eq!(EMS_LIMIT.unique_id("2403000001", 2), "2403000001_2_ems_limit");
    }
}
