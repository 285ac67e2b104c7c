//! Typed register maps of the ENO one Modbus interface.
//!
//! Every map is a contiguous block of holding registers read in one FC03
//! request and decoded into an immutable value. The closed set of maps is
//! mirrored by [`RegisterMapKind`] (layout and refresh policy) and
//! [`RegisterMapValue`] (decoded value), so callers that work with "any map"
//! never need dynamic dispatch.

mod codec;
mod error;
mod kind;
mod maps;

pub use codec::{decode_string, int16, int32, uint32, WordReader};
pub use error::RegisterError;
pub use kind::{RegisterMapKind, RegisterMapValue};
pub use maps::{
    is_cable_plugged_in, ApiVersion, CurrentOffered, Diagnostics, EmsLimit, LedColor, LockState,
    Measurements, Mode3Details, Mode3State, OcppState, RegisterMap, State, TransactionToken,
    EMS_LIMIT_MAX, EMS_LIMIT_MIN, EMS_LIMIT_NONE, SUPPORTED_API_MAJOR,
};
