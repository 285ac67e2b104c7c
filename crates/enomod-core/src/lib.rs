//! Modbus TCP framing and ENO one register map decoding.
//!
//! `enomod-core` contains everything that can be done without I/O: encoding
//! and decoding of the MBAP frame, the two function codes the charger
//! contract needs (FC03 read holding registers, FC06 write single register)
//! plus exception responses, and the typed register maps in [`registers`].

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod encoding;
pub mod error;
pub mod frame;
pub mod pdu;
#[cfg(feature = "alloc")]
pub mod registers;

pub use error::{DecodeError, EncodeError};
#[cfg(feature = "alloc")]
pub use registers::RegisterError;
