use core::time::Duration;

use super::maps::{
    ApiVersion, CurrentOffered, Diagnostics, EmsLimit, Measurements, Mode3Details, RegisterMap,
    State, TransactionToken,
};
use super::RegisterError;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// The closed set of register maps exposed by the charger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegisterMapKind {
    ApiVersion,
    State,
    Measurements,
    Mode3Details,
    CurrentOffered,
    EmsLimit,
    TransactionToken,
    Diagnostics,
}

impl RegisterMapKind {
    pub const ALL: [Self; 8] = [
        Self::ApiVersion,
        Self::State,
        Self::Measurements,
        Self::Mode3Details,
        Self::CurrentOffered,
        Self::EmsLimit,
        Self::TransactionToken,
        Self::Diagnostics,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::ApiVersion => "ApiVersion",
            Self::State => "State",
            Self::Measurements => "Measurements",
            Self::Mode3Details => "Mode3Details",
            Self::CurrentOffered => "CurrentOffered",
            Self::EmsLimit => "EmsLimit",
            Self::TransactionToken => "TransactionToken",
            Self::Diagnostics => "Diagnostics",
        }
    }

    /// First holding register of the block.
    pub const fn address(self) -> u16 {
        match self {
            Self::ApiVersion => 0,
            Self::State => 50,
            Self::Measurements => 200,
            Self::Mode3Details => 300,
            Self::CurrentOffered => 303,
            Self::EmsLimit => 400,
            Self::TransactionToken => 401,
            Self::Diagnostics => 5000,
        }
    }

    pub const fn word_count(self) -> u16 {
        match self {
            Self::ApiVersion => 2,
            Self::State => 7,
            Self::Measurements => 18,
            Self::Mode3Details => 8,
            Self::CurrentOffered => 1,
            Self::EmsLimit => 1,
            Self::TransactionToken => 16,
            Self::Diagnostics => 80,
        }
    }

    pub const fn refresh_interval(self) -> Duration {
        match self {
            Self::ApiVersion | Self::Diagnostics => DAY,
            Self::TransactionToken => MINUTE,
            Self::Mode3Details | Self::State | Self::EmsLimit => Duration::from_secs(10),
            Self::Measurements | Self::CurrentOffered => SECOND,
        }
    }

    /// The token registers are only readable with EMS control enabled on the
    /// charger; other maps are always readable.
    pub const fn requires_ems_control(self) -> bool {
        matches!(self, Self::TransactionToken)
    }

    /// Maps worth polling for a device, given its EMS control setting.
    pub fn polled(ems_control: bool) -> impl Iterator<Item = Self> {
        Self::ALL
            .into_iter()
            .filter(move |kind| ems_control || !kind.requires_ems_control())
    }
}

impl core::fmt::Display for RegisterMapKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded register map of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegisterMapValue {
    ApiVersion(ApiVersion),
    State(State),
    Measurements(Measurements),
    Mode3Details(Mode3Details),
    CurrentOffered(CurrentOffered),
    EmsLimit(EmsLimit),
    TransactionToken(TransactionToken),
    Diagnostics(Diagnostics),
}

impl RegisterMapValue {
    pub fn decode(kind: RegisterMapKind, words: &[u16]) -> Result<Self, RegisterError> {
        Ok(match kind {
            RegisterMapKind::ApiVersion => ApiVersion::decode(words)?.into_value(),
            RegisterMapKind::State => State::decode(words)?.into_value(),
            RegisterMapKind::Measurements => Measurements::decode(words)?.into_value(),
            RegisterMapKind::Mode3Details => Mode3Details::decode(words)?.into_value(),
            RegisterMapKind::CurrentOffered => CurrentOffered::decode(words)?.into_value(),
            RegisterMapKind::EmsLimit => EmsLimit::decode(words)?.into_value(),
            RegisterMapKind::TransactionToken => TransactionToken::decode(words)?.into_value(),
            RegisterMapKind::Diagnostics => Diagnostics::decode(words)?.into_value(),
        })
    }

    pub fn kind(&self) -> RegisterMapKind {
        match self {
            Self::ApiVersion(_) => RegisterMapKind::ApiVersion,
            Self::State(_) => RegisterMapKind::State,
            Self::Measurements(_) => RegisterMapKind::Measurements,
            Self::Mode3Details(_) => RegisterMapKind::Mode3Details,
            Self::CurrentOffered(_) => RegisterMapKind::CurrentOffered,
            Self::EmsLimit(_) => RegisterMapKind::EmsLimit,
            Self::TransactionToken(_) => RegisterMapKind::TransactionToken,
            Self::Diagnostics(_) => RegisterMapKind::Diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::MAX_READ_REGISTERS;

    #[test]
    fn every_map_fits_in_one_read() {
        for kind in RegisterMapKind::ALL {
            assert!(kind.word_count() >= 1, "{kind}");
            assert!(kind.word_count() <= MAX_READ_REGISTERS, "{kind}");
            assert!(kind.address().checked_add(kind.word_count()).is_some());
        }
    }

    #[test]
    fn refresh_intervals_follow_volatility() {
        assert_eq!(RegisterMapKind::ApiVersion.refresh_interval(), DAY);
        assert_eq!(RegisterMapKind::Diagnostics.refresh_interval(), DAY);
        assert_eq!(RegisterMapKind::TransactionToken.refresh_interval(), MINUTE);
        assert_eq!(
            RegisterMapKind::EmsLimit.refresh_interval(),
            Duration::from_secs(10)
        );
        assert_eq!(RegisterMapKind::Measurements.refresh_interval(), SECOND);
        assert_eq!(State::REFRESH_INTERVAL, Duration::from_secs(10));
    }

    #[test]
    fn token_is_only_polled_with_ems_control() {
        assert!(!RegisterMapKind::polled(false).any(|k| k == RegisterMapKind::TransactionToken));
        assert!(RegisterMapKind::polled(true).any(|k| k == RegisterMapKind::TransactionToken));
        assert_eq!(RegisterMapKind::polled(false).count(), 7);
        assert_eq!(RegisterMapKind::polled(true).count(), 8);
    }

    #[test]
    fn decode_by_kind_tags_the_value() {
        let value = RegisterMapValue::decode(RegisterMapKind::EmsLimit, &[16000]).unwrap();
        assert_eq!(value, RegisterMapValue::EmsLimit(EmsLimit { ems_limit: 16000 }));
        assert_eq!(value.kind(), RegisterMapKind::EmsLimit);
    }

    #[test]
    fn decode_by_kind_checks_length() {
        assert!(RegisterMapValue::decode(RegisterMapKind::State, &[0; 6]).is_err());
    }
}
