use thiserror::Error;

/// Free-text availability codes understood from the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityCode {
    /// `"true"`
    Available,
    /// `"premium domain"`: purchasable, at non-standard pricing.
    Premium,
    /// `"false"`
    Taken,
    /// `"reserved"`
    Reserved,
    /// `"bad tld"`
    BadTld,
}

impl AvailabilityCode {
    /// Parses a raw oracle code. Surrounding whitespace and ASCII case are ignored.
    pub fn parse(raw: &str) -> Result<Self, UnrecognizedAvailabilityCode> {
        let code = raw.trim().to_ascii_lowercase();
        match code.as_str() {
            "true" => Ok(Self::Available),
            "premium domain" => Ok(Self::Premium),
            "false" => Ok(Self::Taken),
            "reserved" => Ok(Self::Reserved),
            "bad tld" => Ok(Self::BadTld),
            _ => Err(UnrecognizedAvailabilityCode(raw.to_string())),
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self, Self::Available | Self::Premium)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "true",
            Self::Premium => "premium domain",
            Self::Taken => "false",
            Self::Reserved => "reserved",
            Self::BadTld => "bad tld",
        }
    }
}

/// Oracle response that did not match any known availability code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized availability code: {0:?}")]
pub struct UnrecognizedAvailabilityCode(pub String);

/// Decoded answer from one oracle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub code: AvailabilityCode,
    pub available: bool,
}

impl From<AvailabilityCode> for Availability {
    fn from(code: AvailabilityCode) -> Self {
        Self {
            code,
            available: code.is_available(),
        }
    }
}
