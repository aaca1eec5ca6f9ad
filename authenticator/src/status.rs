use thiserror::Error;

pub const CTAP2_OK: u8 = 0x00;

/// CTAP status codes this command can report.  The discriminant is the byte
/// placed in front of the response on the wire.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
#[repr(u8)]
pub enum Ctap2Error {
    #[error("invalid command")]
    InvalidCommand = 0x01,
    #[error("invalid parameter")]
    InvalidParameter = 0x02,
    #[error("invalid length")]
    InvalidLength = 0x03,
    #[error("unexpected CBOR type")]
    UnexpectedType = 0x11,
    #[error("invalid CBOR encoding")]
    InvalidEncoding = 0x12,
    #[error("missing parameter")]
    MissingParameter = 0x14,
    #[error("processing error")]
    Processing = 0x21,
    #[error("unsupported option")]
    UnsupportedOption = 0x2B,
    #[error("operation not allowed")]
    NotAllowed = 0x30,
    #[error("pinUvAuth invalid")]
    PinAuthInvalid = 0x33,
    #[error("invalid subcommand")]
    InvalidSubcommand = 0x3E,
}

impl Ctap2Error {
    pub const fn status(self) -> u8 {
        self as u8
    }

    pub const fn from_status(status: u8) -> Option<Self> {
        Some(match status {
            0x01 => Self::InvalidCommand,
            0x02 => Self::InvalidParameter,
            0x03 => Self::InvalidLength,
            0x11 => Self::UnexpectedType,
            0x12 => Self::InvalidEncoding,
            0x14 => Self::MissingParameter,
            0x21 => Self::Processing,
            0x2B => Self::UnsupportedOption,
            0x30 => Self::NotAllowed,
            0x33 => Self::PinAuthInvalid,
            0x3E => Self::InvalidSubcommand,
            _ => return None,
        })
    }
}

impl From<Ctap2Error> for u8 {
    fn from(err: Ctap2Error) -> Self {
        err.status()
    }
}

pub type Result<T> = core::result::Result<T, Ctap2Error>;
