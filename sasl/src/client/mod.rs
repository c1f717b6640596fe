//! Client-side SASL mechanisms and the catalog used to pick between them.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::common::{Credentials, ScramKeys};

mod catalog;
pub mod mechanisms;

pub use self::catalog::{Catalog, Descriptor};

/// An error emitted by a client mechanism.
#[derive(Debug, PartialEq, Eq)]
pub enum MechanismError {
    /// No username was provided, while the mechanism needs one.
    MissingUsername,
    /// No password or token was provided, while the mechanism needs one.
    MissingPassword,
    /// The cached SCRAM keys do not fit the server parameters and no password is known.
    CachedKeysMismatch,
    /// The system random number generator failed.
    RandomFailure,
    /// The server sent a message which isn't valid UTF-8.
    CannotDecodeChallenge,
    /// The server-first-message didn't contain a nonce.
    NoServerNonce,
    /// The server-first-message didn't contain a usable salt.
    NoServerSalt,
    /// The server-first-message didn't contain an iteration count.
    NoServerIterations,
    /// The server asked for fewer than 4096 iterations.
    InsecureIterationCount(u32),
    /// The server requires an extension we don't know.
    MandatoryExtension,
    /// The server nonce doesn't extend the client nonce.
    NonceMismatch,
    /// The HMAC key had an invalid length.
    InvalidKeyLength,
    /// PBKDF2 key derivation failed.
    Pbkdf2,
    /// The server-final-message didn't contain a signature.
    NoServerSignature,
    /// The server signature didn't match the expected one.
    InvalidServerSignature,
    /// The server reported an error through an `e=` attribute.
    ServerError(String),
    /// The server sent a message at a point the mechanism didn't expect one.
    InvalidState,
}

impl fmt::Display for MechanismError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MechanismError::MissingUsername => write!(fmt, "no username was provided"),
            MechanismError::MissingPassword => write!(fmt, "no password was provided"),
            MechanismError::CachedKeysMismatch => {
                write!(fmt, "cached keys don't match the server parameters")
            }
            MechanismError::RandomFailure => write!(fmt, "failed to generate random data"),
            MechanismError::CannotDecodeChallenge => write!(fmt, "can't decode the challenge"),
            MechanismError::NoServerNonce => write!(fmt, "no server nonce"),
            MechanismError::NoServerSalt => write!(fmt, "no server salt"),
            MechanismError::NoServerIterations => write!(fmt, "no server iterations"),
            MechanismError::InsecureIterationCount(count) => {
                write!(fmt, "insecure iteration count: {}", count)
            }
            MechanismError::MandatoryExtension => {
                write!(fmt, "server requires an unsupported extension")
            }
            MechanismError::NonceMismatch => write!(fmt, "server nonce doesn't match"),
            MechanismError::InvalidKeyLength => write!(fmt, "invalid HMAC key length"),
            MechanismError::Pbkdf2 => write!(fmt, "PBKDF2 derivation failed"),
            MechanismError::NoServerSignature => write!(fmt, "no server signature"),
            MechanismError::InvalidServerSignature => write!(fmt, "invalid server signature"),
            MechanismError::ServerError(error) => write!(fmt, "server error: {}", error),
            MechanismError::InvalidState => write!(fmt, "unexpected message from the server"),
        }
    }
}

impl core::error::Error for MechanismError {}

#[cfg(feature = "scram")]
impl From<getrandom::Error> for MechanismError {
    fn from(_err: getrandom::Error) -> MechanismError {
        MechanismError::RandomFailure
    }
}

/// A trait which defines SASL mechanisms.
pub trait Mechanism {
    /// The name of the mechanism.
    fn name(&self) -> &str;

    /// Creates this mechanism from `Credentials`.
    fn from_credentials(credentials: Credentials) -> Result<Self, MechanismError>
    where
        Self: Sized;

    /// Provides initial payload of the SASL mechanism.
    fn initial(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// Creates a response to the SASL challenge.
    fn response(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        Ok(Vec::new())
    }

    /// Verifies the server success response, if there is one.
    fn success(&mut self, _data: &[u8]) -> Result<(), MechanismError> {
        Ok(())
    }

    /// Keys derived during the exchange, worth caching for the next login.
    fn derived_keys(&self) -> Option<&ScramKeys> {
        None
    }
}
