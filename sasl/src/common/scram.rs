//! Hash providers and helpers for the SCRAM family of mechanisms.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use getrandom::{getrandom, Error as RngError};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use sha1::{Digest, Sha1 as Sha1_hash};
use sha2::{Sha256 as Sha256_hash, Sha384 as Sha384_hash, Sha512 as Sha512_hash};

use crate::client::MechanismError;

/// Generate a nonce for SCRAM authentication.
pub fn generate_nonce() -> Result<String, RngError> {
    let mut data = [0u8; 16];
    getrandom(&mut data)?;
    Ok(Base64.encode(data))
}

/// A trait which defines the needed methods for SCRAM.
pub trait ScramProvider {
    /// The name of the hash function, as it appears in the mechanism name.
    fn name() -> &'static str;

    /// A function which hashes the data using the hash function.
    fn hash(data: &[u8]) -> Vec<u8>;

    /// A function which performs an HMAC using the hash function.
    fn hmac(data: &[u8], key: &[u8]) -> Result<Vec<u8>, MechanismError>;

    /// A function which does PBKDF2 key derivation using the hash function.
    fn derive(password: &[u8], salt: &[u8], iterations: u32) -> Result<Vec<u8>, MechanismError>;
}

macro_rules! scram_provider {
    ($(#[$meta:meta])* $provider:ident, $hash:ty, $name:literal) => {
        $(#[$meta])*
        pub struct $provider;

        impl ScramProvider for $provider {
            fn name() -> &'static str {
                $name
            }

            fn hash(data: &[u8]) -> Vec<u8> {
                <$hash as Digest>::digest(data).to_vec()
            }

            fn hmac(data: &[u8], key: &[u8]) -> Result<Vec<u8>, MechanismError> {
                let mut mac = <Hmac<$hash> as Mac>::new_from_slice(key)
                    .map_err(|_| MechanismError::InvalidKeyLength)?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }

            fn derive(
                password: &[u8],
                salt: &[u8],
                iterations: u32,
            ) -> Result<Vec<u8>, MechanismError> {
                let mut result = vec![0; <$hash as Digest>::output_size()];
                pbkdf2::<Hmac<$hash>>(password, salt, iterations, &mut result)
                    .map_err(|_| MechanismError::Pbkdf2)?;
                Ok(result)
            }
        }
    };
}

scram_provider!(
    /// A `ScramProvider` which provides SCRAM-SHA-1.
    Sha1,
    Sha1_hash,
    "SHA-1"
);
scram_provider!(
    /// A `ScramProvider` which provides SCRAM-SHA-256.
    Sha256,
    Sha256_hash,
    "SHA-256"
);
scram_provider!(
    /// A `ScramProvider` which provides SCRAM-SHA-384.
    Sha384,
    Sha384_hash,
    "SHA-384"
);
scram_provider!(
    /// A `ScramProvider` which provides SCRAM-SHA-512.
    Sha512,
    Sha512_hash,
    "SHA-512"
);

/// XORs two byte strings of the same length.
pub(crate) fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(a, b)| a ^ b).collect()
}

/// Escapes a username into a `saslname`, as in RFC 5802 section 5.1.
pub(crate) fn escape_username(username: &str) -> String {
    let mut escaped = String::with_capacity(username.len());
    for c in username.chars() {
        match c {
            '=' => escaped.push_str("=3D"),
            ',' => escaped.push_str("=2C"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// The attributes of a server-first-message.
#[derive(Debug, PartialEq)]
pub(crate) struct ServerFirst<'a> {
    pub nonce: &'a str,
    pub salt: Vec<u8>,
    pub iterations: u32,
}

/// Parses a server-first-message, refusing weak iteration counts and mandatory extensions.
pub(crate) fn parse_server_first(message: &str) -> Result<ServerFirst<'_>, MechanismError> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;
    for attribute in message.split(',') {
        let Some((key, value)) = attribute.split_once('=') else {
            continue;
        };
        match key {
            "r" => nonce = Some(value),
            "s" => {
                salt = Some(
                    Base64
                        .decode(value)
                        .map_err(|_| MechanismError::NoServerSalt)?,
                )
            }
            "i" => {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| MechanismError::NoServerIterations)?,
                )
            }
            "m" => return Err(MechanismError::MandatoryExtension),
            _ => (),
        }
    }
    let iterations = iterations.ok_or(MechanismError::NoServerIterations)?;
    if iterations < 4096 {
        return Err(MechanismError::InsecureIterationCount(iterations));
    }
    let salt = match salt {
        Some(salt) if !salt.is_empty() => salt,
        _ => return Err(MechanismError::NoServerSalt),
    };
    let nonce = nonce.ok_or(MechanismError::NoServerNonce)?;
    Ok(ServerFirst {
        nonce,
        salt,
        iterations,
    })
}
