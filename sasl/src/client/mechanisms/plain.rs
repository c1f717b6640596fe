//! Provides the SASL "PLAIN" mechanism.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::client::{Mechanism, MechanismError};
use crate::common::Credentials;

/// A struct for the SASL PLAIN mechanism.
pub struct Plain {
    authzid: Option<String>,
    username: String,
    password: String,
}

impl Plain {
    /// Constructs a new struct for authenticating using the SASL PLAIN mechanism.
    ///
    /// It is recommended that instead you use a `Credentials` struct and turn it into the
    /// requested mechanism using `from_credentials`.
    pub fn new<N: Into<String>, P: Into<String>>(username: N, password: P) -> Plain {
        Plain {
            authzid: None,
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn from_credentials(credentials: Credentials) -> Result<Plain, MechanismError> {
        let username = credentials
            .username
            .ok_or(MechanismError::MissingUsername)?;
        let password = credentials
            .secret
            .password()
            .ok_or(MechanismError::MissingPassword)?
            .into();
        // The authzid is implied when it is just username@domain.
        let authzid = match (credentials.authzid, credentials.domain) {
            (Some(authzid), Some(domain)) if authzid == format!("{}@{}", username, domain) => None,
            (authzid, _) => authzid,
        };
        Ok(Plain {
            authzid,
            username,
            password,
        })
    }

    fn initial(&mut self) -> Vec<u8> {
        let mut auth: Vec<u8> = Vec::new();
        if let Some(ref authzid) = self.authzid {
            auth.extend(authzid.bytes());
        }
        auth.push(0);
        auth.extend(self.username.bytes());
        auth.push(0);
        auth.extend(self.password.bytes());
        auth
    }
}
