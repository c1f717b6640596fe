//! Provides the SASL "EXTERNAL" mechanism.

use alloc::string::String;
use alloc::vec::Vec;

use crate::client::{Mechanism, MechanismError};
use crate::common::Credentials;

/// A struct for the SASL EXTERNAL mechanism, where the identity comes from the
/// underlying channel, typically a client certificate.
pub struct External {
    authzid: Option<String>,
}

impl Mechanism for External {
    fn name(&self) -> &str {
        "EXTERNAL"
    }

    fn from_credentials(credentials: Credentials) -> Result<External, MechanismError> {
        // Requesting the identity we authenticate as is the same as requesting none.
        let authzid = match credentials.authzid {
            Some(authzid) if credentials.username.as_deref() != Some(authzid.as_str()) => {
                Some(authzid)
            }
            _ => None,
        };
        Ok(External { authzid })
    }

    fn initial(&mut self) -> Vec<u8> {
        self.authzid
            .as_ref()
            .map(|authzid| authzid.as_bytes().to_vec())
            .unwrap_or_default()
    }
}
