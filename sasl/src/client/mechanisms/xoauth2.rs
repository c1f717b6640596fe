//! Provides the SASL "X-OAUTH2" mechanism used by some servers.

use alloc::string::String;
use alloc::vec::Vec;

use crate::client::{Mechanism, MechanismError};
use crate::common::Credentials;

/// A struct for the SASL X-OAUTH2 mechanism.
pub struct XOAuth2 {
    authzid: Option<String>,
    token: String,
}

impl Mechanism for XOAuth2 {
    fn name(&self) -> &str {
        "X-OAUTH2"
    }

    fn from_credentials(credentials: Credentials) -> Result<XOAuth2, MechanismError> {
        let token = credentials
            .secret
            .password()
            .ok_or(MechanismError::MissingPassword)?
            .into();
        let authzid = credentials.username.and(credentials.authzid);
        Ok(XOAuth2 { authzid, token })
    }

    fn initial(&mut self) -> Vec<u8> {
        let mut auth: Vec<u8> = Vec::new();
        auth.push(0);
        if let Some(ref authzid) = self.authzid {
            auth.extend(authzid.bytes());
        }
        auth.push(0);
        auth.extend(self.token.bytes());
        auth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_separated() {
        let creds = Credentials::default()
            .with_username("user")
            .with_authzid("user@example.org")
            .with_password("token");
        let mut mechanism = XOAuth2::from_credentials(creds).unwrap();
        assert_eq!(mechanism.initial(), b"\0user@example.org\0token");
    }
}
