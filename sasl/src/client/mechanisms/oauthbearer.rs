//! Provides the SASL "OAUTHBEARER" mechanism, from RFC 7628.

use alloc::string::String;
use alloc::vec::Vec;

use crate::client::{Mechanism, MechanismError};
use crate::common::Credentials;

/// A struct for the SASL OAUTHBEARER mechanism, the password being the bearer token.
pub struct OAuthBearer {
    authzid: Option<String>,
    token: String,
}

impl Mechanism for OAuthBearer {
    fn name(&self) -> &str {
        "OAUTHBEARER"
    }

    fn from_credentials(credentials: Credentials) -> Result<OAuthBearer, MechanismError> {
        let token = credentials
            .secret
            .password()
            .ok_or(MechanismError::MissingPassword)?
            .into();
        let authzid = credentials.username.and(credentials.authzid);
        Ok(OAuthBearer { authzid, token })
    }

    fn initial(&mut self) -> Vec<u8> {
        let mut auth = Vec::from(&b"n,"[..]);
        if let Some(ref authzid) = self.authzid {
            auth.extend(b"a=");
            auth.extend(authzid.bytes());
        }
        auth.push(b',');
        auth.extend(b"\x01auth=Bearer ");
        auth.extend(self.token.bytes());
        auth.extend(b"\x01\x01");
        auth
    }
}
