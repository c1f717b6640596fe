//! Provides the SASL "SCRAM-*" mechanisms and a way to implement more.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::marker::PhantomData;

use base64::{engine::general_purpose::STANDARD as Base64, Engine};

use crate::client::{Mechanism, MechanismError};
use crate::common::scram::{
    escape_username, generate_nonce, parse_server_first, xor, ScramProvider,
};
use crate::common::{Credentials, ScramKeys, Secret};

enum ScramState {
    Init,
    SentInitial {
        initial_message: Vec<u8>,
        gs2_header: Vec<u8>,
    },
    GotServerData {
        server_signature: Vec<u8>,
    },
    Verified,
}

/// A struct for the SASL SCRAM-* family of mechanisms.
pub struct Scram<S: ScramProvider> {
    name: String,
    username: String,
    secret: Secret,
    client_nonce: String,
    state: ScramState,
    keys: Option<ScramKeys>,
    _marker: PhantomData<S>,
}

impl<S: ScramProvider> Scram<S> {
    /// Constructs a new struct for authenticating using the SASL SCRAM-* mechanisms.
    ///
    /// It is recommended that instead you use a `Credentials` struct and turn it into the
    /// requested mechanism using `from_credentials`.
    pub fn new<N: Into<String>, P: Into<Secret>>(
        username: N,
        secret: P,
    ) -> Result<Scram<S>, MechanismError> {
        Ok(Scram::new_with_nonce(username, secret, generate_nonce()?))
    }

    pub(crate) fn new_with_nonce<N: Into<String>, P: Into<Secret>>(
        username: N,
        secret: P,
        nonce: String,
    ) -> Scram<S> {
        Scram {
            name: format!("SCRAM-{}", S::name()),
            username: username.into(),
            secret: secret.into(),
            client_nonce: nonce,
            state: ScramState::Init,
            keys: None,
            _marker: PhantomData,
        }
    }

    /// Picks cached keys when they fit, otherwise derives new ones from the password.
    fn keys_for(&self, salt: &[u8], iterations: u32) -> Result<(Vec<u8>, Vec<u8>), MechanismError> {
        if let Some(keys) = self.secret.scram_keys() {
            if keys.matches(S::name(), salt, iterations) {
                return Ok((keys.client_key.clone(), keys.server_key.clone()));
            }
        }
        let password = match self.secret.password() {
            Some(password) => password,
            None if self.secret.scram_keys().is_some() => {
                return Err(MechanismError::CachedKeysMismatch)
            }
            None => return Err(MechanismError::MissingPassword),
        };
        let salted_password = S::derive(password.as_bytes(), salt, iterations)?;
        let client_key = S::hmac(b"Client Key", &salted_password)?;
        let server_key = S::hmac(b"Server Key", &salted_password)?;
        Ok((client_key, server_key))
    }

    fn client_final(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        let (initial_message, gs2_header) = match self.state {
            ScramState::SentInitial {
                ref initial_message,
                ref gs2_header,
            } => (initial_message.clone(), gs2_header.clone()),
            _ => return Err(MechanismError::InvalidState),
        };
        let server_first =
            core::str::from_utf8(challenge).map_err(|_| MechanismError::CannotDecodeChallenge)?;
        let frame = parse_server_first(server_first)?;
        if !frame.nonce.starts_with(&self.client_nonce)
            || frame.nonce.len() <= self.client_nonce.len()
        {
            return Err(MechanismError::NonceMismatch);
        }
        let (client_key, server_key) = self.keys_for(&frame.salt, frame.iterations)?;
        let stored_key = S::hash(&client_key);

        let mut client_final_message_bare: Vec<u8> = Vec::new();
        client_final_message_bare.extend(b"c=");
        client_final_message_bare.extend(Base64.encode(&gs2_header).bytes());
        client_final_message_bare.extend(b",r=");
        client_final_message_bare.extend(frame.nonce.bytes());

        let mut auth_message = initial_message;
        auth_message.push(b',');
        auth_message.extend(challenge);
        auth_message.push(b',');
        auth_message.extend(&client_final_message_bare);

        let client_signature = S::hmac(&auth_message, &stored_key)?;
        let client_proof = xor(&client_key, &client_signature);
        let server_signature = S::hmac(&auth_message, &server_key)?;

        let mut client_final = client_final_message_bare;
        client_final.extend(b",p=");
        client_final.extend(Base64.encode(client_proof).bytes());

        self.keys = Some(ScramKeys {
            name: String::from(S::name()),
            salt: frame.salt,
            iterations: frame.iterations,
            client_key,
            server_key,
        });
        self.state = ScramState::GotServerData { server_signature };
        Ok(client_final)
    }

    fn verify(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        let expected = match self.state {
            ScramState::GotServerData {
                ref server_signature,
            } => server_signature.clone(),
            _ => return Err(MechanismError::InvalidState),
        };
        let server_final =
            core::str::from_utf8(data).map_err(|_| MechanismError::CannotDecodeChallenge)?;
        let mut signature = None;
        for attribute in server_final.split(',') {
            match attribute.split_once('=') {
                Some(("v", value)) => {
                    signature = Some(
                        Base64
                            .decode(value)
                            .map_err(|_| MechanismError::InvalidServerSignature)?,
                    )
                }
                Some(("e", value)) => return Err(MechanismError::ServerError(value.into())),
                _ => (),
            }
        }
        match signature {
            Some(signature) if signature == expected => {
                self.state = ScramState::Verified;
                Ok(())
            }
            Some(_) => Err(MechanismError::InvalidServerSignature),
            None => Err(MechanismError::NoServerSignature),
        }
    }
}

impl<S: ScramProvider> Mechanism for Scram<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn from_credentials(credentials: Credentials) -> Result<Scram<S>, MechanismError> {
        let username = credentials
            .username
            .ok_or(MechanismError::MissingUsername)?;
        if credentials.secret.is_none() {
            return Err(MechanismError::MissingPassword);
        }
        Scram::new(username, credentials.secret)
    }

    fn initial(&mut self) -> Vec<u8> {
        let gs2_header = Vec::from(&b"n,,"[..]);
        let mut bare: Vec<u8> = Vec::new();
        bare.extend(b"n=");
        bare.extend(escape_username(&self.username).bytes());
        bare.extend(b",r=");
        bare.extend(self.client_nonce.bytes());
        let mut data = gs2_header.clone();
        data.extend(&bare);
        self.state = ScramState::SentInitial {
            initial_message: bare,
            gs2_header,
        };
        data
    }

    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        match self.state {
            ScramState::SentInitial { .. } => self.client_final(challenge),
            // Some servers send the server-final-message as a last challenge.
            ScramState::GotServerData { .. } => {
                self.verify(challenge)?;
                Ok(Vec::new())
            }
            ScramState::Init | ScramState::Verified => Err(MechanismError::InvalidState),
        }
    }

    fn success(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        match self.state {
            ScramState::Verified if data.is_empty() => Ok(()),
            ScramState::Verified => Err(MechanismError::InvalidState),
            ScramState::GotServerData { .. } => self.verify(data),
            ScramState::Init | ScramState::SentInitial { .. } => Err(MechanismError::InvalidState),
        }
    }

    fn derived_keys(&self) -> Option<&ScramKeys> {
        match self.state {
            ScramState::Verified => self.keys.as_ref(),
            _ => None,
        }
    }
}
