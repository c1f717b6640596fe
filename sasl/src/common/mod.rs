//! Provides the credential types shared by all mechanisms.

use alloc::string::String;
use alloc::vec::Vec;

#[cfg(feature = "scram")]
pub mod scram;

/// SCRAM keys derived during a previous exchange.
///
/// Caching them lets a later login skip the PBKDF2 step, and lets a client
/// authenticate without keeping the plaintext password around.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScramKeys {
    /// The hash function name, such as `SHA-256`.
    pub name: String,
    /// The salt the keys were derived with.
    pub salt: Vec<u8>,
    /// The iteration count the keys were derived with.
    pub iterations: u32,
    /// `HMAC(SaltedPassword, "Client Key")`.
    pub client_key: Vec<u8>,
    /// `HMAC(SaltedPassword, "Server Key")`.
    pub server_key: Vec<u8>,
}

impl ScramKeys {
    /// Whether these keys can be reused for a server offering `salt` and `iterations`.
    pub fn matches(&self, name: &str, salt: &[u8], iterations: u32) -> bool {
        self.name == name && self.salt == salt && self.iterations == iterations
    }
}

/// A secret used to authenticate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Secret {
    /// No secret was provided.
    None,
    /// A plaintext password, or a bearer token for the OAuth mechanisms.
    Password(String),
    /// Cached SCRAM keys, optionally with the password they came from.
    ScramKeys {
        /// The cached keys.
        keys: ScramKeys,
        /// The password, to derive new keys when the server changed its salt.
        password: Option<String>,
    },
}

impl Secret {
    /// Returns the plaintext password, if one is known.
    pub fn password(&self) -> Option<&str> {
        match self {
            Secret::None => None,
            Secret::Password(password) => Some(password),
            Secret::ScramKeys { password, .. } => password.as_deref(),
        }
    }

    /// Returns the cached SCRAM keys, if any.
    pub fn scram_keys(&self) -> Option<&ScramKeys> {
        match self {
            Secret::ScramKeys { keys, .. } => Some(keys),
            _ => None,
        }
    }

    /// Whether no secret at all is available.
    pub fn is_none(&self) -> bool {
        matches!(self, Secret::None)
    }
}

impl From<String> for Secret {
    fn from(password: String) -> Secret {
        Secret::Password(password)
    }
}

impl From<&str> for Secret {
    fn from(password: &str) -> Secret {
        Secret::Password(String::from(password))
    }
}

impl From<ScramKeys> for Secret {
    fn from(keys: ScramKeys) -> Secret {
        Secret::ScramKeys {
            keys,
            password: None,
        }
    }
}

/// A struct containing SASL credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// The authentication identity (authcid).
    pub username: Option<String>,
    /// The authorization identity (authzid), usually the bare JID.
    pub authzid: Option<String>,
    /// The domain being authenticated against.
    pub domain: Option<String>,
    /// The secret used to authenticate.
    pub secret: Secret,
}

impl Default for Credentials {
    fn default() -> Credentials {
        Credentials {
            username: None,
            authzid: None,
            domain: None,
            secret: Secret::None,
        }
    }
}

impl Credentials {
    /// Creates a new Credentials with the specified username.
    pub fn with_username<N: Into<String>>(mut self, username: N) -> Credentials {
        self.username = Some(username.into());
        self
    }

    /// Creates a new Credentials with the specified authorization identity.
    pub fn with_authzid<N: Into<String>>(mut self, authzid: N) -> Credentials {
        self.authzid = Some(authzid.into());
        self
    }

    /// Creates a new Credentials with the specified domain.
    pub fn with_domain<N: Into<String>>(mut self, domain: N) -> Credentials {
        self.domain = Some(domain.into());
        self
    }

    /// Creates a new Credentials with the specified plaintext password.
    pub fn with_password<P: Into<String>>(mut self, password: P) -> Credentials {
        self.secret = Secret::Password(password.into());
        self
    }

    /// Creates a new Credentials with the specified secret.
    pub fn with_secret<S: Into<Secret>>(mut self, secret: S) -> Credentials {
        self.secret = secret.into();
        self
    }
}
