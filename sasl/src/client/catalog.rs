use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::client::mechanisms::{External, OAuthBearer, Plain, XOAuth2};
use crate::client::{Mechanism, MechanismError};
use crate::common::Credentials;

#[cfg(feature = "anonymous")]
use crate::client::mechanisms::Anonymous;
#[cfg(feature = "scram")]
use crate::client::mechanisms::Scram;
#[cfg(feature = "scram")]
use crate::common::scram::{Sha1, Sha256, Sha384, Sha512};

type Factory =
    dyn Fn(Credentials) -> Result<Box<dyn Mechanism + Send>, MechanismError> + Send + Sync;
type Predicate = dyn Fn(&Credentials) -> bool + Send + Sync;

/// Everything needed to offer a mechanism during negotiation.
#[derive(Clone)]
pub struct Descriptor {
    /// The mechanism name, as advertised by the server.
    pub name: String,
    /// Higher priorities are tried first.
    pub priority: i32,
    /// Whether the first message goes along with the `<auth/>` element.
    pub client_first: bool,
    test: Arc<Predicate>,
    factory: Arc<Factory>,
}

impl Descriptor {
    /// Describes a mechanism built through `M::from_credentials`, usable whenever `test` accepts.
    pub fn new<M, T>(name: &str, priority: i32, client_first: bool, test: T) -> Descriptor
    where
        M: Mechanism + Send + 'static,
        T: Fn(&Credentials) -> bool + Send + Sync + 'static,
    {
        Descriptor::with_factory(name, priority, client_first, test, |credentials| {
            Ok(Box::new(M::from_credentials(credentials)?) as Box<dyn Mechanism + Send>)
        })
    }

    /// Describes a mechanism built by an arbitrary factory.
    pub fn with_factory<T, F>(
        name: &str,
        priority: i32,
        client_first: bool,
        test: T,
        factory: F,
    ) -> Descriptor
    where
        T: Fn(&Credentials) -> bool + Send + Sync + 'static,
        F: Fn(Credentials) -> Result<Box<dyn Mechanism + Send>, MechanismError>
            + Send
            + Sync
            + 'static,
    {
        Descriptor {
            name: String::from(name),
            priority,
            client_first,
            test: Arc::new(test),
            factory: Arc::new(factory),
        }
    }

    /// Whether this mechanism can work with these credentials.
    pub fn test(&self, credentials: &Credentials) -> bool {
        (self.test)(credentials)
    }

    /// Instantiates the mechanism.
    pub fn build(
        &self,
        credentials: Credentials,
    ) -> Result<Box<dyn Mechanism + Send>, MechanismError> {
        (self.factory)(credentials)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("client_first", &self.client_first)
            .finish_non_exhaustive()
    }
}

fn has_username(credentials: &Credentials) -> bool {
    credentials.username.is_some()
}

/// The set of mechanisms a client is willing to use.
#[derive(Clone, Debug)]
pub struct Catalog {
    mechanisms: Vec<Descriptor>,
}

impl Default for Catalog {
    fn default() -> Catalog {
        let mut catalog = Catalog::empty();
        #[cfg(feature = "scram")]
        {
            catalog.register(Descriptor::new::<Scram<Sha512>, _>(
                "SCRAM-SHA-512",
                72,
                true,
                has_username,
            ));
            catalog.register(Descriptor::new::<Scram<Sha384>, _>(
                "SCRAM-SHA-384",
                71,
                true,
                has_username,
            ));
            catalog.register(Descriptor::new::<Scram<Sha256>, _>(
                "SCRAM-SHA-256",
                70,
                true,
                has_username,
            ));
            catalog.register(Descriptor::new::<Scram<Sha1>, _>(
                "SCRAM-SHA-1",
                60,
                true,
                has_username,
            ));
        }
        catalog.register(Descriptor::new::<Plain, _>("PLAIN", 50, true, has_username));
        catalog.register(Descriptor::new::<OAuthBearer, _>(
            "OAUTHBEARER",
            40,
            true,
            |credentials: &Credentials| credentials.secret.password().is_some(),
        ));
        catalog.register(Descriptor::new::<XOAuth2, _>(
            "X-OAUTH2",
            30,
            true,
            |_: &Credentials| true,
        ));
        #[cfg(feature = "anonymous")]
        catalog.register(Descriptor::new::<Anonymous, _>(
            "ANONYMOUS",
            20,
            false,
            |credentials: &Credentials| credentials.username.is_none(),
        ));
        catalog.register(Descriptor::new::<External, _>(
            "EXTERNAL",
            10,
            true,
            |_: &Credentials| true,
        ));
        catalog
    }
}

impl Catalog {
    /// A catalog without any mechanism.
    pub fn empty() -> Catalog {
        Catalog {
            mechanisms: Vec::new(),
        }
    }

    /// Adds a mechanism, replacing any previous one of the same name.
    pub fn register(&mut self, descriptor: Descriptor) {
        match self
            .mechanisms
            .iter_mut()
            .find(|known| known.name == descriptor.name)
        {
            Some(known) => *known = descriptor,
            None => self.mechanisms.push(descriptor),
        }
    }

    /// Removes a mechanism by name.
    pub fn remove(&mut self, name: &str) -> Option<Descriptor> {
        let index = self.mechanisms.iter().position(|known| known.name == name)?;
        Some(self.mechanisms.remove(index))
    }

    /// Keeps only the named mechanisms.
    pub fn retain_names<S: AsRef<str>>(&mut self, names: &[S]) {
        self.mechanisms
            .retain(|known| names.iter().any(|name| name.as_ref() == known.name));
    }

    /// Changes the priority of a known mechanism, returning false if it isn't known.
    pub fn set_priority(&mut self, name: &str, priority: i32) -> bool {
        match self.mechanisms.iter_mut().find(|known| known.name == name) {
            Some(known) => {
                known.priority = priority;
                true
            }
            None => false,
        }
    }

    /// Looks up a mechanism by name.
    pub fn get(&self, name: &str) -> Option<&Descriptor> {
        self.mechanisms.iter().find(|known| known.name == name)
    }

    /// The names of all known mechanisms.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.mechanisms.iter().map(|known| known.name.as_str())
    }

    /// The known mechanisms among those `offered`, highest priority first.
    pub fn matching<I, S>(&self, offered: I) -> Vec<&Descriptor>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matching: Vec<&Descriptor> = Vec::new();
        for name in offered {
            if let Some(known) = self.get(name.as_ref()) {
                if !matching.iter().any(|m| m.name == known.name) {
                    matching.push(known);
                }
            }
        }
        matching.sort_by(|a, b| b.priority.cmp(&a.priority));
        matching
    }

    /// The best offered mechanism these credentials can use.
    pub fn select<I, S>(&self, offered: I, credentials: &Credentials) -> Option<&Descriptor>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.matching(offered)
            .into_iter()
            .find(|descriptor| descriptor.test(credentials))
    }
}
