//! Provides a few SASL mechanisms.

#[cfg(feature = "anonymous")]
mod anonymous;
mod external;
mod oauthbearer;
mod plain;
#[cfg(feature = "scram")]
mod scram;
mod xoauth2;

#[cfg(feature = "anonymous")]
pub use self::anonymous::Anonymous;
pub use self::external::External;
pub use self::oauthbearer::OAuthBearer;
pub use self::plain::Plain;
#[cfg(feature = "scram")]
pub use self::scram::Scram;
pub use self::xoauth2::XOAuth2;
