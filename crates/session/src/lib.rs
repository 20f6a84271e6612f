//! Upstream-platform sessions: issuance through a [`SessionProvider`] and
//! reuse through the [`SessionCache`].

pub mod cache;
pub mod provider;

pub use cache::{SessionCache, SessionLease};
pub use provider::{
    JwtSessionConfig, JwtSessionProvider, SessionError, SessionKey, SessionProvider,
};
