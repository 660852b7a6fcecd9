//! Authenticated, encrypted byte streams between AWS IAM roles.
//!
//! Instead of distributing certificates ahead of time, each side proves who
//! it is with a live signed `GetCallerIdentity` request: a signature only
//! the holder of valid IAM credentials can produce, and which STS itself
//! validates when the peer replays it. Connection setup has two phases:
//!
//! 1. **Signed-identity exchange**: each side seals its ephemeral CA
//!    certificate inside a SigV4-signed `GetCallerIdentity` envelope
//!    ([`gci`]). The receiver replays the envelope against STS; a 200
//!    response proves the sender's role identity and binds it to the CA.
//! 2. **Trust-bootstrapped mTLS**: both sides build TLS 1.3 configs that
//!    trust exactly the one CA the peer just proved ownership of, then run
//!    an ordinary mutual-TLS handshake.
//!
//! The result is a [`Connection`] whose [`peer`](Connection::peer) is a
//! verified IAM role ARN.
//!
//! ```no_run
//! use roletls::{Dialer, Role};
//!
//! # async fn run() -> Result<(), roletls::Error> {
//! let server_role = Role::parse("arn:aws:iam::123456789012:role/ServerRole")?;
//! let dialer = Dialer::new(vec![server_role]).await?;
//!
//! let conn = dialer.dial("10.0.0.7:7443").await?;
//! conn.write_all(b"hello").await?;
//! println!("talking to {:?}", conn.peer());
//! # Ok(())
//! # }
//! ```
//!
//! Everything here is per-connection: CAs, leaf certificates, and mask
//! keys are minted fresh for each connection and dropped with it.

pub mod error;
pub mod gci;
pub mod identity;

mod conn;
mod dialer;
mod handshake;
mod listener;
mod tls;

pub use conn::{Connection, PeerMetadata};
pub use dialer::Dialer;
pub use error::{Error, Result};
pub use gci::{
    CallerIdentity, MatchesAny, Region, SigV4Signer, SigV4Verifier, SignedMessage, Signer,
    SourceVerifier, UnverifiedMessage, VerifiedMessage, Verifier,
};
pub use identity::{Arn, AssumedRole, Role, RoleKind};
pub use listener::Listener;
