//! Signed `GetCallerIdentity` exchange.
//!
//! A [`Signer`] turns a payload into a [`SignedMessage`]: a replayable STS
//! `GetCallerIdentity` request whose body is that payload, signed with the
//! local IAM credentials. A [`Verifier`] proves who produced such a message
//! by replaying it against STS; a 200 response is the proof, and the
//! attested caller identity is then checked against a
//! [`SourceVerifier`] policy.

pub mod masker;
pub mod message;
pub mod regions;
mod sign;
mod source;
mod verify;

pub use message::{CallerIdentity, SignedMessage, UnverifiedMessage, VerifiedMessage};
pub use regions::Region;
pub use sign::SigV4Signer;
pub use source::{AllOf, AnyOf, MatchesAny, SourceVerifier};
pub use verify::SigV4Verifier;

use async_trait::async_trait;

use crate::error::Error;

/// Produces signed messages binding a payload to the caller's IAM identity.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, payload: &[u8]) -> Result<SignedMessage, Error>;
}

/// Replays signed messages against STS and enforces a source policy.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, message: UnverifiedMessage) -> Result<VerifiedMessage, Error>;
}
