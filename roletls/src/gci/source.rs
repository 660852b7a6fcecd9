//! Policies deciding whether a verified caller is an acceptable peer.

use crate::error::Error;
use crate::identity::{AssumedRole, Role};

use super::message::CallerIdentity;

/// Decides whether a caller whose identity STS has already attested should
/// be allowed as a peer. The identity handed in is always
/// signature-verified.
pub trait SourceVerifier: Send + Sync {
    fn verify(&self, identity: &CallerIdentity) -> Result<bool, Error>;
}

impl<F> SourceVerifier for F
where
    F: Fn(&CallerIdentity) -> Result<bool, Error> + Send + Sync,
{
    fn verify(&self, identity: &CallerIdentity) -> Result<bool, Error> {
        self(identity)
    }
}

/// Accepts callers whose assumed-role session was issued by one of the
/// allowed IAM roles.
///
/// Role-based callers always present as assumed roles, so the policy is
/// expressed against the role that minted the session rather than the
/// transient session identity. A caller ARN that is not an assumed role is
/// an error, not a rejection.
pub struct MatchesAny {
    allowed: Vec<Role>,
}

impl MatchesAny {
    pub fn new(allowed: Vec<Role>) -> Self {
        Self { allowed }
    }
}

impl SourceVerifier for MatchesAny {
    fn verify(&self, identity: &CallerIdentity) -> Result<bool, Error> {
        let assumed = AssumedRole::parse(&identity.arn)?;
        Ok(self.allowed.contains(&assumed.session_issuer()))
    }
}

/// Accepts when any inner policy accepts. Errors surface immediately.
pub struct AnyOf {
    inner: Vec<Box<dyn SourceVerifier>>,
}

impl AnyOf {
    pub fn new(inner: Vec<Box<dyn SourceVerifier>>) -> Self {
        Self { inner }
    }
}

impl SourceVerifier for AnyOf {
    fn verify(&self, identity: &CallerIdentity) -> Result<bool, Error> {
        for policy in &self.inner {
            if policy.verify(identity)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Accepts only when every inner policy accepts.
pub struct AllOf {
    inner: Vec<Box<dyn SourceVerifier>>,
}

impl AllOf {
    pub fn new(inner: Vec<Box<dyn SourceVerifier>>) -> Self {
        Self { inner }
    }
}

impl SourceVerifier for AllOf {
    fn verify(&self, identity: &CallerIdentity) -> Result<bool, Error> {
        for policy in &self.inner {
            if !policy.verify(identity)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
