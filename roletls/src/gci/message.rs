//! Wire types for the signed `GetCallerIdentity` exchange.

use serde::{Deserialize, Serialize};

use super::regions::Region;

/// A replayable, SigV4-signed `GetCallerIdentity` request carrying an
/// arbitrary payload as the request body.
///
/// `body` holds the payload sealed under `mask`; only a verifier produces
/// usable payload bytes. Reading `body` directly yields ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignedMessage {
    pub region: Region,
    #[serde(with = "b64")]
    pub body: Vec<u8>,
    #[serde(with = "b64")]
    pub mask: Vec<u8>,
    pub amz_authorization: String,
    pub x_amz_date: String,
    pub x_amz_security_token: String,
}

/// A [`SignedMessage`] read from an untrusted source.
///
/// Bit-identical on the wire, but a distinct type so nothing consumes the
/// contents before a [`Verifier`](super::Verifier) has replayed the
/// signature against STS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnverifiedMessage(pub(crate) SignedMessage);

impl From<SignedMessage> for UnverifiedMessage {
    fn from(message: SignedMessage) -> Self {
        UnverifiedMessage(message)
    }
}

impl UnverifiedMessage {
    /// Access the untrusted contents, e.g. to implement a custom
    /// [`Verifier`](super::Verifier). Every field is attacker-controlled
    /// until the signature has been replayed against STS.
    pub fn as_signed(&self) -> &SignedMessage {
        &self.0
    }
}

/// The identity STS attests for the credentials that signed a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub arn: String,
    pub user_id: String,
    pub account: String,
}

/// The outcome of a successful verification: the payload is exactly what
/// the holder of `caller_identity` signed.
#[derive(Debug, Clone)]
pub struct VerifiedMessage {
    pub payload: Vec<u8>,
    pub caller_identity: CallerIdentity,
    /// The original message, retained for debugging.
    pub raw: SignedMessage,
}

/// Standard-base64 serde adapter for byte fields.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
