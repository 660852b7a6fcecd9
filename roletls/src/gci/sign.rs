//! SigV4 signing of `GetCallerIdentity` requests with an arbitrary body.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::masker;
use super::message::SignedMessage;
use super::regions::Region;
use super::Signer;
use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

/// Query string identifying the `GetCallerIdentity` action. Both the signer
/// and the verifier's replay must use the same form.
pub(crate) const GCI_QUERY: &str = "Action=GetCallerIdentity&Version=2011-06-15";

/// A [`Signer`] backed by an AWS credentials provider.
///
/// Each `sign` call SigV4-signs a POST to the configured region's STS
/// endpoint with the payload as the request body, so that replaying the
/// result proves the payload came from the holder of those credentials.
pub struct SigV4Signer {
    region: Region,
    credentials: SharedCredentialsProvider,
    now: fn() -> DateTime<Utc>,
}

impl SigV4Signer {
    pub fn new(region: Region, credentials: SharedCredentialsProvider) -> Self {
        Self {
            region,
            credentials,
            now: Utc::now,
        }
    }

    /// Build a signer from a loaded AWS config's region and credentials.
    pub fn from_sdk_config(config: &SdkConfig) -> Result<Self, Error> {
        let region = config
            .region()
            .ok_or_else(|| Error::InvalidRegion {
                region: String::new(),
            })?
            .as_ref()
            .parse::<Region>()?;

        let credentials = config.credentials_provider().ok_or_else(|| {
            Error::from(CredentialsError::not_loaded(
                "AWS config has no credentials provider",
            ))
        })?;

        Ok(Self::new(region, credentials))
    }

    /// Build a signer from the default AWS credential chain.
    pub async fn from_env() -> Result<Self, Error> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::from_sdk_config(&config)
    }

    pub fn region(&self) -> Region {
        self.region
    }

    #[cfg(test)]
    fn with_now(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

#[async_trait]
impl Signer for SigV4Signer {
    async fn sign(&self, payload: &[u8]) -> Result<SignedMessage, Error> {
        let creds = self.credentials.provide_credentials().await?;

        let now = (self.now)();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let host = format!("sts.{}.amazonaws.com", self.region);
        let payload_hash = hex::encode(Sha256::digest(payload));

        // Canonical headers, each terminated by a newline, in sorted order.
        let (canonical_headers, signed_headers) = match creds.session_token() {
            Some(token) => (
                format!("host:{host}\nx-amz-date:{amz_date}\nx-amz-security-token:{token}\n"),
                "host;x-amz-date;x-amz-security-token",
            ),
            None => (
                format!("host:{host}\nx-amz-date:{amz_date}\n"),
                "host;x-amz-date",
            ),
        };

        let canonical_request = format!(
            "POST\n/\n{GCI_QUERY}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );

        let scope = format!("{date_stamp}/{}/sts/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = {
            let k_secret = format!("AWS4{}", creds.secret_access_key());
            let k_date = hmac(k_secret.as_bytes(), date_stamp.as_bytes())?;
            let k_region = hmac(&k_date, self.region.as_str().as_bytes())?;
            let k_service = hmac(&k_region, b"sts")?;
            let k_signing = hmac(&k_service, b"aws4_request")?;
            hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?)
        };

        let amz_authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            creds.access_key_id()
        );

        let mut mask = vec![0u8; masker::MASK_LEN];
        rand::thread_rng().fill_bytes(&mut mask);

        Ok(SignedMessage {
            region: self.region,
            body: masker::mask(&mask, payload)?,
            mask,
            amz_authorization,
            x_amz_date: amz_date,
            x_amz_security_token: creds.session_token().unwrap_or_default().to_string(),
        })
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|err| Error::signing(err.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_credential_types::Credentials;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn signer_with(token: Option<&str>) -> SigV4Signer {
        let creds = Credentials::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            token.map(str::to_string),
            None,
            "test",
        );
        SigV4Signer::new(
            Region::UsWest2,
            SharedCredentialsProvider::new(creds),
        )
        .with_now(fixed_now)
    }

    #[tokio::test]
    async fn signs_with_the_configured_region_and_date() {
        let message = signer_with(None).sign(b"hello world").await.unwrap();

        assert_eq!(message.region, Region::UsWest2);
        assert_eq!(message.x_amz_date, "20240101T000000Z");
        assert!(message.amz_authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240101/us-west-2/sts/aws4_request, \
             SignedHeaders=host;x-amz-date, Signature="
        ));
        assert_eq!(message.x_amz_security_token, "");
    }

    #[tokio::test]
    async fn session_token_joins_the_signed_headers() {
        let message = signer_with(Some("SESSION")).sign(b"payload").await.unwrap();

        assert!(message
            .amz_authorization
            .contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
        assert_eq!(message.x_amz_security_token, "SESSION");
    }

    #[tokio::test]
    async fn body_is_masked_but_recoverable_with_the_mask() {
        let payload = b"the payload travels masked";
        let message = signer_with(None).sign(payload).await.unwrap();

        assert_eq!(message.mask.len(), masker::MASK_LEN);
        assert_ne!(message.body, payload.to_vec());
        assert_eq!(masker::unmask(&message.mask, &message.body).unwrap(), payload);
    }

    #[tokio::test]
    async fn signatures_are_deterministic_for_fixed_time_and_payload() {
        let signer = signer_with(None);
        let a = signer.sign(b"same").await.unwrap();
        let b = signer.sign(b"same").await.unwrap();
        // The mask and nonce differ per message; the signature must not.
        assert_eq!(a.amz_authorization, b.amz_authorization);
        assert_ne!(a.mask, b.mask);
    }
}
