//! Verification of signed messages by replaying them against STS.

use std::sync::Arc;

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{header, Body, Client, Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use tracing::{debug, warn};

use super::masker;
use super::message::{CallerIdentity, UnverifiedMessage, VerifiedMessage};
use super::sign::GCI_QUERY;
use super::source::SourceVerifier;
use super::Verifier;
use crate::error::Error;

/// A [`Verifier`] that replays messages against the real STS endpoint for
/// their region.
///
/// A 200 response proves the message was signed by valid IAM credentials;
/// the attested identity is then checked against the source policy. The
/// hyper client never follows redirects, so a redirecting endpoint fails
/// verification outright.
pub struct SigV4Verifier {
    http: Client<HttpsConnector<HttpConnector>>,
    source: Arc<dyn SourceVerifier>,
    endpoint_override: Option<String>,
}

impl SigV4Verifier {
    pub fn new(source: Arc<dyn SourceVerifier>) -> Self {
        let https = HttpsConnector::new();
        let http = Client::builder().build::<_, Body>(https);
        Self {
            http,
            source,
            endpoint_override: None,
        }
    }

    /// Redirect STS calls to an alternate endpoint. Test seam.
    #[doc(hidden)]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }
}

#[async_trait]
impl Verifier for SigV4Verifier {
    async fn verify(&self, message: UnverifiedMessage) -> Result<VerifiedMessage, Error> {
        let msg = message.0;

        if msg.amz_authorization.is_empty() {
            return Err(Error::decode("message has an empty Authorization value"));
        }
        if msg.x_amz_date.is_empty() {
            return Err(Error::decode("message has an empty X-Amz-Date value"));
        }

        // Cannot be trusted until STS accepts the replay.
        let unverified_payload = masker::unmask(&msg.mask, &msg.body)?;

        let endpoint = match &self.endpoint_override {
            Some(endpoint) => endpoint.clone(),
            None => msg.region.sts_endpoint(),
        };

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(format!("{endpoint}?{GCI_QUERY}"))
            .header(header::AUTHORIZATION, msg.amz_authorization.as_str())
            .header("X-Amz-Date", msg.x_amz_date.as_str());
        if !msg.x_amz_security_token.is_empty() {
            request = request.header("X-Amz-Security-Token", msg.x_amz_security_token.as_str());
        }
        let request = request
            .body(Body::from(unverified_payload.clone()))
            .map_err(|err| Error::decode(err.to_string()))?;

        let response = self.http.request(request).await?;
        let status = response.status();
        if status != StatusCode::OK {
            debug!(%status, "STS rejected the replayed GetCallerIdentity request");
            return Err(Error::SignatureInvalid { status });
        }

        let body = hyper::body::to_bytes(response.into_body()).await?;
        let caller_identity = parse_caller_identity(&body)?;

        if !self.source.verify(&caller_identity)? {
            warn!(arn = %caller_identity.arn, "verified caller is not an allowed source");
            return Err(Error::SourceRejected {
                arn: caller_identity.arn,
            });
        }

        Ok(VerifiedMessage {
            payload: unverified_payload,
            caller_identity,
            raw: msg,
        })
    }
}

/// Pull the identity fields out of a `GetCallerIdentityResponse` document.
fn parse_caller_identity(body: &[u8]) -> Result<CallerIdentity, Error> {
    let text = std::str::from_utf8(body)
        .map_err(|_| Error::decode("GetCallerIdentity response is not UTF-8"))?;

    let field = |tag: &str| {
        extract_xml_field(text, tag)
            .ok_or_else(|| Error::decode(format!("GetCallerIdentity response is missing <{tag}>")))
    };

    Ok(CallerIdentity {
        arn: field("Arn")?,
        user_id: field("UserId")?,
        account: field("Account")?,
    })
}

/// Extract a single element's text from the STS response XML.
fn extract_xml_field(xml: &str, tag: &str) -> Option<String> {
    let start = format!("<{}>", tag);
    let end = format!("</{}>", tag);
    let si = xml.find(&start)? + start.len();
    let ei = xml[si..].find(&end)? + si;
    Some(xml[si..ei].to_string())
}
