//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};

use roletls::gci::masker;
use roletls::{
    CallerIdentity, Error, Region, SignedMessage, Signer, UnverifiedMessage, VerifiedMessage,
    Verifier,
};

type HmacSha256 = Hmac<Sha256>;

/// A signer/verifier pair that stands in for STS: messages carry a keyed
/// MAC instead of a SigV4 signature, and verification returns a canned
/// caller identity. The key is shared per test so instances cannot be
/// cross-wired.
pub struct FakeGcis {
    key: Vec<u8>,
    caller_identity: CallerIdentity,
}

impl FakeGcis {
    pub fn new(key: Vec<u8>, peer_arn: &str) -> Self {
        FakeGcis {
            key,
            caller_identity: CallerIdentity {
                arn: peer_arn.to_string(),
                user_id: "AROAEXAMPLE:session".to_string(),
                account: "1234567890".to_string(),
            },
        }
    }

    fn mac(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }
}

#[async_trait]
impl Signer for FakeGcis {
    async fn sign(&self, payload: &[u8]) -> Result<SignedMessage, Error> {
        let mut mask = vec![0u8; masker::MASK_LEN];
        rand::thread_rng().fill_bytes(&mut mask);

        Ok(SignedMessage {
            region: Region::UsWest2,
            body: masker::mask(&mask, payload)?,
            mask,
            amz_authorization: self.mac(payload),
            x_amz_date: "20240101T000000Z".to_string(),
            x_amz_security_token: String::new(),
        })
    }
}

#[async_trait]
impl Verifier for FakeGcis {
    async fn verify(&self, message: UnverifiedMessage) -> Result<VerifiedMessage, Error> {
        let raw = message.as_signed().clone();

        let payload = masker::unmask(&raw.mask, &raw.body)?;
        if self.mac(&payload) != raw.amz_authorization {
            return Err(Error::SignatureInvalid {
                status: hyper::StatusCode::FORBIDDEN,
            });
        }

        Ok(VerifiedMessage {
            payload,
            caller_identity: self.caller_identity.clone(),
            raw,
        })
    }
}

/// The fake GCI pair for one test: each side's verifier attests the OTHER
/// side's role, the way a real STS replay would.
pub fn gcis_pair(client_arn: &str, server_arn: &str) -> (Arc<FakeGcis>, Arc<FakeGcis>) {
    let mut key = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);

    // The client's GCIS verifies server hellos, and vice versa.
    let client_gcis = Arc::new(FakeGcis::new(key.clone(), server_arn));
    let server_gcis = Arc::new(FakeGcis::new(key, client_arn));
    (client_gcis, server_gcis)
}

/// A signer wrapper that counts invocations.
pub struct CountingSigner {
    inner: Arc<dyn Signer>,
    pub calls: Arc<AtomicUsize>,
}

impl CountingSigner {
    pub fn new(inner: Arc<dyn Signer>) -> Self {
        CountingSigner {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Signer for CountingSigner {
    async fn sign(&self, payload: &[u8]) -> Result<SignedMessage, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.sign(payload).await
    }
}

/// A signer wrapper that corrupts the authorization value after signing.
pub struct CorruptingSigner {
    pub inner: Arc<dyn Signer>,
}

#[async_trait]
impl Signer for CorruptingSigner {
    async fn sign(&self, payload: &[u8]) -> Result<SignedMessage, Error> {
        let mut message = self.inner.sign(payload).await?;
        message.amz_authorization = format!("{}corrupted", message.amz_authorization);
        Ok(message)
    }
}

/// A connected TCP socket pair over loopback.
pub async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (client, server) = tokio::join!(TcpStream::connect(addr), async {
        listener.accept().await.map(|(stream, _)| stream)
    });
    (client.unwrap(), server.unwrap())
}

/// Records every byte that crosses the wrapped stream, in both directions.
pub struct RecordingStream<S> {
    inner: S,
    pub sent: Arc<Mutex<Vec<u8>>>,
    pub received: Arc<Mutex<Vec<u8>>>,
}

impl<S> RecordingStream<S> {
    pub fn new(inner: S) -> Self {
        RecordingStream {
            inner,
            sent: Arc::new(Mutex::new(Vec::new())),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for RecordingStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let me = &mut *self;
        match Pin::new(&mut me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                me.received
                    .lock()
                    .unwrap()
                    .extend_from_slice(&buf.filled()[before..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for RecordingStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let me = &mut *self;
        match Pin::new(&mut me.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                me.sent.lock().unwrap().extend_from_slice(&buf[..written]);
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
