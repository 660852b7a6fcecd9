//! The signed-envelope hello exchange that bootstraps mutual TLS between
//! two IAM-role peers.
//!
//! Each side sends exactly one JSON-encoded signed message carrying its
//! ephemeral CA, client first. Because the CA arrives inside a
//! GetCallerIdentity-signed envelope, an on-path attacker can neither forge
//! it (STS would reject the replay) nor swap in a different CA (the payload
//! hash is covered by the signature). The TLS 1.3 handshake then proves
//! key possession under those CAs, completing the chain from IAM identity
//! to session keys.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};
use tracing::debug;

use crate::conn::PeerMetadata;
use crate::error::Error;
use crate::gci::message::b64;
use crate::gci::{CallerIdentity, SignedMessage, Signer, UnverifiedMessage, Verifier};
use crate::identity::Arn;
use crate::tls;

/// First handshake message: the client's ephemeral CA and the hostnames it
/// expects the server's leaf certificate to cover.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ClientHello {
    #[serde(rename = "ClientCA", with = "b64")]
    client_ca: Vec<u8>,
    server_hostnames: Vec<String>,
}

/// The server's reply: its own ephemeral CA.
#[derive(Debug, Serialize, Deserialize)]
struct ServerHello {
    #[serde(rename = "ServerCA", with = "b64")]
    server_ca: Vec<u8>,
}

/// Client half of the exchange. Sends the signed client hello, verifies the
/// server's signed reply, and completes the TLS handshake with the remote
/// CA as the sole trust anchor.
pub(crate) async fn client<S>(
    mut stream: S,
    signer: &dyn Signer,
    verifier: &dyn Verifier,
    remote_host: &str,
) -> Result<(TlsStream<S>, PeerMetadata), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let local_ca = tls::make_local_ca()?;

    let hello = ClientHello {
        client_ca: local_ca.cert_pem.clone(),
        server_hostnames: vec![remote_host.to_string()],
    };
    let signed = signer.sign(&serde_json::to_vec(&hello)?).await?;
    write_message(&mut stream, &signed).await?;

    let reply: UnverifiedMessage = read_message(&mut stream).await?;
    let verified = verifier.verify(reply).await?;

    let server_hello: ServerHello = serde_json::from_slice(&verified.payload)?;
    let peer = peer_from_identity(&verified.caller_identity)?;
    debug!(peer = %peer.role, "verified server hello");

    let config = tls::make_client_config(&local_ca, &server_hello.server_ca)?;
    let server_name =
        ServerName::try_from(remote_host.to_string()).map_err(|err| Error::tls(err))?;

    let connector = TlsConnector::from(Arc::new(config));
    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|err| Error::tls(err))?;

    Ok((tls_stream.into(), peer))
}

/// Server half: the mirror image, reading the client hello first and
/// answering with a signed server hello.
pub(crate) async fn server<S>(
    mut stream: S,
    signer: &dyn Signer,
    verifier: &dyn Verifier,
) -> Result<(TlsStream<S>, PeerMetadata), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let message: UnverifiedMessage = read_message(&mut stream).await?;
    let verified = verifier.verify(message).await?;

    let client_hello: ClientHello = serde_json::from_slice(&verified.payload)?;
    let peer = peer_from_identity(&verified.caller_identity)?;
    debug!(peer = %peer.role, "verified client hello");

    let local_ca = tls::make_local_ca()?;
    let hello = ServerHello {
        server_ca: local_ca.cert_pem.clone(),
    };
    let signed = signer.sign(&serde_json::to_vec(&hello)?).await?;
    write_message(&mut stream, &signed).await?;

    let config = tls::make_server_config(
        &local_ca,
        &client_hello.client_ca,
        &client_hello.server_hostnames,
    )?;

    let acceptor = TlsAcceptor::from(Arc::new(config));
    let tls_stream = acceptor
        .accept(stream)
        .await
        .map_err(|err| Error::tls(err))?;

    Ok((tls_stream.into(), peer))
}

/// The verified caller ARN must parse, or we refuse to expose a connection
/// with an unknown peer identity.
fn peer_from_identity(identity: &CallerIdentity) -> Result<PeerMetadata, Error> {
    let role = Arn::parse(&identity.arn)?;
    Ok(PeerMetadata {
        account_id: identity.account.clone(),
        role,
    })
}

/// Write one JSON-encoded message followed by a newline.
async fn write_message<S>(stream: &mut S, message: &SignedMessage) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(message)?;
    encoded.push(b'\n');
    stream.write_all(&encoded).await?;
    stream.flush().await?;
    Ok(())
}

/// Read exactly one newline-terminated JSON message, tolerating blank
/// lines and surrounding whitespace.
///
/// The hello exchange alternates strictly, so no bytes follow the newline
/// until we answer; the buffered reader cannot swallow TLS records.
async fn read_message<S, T>(stream: &mut S) -> Result<T, Error>
where
    S: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).await?;
        if read == 0 {
            return Err(Error::decode(
                "connection closed before a handshake message arrived",
            ));
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        return Ok(serde_json::from_slice(&line)?);
    }
}
