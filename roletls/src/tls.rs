//! Ephemeral per-connection certificate authorities and the TLS
//! configurations built from an exchanged pair of them.
//!
//! Every connection mints a fresh P-256 CA and leaf. Nothing is cached or
//! reused across connections, so compromising one connection's keys says
//! nothing about any other.

use std::net::IpAddr;
use std::sync::Arc;

use rand::RngCore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, ExtendedKeyUsagePurpose, Ia5String, IsCa,
    KeyPair, KeyUsagePurpose, SanType, SerialNumber, PKCS_ECDSA_P256_SHA256,
};
use rustls::crypto::{aws_lc_rs, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use time::{Duration, OffsetDateTime};

use crate::error::Error;

/// A single-use certificate authority minted for one connection.
pub(crate) struct CaBundle {
    key: KeyPair,
    cert: Certificate,
    /// PEM form of the CA certificate, sent to the peer inside the signed
    /// hello.
    pub(crate) cert_pem: Vec<u8>,
}

pub(crate) fn make_local_ca() -> Result<CaBundle, Error> {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(|err| Error::tls(err))?;

    let mut params = base_cert_params();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign];

    let cert = params.self_signed(&key).map_err(|err| Error::tls(err))?;
    let cert_pem = cert.pem().into_bytes();

    Ok(CaBundle { key, cert, cert_pem })
}

/// Shared template: random 128-bit serial, valid from now for 24 hours.
/// Generous on purpose; certificates never outlive their connection, the
/// bound only caps how long an abandoned stream stays usable.
fn base_cert_params() -> CertificateParams {
    let mut params = CertificateParams::default();

    let mut serial = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut serial);
    params.serial_number = Some(SerialNumber::from_slice(&serial));

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::hours(24);

    params
}

struct LeafCert {
    cert_der: CertificateDer<'static>,
    key_der: PrivateKeyDer<'static>,
}

/// A server-auth leaf covering the hostnames the client said it expects.
/// IP literals become IP SANs, everything else DNS SANs.
fn generate_server_cert(local_ca: &CaBundle, hostnames: &[String]) -> Result<LeafCert, Error> {
    let mut params = base_cert_params();
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    for hostname in hostnames {
        let san = match hostname.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(
                Ia5String::try_from(hostname.as_str()).map_err(|err| Error::tls(err))?,
            ),
        };
        params.subject_alt_names.push(san);
    }

    sign_leaf(params, local_ca)
}

/// A client-auth leaf. Carries no subject identity; the peer learns who we
/// are from the signed hello, not from the certificate.
fn generate_client_cert(local_ca: &CaBundle) -> Result<LeafCert, Error> {
    let mut params = base_cert_params();
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

    sign_leaf(params, local_ca)
}

fn sign_leaf(params: CertificateParams, local_ca: &CaBundle) -> Result<LeafCert, Error> {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(|err| Error::tls(err))?;
    let cert = params
        .signed_by(&key, &local_ca.cert, &local_ca.key)
        .map_err(|err| Error::tls(err))?;

    Ok(LeafCert {
        cert_der: cert.der().clone(),
        key_der: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
    })
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(aws_lc_rs::default_provider())
}

/// TLS 1.3 server configuration: presents a leaf under our CA covering the
/// requested hostnames and accepts client certificates only from the
/// peer's CA.
pub(crate) fn make_server_config(
    local_ca: &CaBundle,
    client_ca_pem: &[u8],
    hostnames: &[String],
) -> Result<ServerConfig, Error> {
    let leaf = generate_server_cert(local_ca, hostnames)?;

    let client_roots = root_store_from_pem(client_ca_pem)?;
    let client_verifier = WebPkiClientVerifier::builder_with_provider(
        Arc::new(client_roots),
        provider(),
    )
    .build()
    .map_err(|err| Error::tls(err))?;

    ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|err| Error::tls(err))?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(vec![leaf.cert_der], leaf.key_der)
        .map_err(|err| Error::tls(err))
}

/// TLS 1.3 client configuration: trusts the server's CA as the sole root
/// and presents a client-auth leaf under our own CA.
pub(crate) fn make_client_config(
    local_ca: &CaBundle,
    server_ca_pem: &[u8],
) -> Result<ClientConfig, Error> {
    let leaf = generate_client_cert(local_ca)?;

    let roots = root_store_from_pem(server_ca_pem)?;

    ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|err| Error::tls(err))?
        .with_root_certificates(roots)
        .with_client_auth_cert(vec![leaf.cert_der], leaf.key_der)
        .map_err(|err| Error::tls(err))
}

fn root_store_from_pem(pem: &[u8]) -> Result<RootCertStore, Error> {
    let mut store = RootCertStore::empty();
    let mut added = 0;
    for cert in rustls_pemfile::certs(&mut std::io::BufReader::new(pem)) {
        let cert = cert.map_err(|err| Error::decode(format!("bad CA PEM: {err}")))?;
        store.add(cert).map_err(|err| Error::tls(err))?;
        added += 1;
    }
    if added == 0 {
        return Err(Error::decode("peer hello contained no CA certificate"));
    }
    Ok(store)
}
