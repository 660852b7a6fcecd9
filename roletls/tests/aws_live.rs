//! Round trip against real STS. Needs live AWS credentials, so it only
//! runs when asked for explicitly:
//!
//! ```not_rust
//! cargo test --test aws_live -- --ignored
//! ```

use roletls::{AssumedRole, Dialer, Listener};
use tokio::net::TcpListener;

/// Resolve the role this environment's credentials belong to.
async fn local_role() -> Option<roletls::Role> {
    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .load()
        .await;
    let sts = aws_sdk_sts::Client::new(&config);

    let identity = sts.get_caller_identity().send().await.ok()?;
    let assumed = AssumedRole::parse(identity.arn()?).ok()?;
    Some(assumed.session_issuer())
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn echo_round_trip_with_real_credentials() {
    let role = local_role()
        .await
        .expect("caller identity should resolve to an assumed role");

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::new(tcp, vec![role.clone()]).await.unwrap();
    let dialer = Dialer::new(vec![role]).await.unwrap();

    let server = tokio::spawn(async move {
        let (conn, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 1024];
        loop {
            let n = conn.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            conn.write_all(&buf[..n]).await.unwrap();
        }
    });

    let conn = dialer.dial(&addr.to_string()).await.unwrap();
    conn.write_all(b"hello world").await.unwrap();

    let mut echoed = vec![0u8; b"hello world".len()];
    let mut read = 0;
    while read < echoed.len() {
        let n = conn.read(&mut echoed[read..]).await.unwrap();
        assert_ne!(n, 0);
        read += n;
    }
    assert_eq!(&echoed, b"hello world");
    assert!(conn.peer().is_some());

    conn.shutdown().await.unwrap();
    server.await.unwrap();
}
