use echoprobe::pattern::PatternKind;
use echoprobe::{Client, Config, Error, Mode, Server, TargetSize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

/// Test that a refused connection is a connection error
#[tokio::test]
async fn test_connection_refused() {
    // bind then drop to get a port nobody listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = Config::client("127.0.0.1".to_string(), port).with_target_size(TargetSize::Exact(10));
    let result = Client::new(config).unwrap().run().await;
    assert!(matches!(result, Err(Error::Connection(_))));
}

/// Test that a corrupting echo server fails the comparator at the flipped byte
#[tokio::test]
async fn test_corrupted_echo_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let mut offset = 0usize;
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if (offset..offset + n).contains(&5000) {
                buf[5000 - offset] ^= 0x01;
            }
            offset += n;
            if stream.write_all(&buf[..n]).await.is_err() {
                break;
            }
        }
    });

    let config = Config::client("127.0.0.1".to_string(), port)
        .with_target_size(TargetSize::Exact(100_000))
        .with_pattern(PatternKind::IncreasingAscii);
    let result = timeout(Duration::from_secs(10), Client::new(config).unwrap().run())
        .await
        .unwrap();

    match result {
        Err(e @ Error::Integrity(_)) => {
            assert!(e.is_integrity_failure());
            if let Error::Integrity(report) = e {
                assert_eq!(report.offset, 5000);
                assert_eq!(report.diverging[0].expected, 33 + (5000 % 94) as u8);
            }
        }
        other => panic!("expected integrity failure, got {:?}", other),
    }
}

/// Test that flushing fails when the peer hangs up immediately
#[tokio::test]
async fn test_flush_input_peer_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = stream.write_all(b"stale bytes").await;
        drop(stream);
    });

    let config = Config::client("127.0.0.1".to_string(), port)
        .with_target_size(TargetSize::Exact(10))
        .with_flush_input(true);
    let result = timeout(Duration::from_secs(5), Client::new(config).unwrap().run())
        .await
        .unwrap();
    assert!(matches!(result, Err(Error::Connection(_))));
}

/// Test that a server keeps going after a client drops mid-session
#[tokio::test]
async fn test_server_survives_client_reset() {
    let server = Server::new(Config::server(0).with_mode(Mode::Responder)).unwrap();
    let listener = server.bind().unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move { server.serve(&listener, Some(2)).await });

    // first client writes a little and vanishes
    {
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(&[0u8; 100]).await.unwrap();
    }

    // second client runs a full comparator session
    let config = Config::client("127.0.0.1".to_string(), port).with_target_size(TargetSize::Exact(50_000));
    let report = timeout(Duration::from_secs(10), Client::new(config).unwrap().run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.received, 50_000);

    timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[test]
fn test_mismatched_roles_rejected() {
    assert!(matches!(
        Server::new(Config::client("localhost".to_string(), 1)),
        Err(Error::Config(_))
    ));
    assert!(matches!(Client::new(Config::server(1)), Err(Error::Config(_))));
}

#[test]
fn test_tunnel_runs_comparator_only() {
    let config = Config::tunnel("example.org".to_string(), 443, "TLS1.2".to_string())
        .with_mode(Mode::Responder);
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}
