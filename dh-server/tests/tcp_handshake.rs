use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use serial_test::serial;

use dh_server::handshake::{Handshake, PLAINTEXT};
use dh_server::net::TcpTransport;
use dh_server::testutils::{
    fixture_config, fixture_public_identity, run_tcp_client, PeerBehavior, PeerSession,
};

fn free_port() -> Option<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").ok()?;
    listener.local_addr().ok().map(|a| a.port())
}

fn setup_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
#[serial]
fn handshake_over_loopback() -> anyhow::Result<()> {
    setup_logging();
    let port = free_port().expect("no free port");
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse()?;

    let session = PeerSession::new(fixture_public_identity()?, PeerBehavior::Honest, 11);
    let client = thread::spawn(move || run_tcp_client(addr, session, Duration::from_secs(10)));

    let mut handshake = Handshake::new(fixture_config(addr), TcpTransport::new()?);
    let outcome = handshake.run()?;
    assert!(!handshake.holds_resources());

    let report = client.join().unwrap()?;
    assert_eq!(&report.plaintext, PLAINTEXT);
    assert!(report.message1.signature_verified);
    assert_eq!(report.declared_len, outcome.message1_len);
    assert_eq!(outcome.peer.ip(), addr.ip());
    Ok(())
}

#[test]
#[serial]
fn short_message2_over_loopback() -> anyhow::Result<()> {
    setup_logging();
    let port = free_port().expect("no free port");
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse()?;

    let session = PeerSession::new(fixture_public_identity()?, PeerBehavior::Truncate(5), 12);
    // The client errors out once the server hangs up instead of sending Message 3
    let client = thread::spawn(move || run_tcp_client(addr, session, Duration::from_secs(10)));

    let mut handshake = Handshake::new(fixture_config(addr), TcpTransport::new()?);
    let abort = handshake.run().unwrap_err();
    assert_eq!(abort.exit_code(), 4);
    assert!(client.join().unwrap().is_err());
    Ok(())
}
