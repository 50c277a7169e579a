//! Client side of the handshake and stub transports, for tests
//!
//! [PeerSession] is the protocol logic of a client, independent of how bytes
//! travel. [ScriptedPeer] runs a session behind the [Channel] interface
//! entirely in memory, and [QueuedTransport] hands such channels to the
//! server one by one. [run_tcp_client] drives a session over a real socket.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context};
use num_bigint_dig::BigUint;
use num_traits::{One, Zero};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::cipher::{DemoCipher, BLOCK_LEN};
use crate::config::ServerConfig;
use crate::dhm::DhmContext;
use crate::identity::{params_digest, PublicIdentity};
use crate::net::{Channel, Transport};
use crate::wire::{decode_len, Message1, LEN_PREFIX_SIZE};

/// Path of a file under `tests/fixtures`
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Server configuration using the fixture key files
pub fn fixture_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        private_key: fixture("rsa_priv.txt"),
        dh_params: fixture("dh_prime.txt"),
        listen,
        ..ServerConfig::default()
    }
}

pub fn fixture_public_identity() -> anyhow::Result<PublicIdentity> {
    use dh_server_util::file::LoadValue;
    Ok(PublicIdentity::load(fixture("rsa_pub.txt"))?)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Public value a misbehaving peer sends instead of its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degenerate {
    Zero,
    One,
    PMinusOne,
}

/// How the peer builds Message 2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBehavior {
    Honest,
    /// Leave off this many trailing bytes
    Truncate(usize),
    /// Append this many zero bytes
    Pad(usize),
    Degenerate(Degenerate),
    /// Send this value instead of its own
    Value(u32),
}

/// Client protocol state
pub struct PeerSession {
    server: PublicIdentity,
    behavior: PeerBehavior,
    rng: ChaCha20Rng,
    dhm: Option<DhmContext>,
}

/// What the client saw of Message 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message1Report {
    pub params_len: usize,
    pub signature_len: usize,
    pub signature_verified: bool,
}

impl PeerSession {
    pub fn new(server: PublicIdentity, behavior: PeerBehavior, seed: u64) -> Self {
        Self {
            server,
            behavior,
            rng: ChaCha20Rng::seed_from_u64(seed),
            dhm: None,
        }
    }

    /// Process a Message 1 body and produce Message 2
    pub fn on_message1(&mut self, body: &[u8]) -> anyhow::Result<(Message1Report, Vec<u8>)> {
        let (mut dhm, params_len) = DhmContext::read_params(body)?;
        let message1 = Message1::split(body, params_len)?;
        let report = Message1Report {
            params_len,
            signature_len: message1.signature.len(),
            signature_verified: self
                .server
                .verify_digest(&params_digest(message1.params), message1.signature),
        };

        let len = dhm.len();
        let mut public = dhm.make_public(&mut self.rng)?;
        let forced = match self.behavior {
            PeerBehavior::Honest => None,
            PeerBehavior::Truncate(n) => {
                public.truncate(len.saturating_sub(n));
                None
            }
            PeerBehavior::Pad(n) => {
                public.resize(len + n, 0);
                None
            }
            PeerBehavior::Degenerate(Degenerate::Zero) => Some(BigUint::zero()),
            PeerBehavior::Degenerate(Degenerate::One) => Some(BigUint::one()),
            PeerBehavior::Degenerate(Degenerate::PMinusOne) => {
                Some(dhm.params().p() - BigUint::one())
            }
            PeerBehavior::Value(v) => Some(BigUint::from(v)),
        };
        if let Some(value) = forced {
            let bytes = value.to_bytes_be();
            ensure!(bytes.len() <= len, "forced value does not fit in {len} bytes");
            public = vec![0u8; len - bytes.len()];
            public.extend_from_slice(&bytes);
        }
        self.dhm = Some(dhm);
        Ok((report, public))
    }

    /// Decrypt Message 3 with the shared secret
    pub fn on_message3(
        &mut self,
        ciphertext: &[u8; BLOCK_LEN],
    ) -> anyhow::Result<[u8; BLOCK_LEN]> {
        let dhm = self.dhm.as_mut().context("Message 3 before Message 1")?;
        let secret = dhm.calc_secret(&mut self.rng)?;
        Ok(DemoCipher::new(secret.as_bytes())?.decrypt_block(ciphertext))
    }
}

/// Everything a [ScriptedPeer] observed
#[derive(Debug, Default, Clone)]
pub struct PeerLog {
    /// Length announced in front of Message 1
    pub declared_len: Option<usize>,
    /// Bytes received after the length prefix, up to Message 3
    pub message1_received: usize,
    pub message1: Option<Message1Report>,
    /// Message 2 as handed to the server
    pub message2: Option<Vec<u8>>,
    pub ciphertext: Option<[u8; BLOCK_LEN]>,
    pub plaintext: Option<[u8; BLOCK_LEN]>,
    pub closes: usize,
    pub errors: Vec<String>,
}

pub type SharedPeerLog = Arc<Mutex<PeerLog>>;

enum PeerState {
    AwaitMessage1,
    AwaitMessage3,
    Done,
}

/// In-memory client that reacts to whatever the server sends
pub struct ScriptedPeer {
    session: PeerSession,
    state: PeerState,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    log: SharedPeerLog,
}

impl ScriptedPeer {
    pub fn new(session: PeerSession) -> (Self, SharedPeerLog) {
        let log = SharedPeerLog::default();
        let peer = Self {
            session,
            state: PeerState::AwaitMessage1,
            inbox: Vec::new(),
            outbox: VecDeque::new(),
            log: log.clone(),
        };
        (peer, log)
    }

    fn process(&mut self) {
        loop {
            let progressed = match self.state {
                PeerState::AwaitMessage1 => self.try_message1(),
                PeerState::AwaitMessage3 => self.try_message3(),
                PeerState::Done => false,
            };
            if !progressed {
                break;
            }
        }
    }

    fn try_message1(&mut self) -> bool {
        if self.inbox.len() < LEN_PREFIX_SIZE {
            return false;
        }
        let declared = decode_len([self.inbox[0], self.inbox[1]]);
        lock(&self.log).declared_len = Some(declared);
        if self.inbox.len() < LEN_PREFIX_SIZE + declared {
            return false;
        }

        let body: Vec<u8> = self
            .inbox
            .drain(..LEN_PREFIX_SIZE + declared)
            .skip(LEN_PREFIX_SIZE)
            .collect();
        let res = self.session.on_message1(&body);
        let mut log = lock(&self.log);
        log.message1_received = body.len();
        match res {
            Ok((report, message2)) => {
                self.outbox.extend(message2.iter().copied());
                log.message1 = Some(report);
                log.message2 = Some(message2);
                self.state = PeerState::AwaitMessage3;
            }
            Err(e) => {
                log.errors.push(format!("{e:#}"));
                self.state = PeerState::Done;
            }
        }
        true
    }

    fn try_message3(&mut self) -> bool {
        if self.inbox.len() < BLOCK_LEN {
            return false;
        }
        let mut ciphertext = [0u8; BLOCK_LEN];
        for (dst, src) in ciphertext.iter_mut().zip(self.inbox.drain(..BLOCK_LEN)) {
            *dst = src;
        }
        let res = self.session.on_message3(&ciphertext);
        let mut log = lock(&self.log);
        log.ciphertext = Some(ciphertext);
        match res {
            Ok(plaintext) => log.plaintext = Some(plaintext),
            Err(e) => log.errors.push(format!("{e:#}")),
        }
        self.state = PeerState::Done;
        true
    }
}

impl Channel for ScriptedPeer {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inbox.extend_from_slice(buf);
        self.process();
        Ok(buf.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.outbox.len());
        for (dst, src) in buf.iter_mut().zip(self.outbox.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn has_pending(&mut self) -> io::Result<bool> {
        Ok(!self.outbox.is_empty())
    }

    fn close(&mut self) {
        lock(&self.log).closes += 1;
    }
}

/// What happened to a [QueuedTransport]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Bound(SocketAddr),
    Accepted(SocketAddr),
    Closed,
}

pub type SharedTransportLog = Arc<Mutex<Vec<TransportEvent>>>;

/// Transport whose connections are pushed in through a channel
///
/// [Transport::accept] blocks until the next connection is queued and fails
/// once every sender is gone.
pub struct QueuedTransport<C> {
    incoming: mpsc::Receiver<(C, SocketAddr)>,
    events: SharedTransportLog,
}

impl<C: Channel> QueuedTransport<C> {
    pub fn new() -> (Self, mpsc::Sender<(C, SocketAddr)>, SharedTransportLog) {
        let (tx, incoming) = mpsc::channel();
        let events = SharedTransportLog::default();
        let transport = Self {
            incoming,
            events: events.clone(),
        };
        (transport, tx, events)
    }

    /// A transport with one connection already queued
    pub fn with_peer(peer: C, addr: SocketAddr) -> (Self, SharedTransportLog) {
        let (transport, tx, events) = Self::new();
        // The receiver is alive inside `transport`, so this cannot fail
        let _ = tx.send((peer, addr));
        (transport, events)
    }
}

impl<C: Channel> Transport for QueuedTransport<C> {
    type Channel = C;

    fn bind(&mut self, addr: SocketAddr) -> io::Result<SocketAddr> {
        lock(&self.events).push(TransportEvent::Bound(addr));
        Ok(addr)
    }

    fn accept(&mut self) -> io::Result<(C, SocketAddr)> {
        let (channel, addr) = self
            .incoming
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionAborted, "no more peers"))?;
        lock(&self.events).push(TransportEvent::Accepted(addr));
        Ok((channel, addr))
    }

    fn close(&mut self) {
        lock(&self.events).push(TransportEvent::Closed);
    }
}

/// What a TCP client saw of one handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpClientReport {
    pub declared_len: usize,
    pub message1: Message1Report,
    pub plaintext: [u8; BLOCK_LEN],
}

/// Connect to `addr`, retrying until `patience` runs out, and run `session`
pub fn run_tcp_client(
    addr: SocketAddr,
    mut session: PeerSession,
    patience: Duration,
) -> anyhow::Result<TcpClientReport> {
    let start = Instant::now();
    let mut stream = loop {
        match TcpStream::connect(addr) {
            Ok(s) => break s,
            Err(e) if start.elapsed() < patience => {
                log::trace!("Server not up yet: {e}");
                thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(e).context(format!("could not connect to {addr}")),
        }
    };

    let mut prefix = [0u8; LEN_PREFIX_SIZE];
    stream.read_exact(&mut prefix)?;
    let declared_len = decode_len(prefix);
    let mut body = vec![0u8; declared_len];
    stream.read_exact(&mut body)?;

    let (message1, message2) = session.on_message1(&body)?;
    stream.write_all(&message2)?;
    // Nothing else follows; lets the server see a short Message 2 as such
    stream.shutdown(Shutdown::Write)?;

    let mut ciphertext = [0u8; BLOCK_LEN];
    stream.read_exact(&mut ciphertext)?;
    let plaintext = session.on_message3(&ciphertext)?;

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest)?;
    ensure!(rest.is_empty(), "{} unexpected bytes after Message 3", rest.len());

    Ok(TcpClientReport {
        declared_len,
        message1,
        plaintext,
    })
}
