//! The server side of the handshake
//!
//! One [Handshake::run] serves exactly one client:
//!
//! ```text
//! server                                           client
//!   | -- u16 len, P G GX, u16 siglen, sig  -------->  |   Message 1
//!   | <------------------------------------ GY -----  |   Message 2
//!   | -- AES-256(K[..32], "==Hello there!==") ----->  |   Message 3
//! ```
//!
//! The run is a fixed sequence of [Step]s. A step either succeeds and hands
//! over to the next one or aborts the whole run; there is no retrying and no
//! way back. [Step::Cleanup] is reached on every path and releases whatever
//! the earlier steps acquired.

use std::net::SocketAddr;

use log::{debug, info};
use thiserror::Error;

use dh_server_util::file::LoadValue;
use dh_server_util::hex::HexDisplay;

use crate::cipher::{CipherError, DemoCipher, BLOCK_LEN};
use crate::config::ServerConfig;
use crate::dhm::{DhmContext, DhmError, DhmParams, SharedSecret};
use crate::drbg::{Drbg, EntropySource, OsEntropy};
use crate::identity::{params_digest, IdentityKey};
use crate::keyfile::KeyFileError;
use crate::net::{Channel, ChannelExt, Transport, TransportError};
use crate::wire::Message1Writer;

/// What Message 3 carries, encrypted
pub const PLAINTEXT: &[u8; BLOCK_LEN] = b"==Hello there!==";

/// How many bytes of the shared secret get logged
pub const SECRET_LOG_PREFIX: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    Init,
    LoadIdentity,
    ListenAccept,
    BuildParams,
    SignAndFrame,
    SendMessage1,
    ReceiveMessage2,
    DeriveSecret,
    EncryptDemo,
    SendMessage3,
    Cleanup,
}

impl Step {
    pub const ALL: [Step; 11] = [
        Step::Init,
        Step::LoadIdentity,
        Step::ListenAccept,
        Step::BuildParams,
        Step::SignAndFrame,
        Step::SendMessage1,
        Step::ReceiveMessage2,
        Step::DeriveSecret,
        Step::EncryptDemo,
        Step::SendMessage3,
        Step::Cleanup,
    ];

    /// The step after this one; [Step::Cleanup] is final
    pub fn next(self) -> Step {
        use Step::*;
        match self {
            Init => LoadIdentity,
            LoadIdentity => ListenAccept,
            ListenAccept => BuildParams,
            BuildParams => SignAndFrame,
            SignAndFrame => SendMessage1,
            SendMessage1 => ReceiveMessage2,
            ReceiveMessage2 => DeriveSecret,
            DeriveSecret => EncryptDemo,
            EncryptDemo => SendMessage3,
            SendMessage3 => Cleanup,
            Cleanup => Cleanup,
        }
    }

    pub fn name(self) -> &'static str {
        use Step::*;
        match self {
            Init => "init",
            LoadIdentity => "load-identity",
            ListenAccept => "listen-accept",
            BuildParams => "build-params",
            SignAndFrame => "sign-and-frame",
            SendMessage1 => "send-message-1",
            ReceiveMessage2 => "receive-message-2",
            DeriveSecret => "derive-secret",
            EncryptDemo => "encrypt-demo",
            SendMessage3 => "send-message-3",
            Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("could not seed the random number generator: {0}")]
    RngSeed(#[source] rand::Error),
    #[error("could not load key material: {0}")]
    KeyLoad(#[from] KeyFileError),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("bad DH parameters: {0}")]
    DhParam(#[source] DhmError),
    #[error("DH computation failed: {0}")]
    DhCompute(#[source] DhmError),
    #[error("signing failed: {0}")]
    Signing(#[from] rsa::Error),
    #[error("cipher setup failed: {0}")]
    Cipher(#[from] CipherError),
    #[error("{0} ran before the steps it depends on")]
    OutOfOrder(Step),
}

impl HandshakeError {
    /// Process exit code reporting this kind of failure
    pub fn exit_code(&self) -> i32 {
        use HandshakeError::*;
        match self {
            RngSeed(_) => 2,
            KeyLoad(_) => 3,
            Transport(_) => 4,
            DhParam(_) => 5,
            DhCompute(_) => 6,
            Signing(_) => 7,
            Cipher(_) => 8,
            OutOfOrder(_) => 70,
        }
    }
}

impl From<std::io::Error> for HandshakeError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.into())
    }
}

/// A failed run: the step that failed and why
#[derive(Error, Debug)]
#[error("{step} failed: {error}")]
pub struct Abort {
    pub step: Step,
    #[source]
    pub error: HandshakeError,
}

impl Abort {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

/// A successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub peer: SocketAddr,
    /// Value of the length prefix sent ahead of Message 1
    pub message1_len: usize,
    pub ciphertext: [u8; BLOCK_LEN],
}

fn ready<T>(slot: Option<T>, step: Step) -> Result<T, HandshakeError> {
    slot.ok_or(HandshakeError::OutOfOrder(step))
}

/// Owner of every resource one handshake needs
///
/// Each step takes what it needs out of the slots filled by earlier steps;
/// [Self::cleanup] empties all of them again.
pub struct Handshake<T: Transport, E: EntropySource = OsEntropy> {
    config: ServerConfig,
    transport: T,
    entropy: E,
    listening: bool,
    finished: bool,
    rng: Option<Drbg>,
    identity: Option<IdentityKey>,
    params: Option<DhmParams>,
    peer: Option<SocketAddr>,
    channel: Option<T::Channel>,
    dhm: Option<DhmContext>,
    message1: Option<Message1Writer>,
    secret: Option<SharedSecret>,
    cipher: Option<DemoCipher>,
    ciphertext: Option<[u8; BLOCK_LEN]>,
}

impl<T: Transport> Handshake<T> {
    pub fn new(config: ServerConfig, transport: T) -> Self {
        Self::with_entropy(config, transport, OsEntropy)
    }
}

impl<T: Transport, E: EntropySource> Handshake<T, E> {
    pub fn with_entropy(config: ServerConfig, transport: T, entropy: E) -> Self {
        Self {
            config,
            transport,
            entropy,
            listening: false,
            finished: false,
            rng: None,
            identity: None,
            params: None,
            peer: None,
            channel: None,
            dhm: None,
            message1: None,
            secret: None,
            cipher: None,
            ciphertext: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run all steps once
    ///
    /// Cleanup happens before this returns, whether the run succeeded or not.
    /// A handshake runs only once; later calls abort right away.
    pub fn run(&mut self) -> Result<Outcome, Abort> {
        if self.finished {
            return Err(Abort {
                step: Step::Init,
                error: HandshakeError::OutOfOrder(Step::Init),
            });
        }
        self.finished = true;

        let mut step = Step::Init;
        let res = loop {
            if step == Step::Cleanup {
                break self.outcome();
            }
            debug!("Entering step {step}");
            match self.advance(step) {
                Ok(next) => step = next,
                Err(error) => break Err(Abort { step, error }),
            }
        };

        self.cleanup();
        res
    }

    /// Execute `step`, returning the step to execute next
    pub fn advance(&mut self, step: Step) -> Result<Step, HandshakeError> {
        use Step::*;
        match step {
            Init => self.init(),
            LoadIdentity => self.load_identity(),
            ListenAccept => self.listen_accept(),
            BuildParams => self.build_params(),
            SignAndFrame => self.sign_and_frame(),
            SendMessage1 => self.send_message1(),
            ReceiveMessage2 => self.receive_message2(),
            DeriveSecret => self.derive_secret(),
            EncryptDemo => self.encrypt_demo(),
            SendMessage3 => self.send_message3(),
            Cleanup => {
                self.cleanup();
                Ok(())
            }
        }?;
        Ok(step.next())
    }

    fn outcome(&self) -> Result<Outcome, Abort> {
        let abort = |error| Abort {
            step: Step::Cleanup,
            error,
        };
        let peer = ready(self.peer, Step::Cleanup).map_err(abort)?;
        let message1 = ready(self.message1.as_ref(), Step::Cleanup).map_err(abort)?;
        let ciphertext = ready(self.ciphertext, Step::Cleanup).map_err(abort)?;
        Ok(Outcome {
            peer,
            message1_len: message1.body_len(),
            ciphertext,
        })
    }

    fn init(&mut self) -> Result<(), HandshakeError> {
        info!("Seeding the random number generator");
        let rng = Drbg::seed(&mut self.entropy, self.config.personalization.as_bytes())
            .map_err(HandshakeError::RngSeed)?;
        self.rng = Some(rng);
        Ok(())
    }

    fn load_identity(&mut self) -> Result<(), HandshakeError> {
        info!("Reading private key from {:?}", self.config.private_key);
        let identity = IdentityKey::load(&self.config.private_key)?;
        info!("Reading DH parameters from {:?}", self.config.dh_params);
        let params = DhmParams::load(&self.config.dh_params)?;
        debug!(
            "Identity key has {} bits, DH group {} bits",
            identity.bits(),
            params.bits()
        );
        self.identity = Some(identity);
        self.params = Some(params);
        Ok(())
    }

    fn listen_accept(&mut self) -> Result<(), HandshakeError> {
        let bound = self.transport.bind(self.config.listen)?;
        self.listening = true;
        info!("Waiting for a remote connection on {bound}");
        let (channel, peer) = self.transport.accept()?;
        info!("Accepted connection from {peer}");
        self.channel = Some(channel);
        self.peer = Some(peer);
        Ok(())
    }

    fn build_params(&mut self) -> Result<(), HandshakeError> {
        let step = Step::BuildParams;
        let rng = ready(self.rng.as_mut(), step)?;
        let params = ready(self.params.as_ref(), step)?;

        info!("Setting up the server's DH parameters");
        let mut dhm = DhmContext::new(params);
        let blob = dhm.make_params(rng).map_err(HandshakeError::DhParam)?;
        debug!("Parameter blob is {} bytes", blob.len());
        self.dhm = Some(dhm);
        self.message1 = Some(Message1Writer::from_params(blob));
        Ok(())
    }

    fn sign_and_frame(&mut self) -> Result<(), HandshakeError> {
        let step = Step::SignAndFrame;
        let rng = ready(self.rng.as_mut(), step)?;
        let identity = ready(self.identity.as_ref(), step)?;
        let message1 = ready(self.message1.as_mut(), step)?;

        info!("Signing the DH parameters");
        let digest = params_digest(message1.params());
        let signature = identity.sign_digest(rng, &digest)?;
        message1
            .push_signature(&signature)
            .map_err(TransportError::from)?;
        debug!(
            "Message 1 is {} bytes of parameters and a {} byte signature",
            message1.params_len(),
            signature.len()
        );
        Ok(())
    }

    fn send_message1(&mut self) -> Result<(), HandshakeError> {
        let step = Step::SendMessage1;
        let channel = ready(self.channel.as_mut(), step)?;
        let message1 = ready(self.message1.as_ref(), step)?;
        if !message1.is_signed() {
            return Err(HandshakeError::OutOfOrder(step));
        }

        info!("Sending the server's DH parameters");
        let prefix = message1.len_prefix().map_err(TransportError::from)?;
        channel.send_exact(&prefix)?;
        channel.send_exact(message1.body())?;
        Ok(())
    }

    fn receive_message2(&mut self) -> Result<(), HandshakeError> {
        let step = Step::ReceiveMessage2;
        let channel = ready(self.channel.as_mut(), step)?;
        let dhm = ready(self.dhm.as_mut(), step)?;

        info!("Receiving the client's public value");
        let mut public = vec![0u8; dhm.len()];
        channel.recv_exact_whole(&mut public)?;
        dhm.read_public(&public).map_err(HandshakeError::DhParam)?;
        Ok(())
    }

    fn derive_secret(&mut self) -> Result<(), HandshakeError> {
        let step = Step::DeriveSecret;
        let rng = ready(self.rng.as_mut(), step)?;
        let dhm = ready(self.dhm.as_mut(), step)?;

        let secret = dhm.calc_secret(rng).map_err(HandshakeError::DhCompute)?;
        info!(
            "Shared secret: {}...",
            secret.fmt_hex_prefix::<SECRET_LOG_PREFIX>()
        );
        self.secret = Some(secret);
        Ok(())
    }

    fn encrypt_demo(&mut self) -> Result<(), HandshakeError> {
        let secret = ready(self.secret.as_ref(), Step::EncryptDemo)?;

        info!("Encrypting and sending the ciphertext");
        let cipher = DemoCipher::new(secret.as_bytes())?;
        self.ciphertext = Some(cipher.encrypt_block(PLAINTEXT));
        self.cipher = Some(cipher);
        Ok(())
    }

    fn send_message3(&mut self) -> Result<(), HandshakeError> {
        let step = Step::SendMessage3;
        let channel = ready(self.channel.as_mut(), step)?;
        let ciphertext = ready(self.ciphertext.as_ref(), step)?;

        debug!("Sending {} byte ciphertext", ciphertext.len());
        channel.send_exact(ciphertext)?;
        Ok(())
    }

    /// Release everything acquired so far
    ///
    /// Every resource is released at most once; calling this again does nothing.
    pub fn cleanup(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if self.listening {
            self.transport.close();
            self.listening = false;
        }
        self.cipher = None;
        self.secret = None;
        self.ciphertext = None;
        self.identity = None;
        self.message1 = None;
        self.dhm = None;
        self.params = None;
        self.rng = None;
    }

    /// Whether anything acquired by a step is still held
    pub fn holds_resources(&self) -> bool {
        self.listening
            || self.channel.is_some()
            || self.rng.is_some()
            || self.identity.is_some()
            || self.params.is_some()
            || self.dhm.is_some()
            || self.message1.is_some()
            || self.secret.is_some()
            || self.cipher.is_some()
            || self.ciphertext.is_some()
    }
}

impl<T: Transport, E: EntropySource> Drop for Handshake<T, E> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn steps_only_move_forward() {
        for pair in Step::ALL.windows(2) {
            assert_eq!(pair[0].next(), pair[1]);
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(Step::Cleanup.next(), Step::Cleanup);
    }

    #[test]
    fn exit_codes_are_distinct() {
        use HandshakeError::*;
        let errors = [
            RngSeed(rand::Error::new(std::io::Error::other("x"))),
            KeyLoad(KeyFileError::invalid("k", "x")),
            Transport(TransportError::Trailing { expected: 1 }),
            DhParam(DhmError::InvalidPublicValue),
            DhCompute(DhmError::DegenerateSecret),
            Signing(rsa::Error::Verification),
            Cipher(CipherError::ShortKeyMaterial(0)),
            OutOfOrder(Step::Init),
        ];
        let mut codes: Vec<i32> = errors.iter().map(HandshakeError::exit_code).collect();
        assert!(codes.iter().all(|&c| c != 0 && c != 1));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn abort_names_step_and_cause() {
        let abort = Abort {
            step: Step::ReceiveMessage2,
            error: TransportError::ShortRecv {
                expected: 256,
                received: 10,
            }
            .into(),
        };
        assert_eq!(
            abort.to_string(),
            "receive-message-2 failed: transport failure: received only 10 of 256 bytes"
        );
        assert_eq!(abort.exit_code(), 4);
    }

    #[test]
    fn plaintext_is_one_block() {
        assert_eq!(PLAINTEXT.len(), BLOCK_LEN);
        assert_eq!(PLAINTEXT, b"==Hello there!==");
    }
}
