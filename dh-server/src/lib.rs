pub mod cipher;
pub mod cli;
pub mod config;
pub mod dhm;
pub mod drbg;
pub mod handshake;
pub mod identity;
pub mod keyfile;
pub mod net;
pub mod testutils;
pub mod wire;

pub use handshake::{Abort, Handshake, HandshakeError, Outcome, Step};
