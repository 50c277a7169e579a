//! Transport the handshake runs over
//!
//! [Transport] binds an address and hands out exactly one [Channel] per
//! accepted connection. The handshake only needs a handful of calls from them,
//! which keeps stub transports for testing small; see [crate::testutils].
//!
//! [TcpTransport] is the real thing, built on mio. Readiness is awaited
//! without a timeout so every call blocks just like a plain blocking socket
//! would; in particular [Transport::accept] waits forever if nobody connects.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use log::{debug, trace};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, Token};
use thiserror::Error;

use dh_server_util::io::nonblocking_handle_io_errors;
use dh_server_util::mio::{interest, wait_for_readiness};

use crate::wire::WireError;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("sent only {sent} of {expected} bytes")]
    ShortSend { expected: usize, sent: usize },
    #[error("received only {received} of {expected} bytes")]
    ShortRecv { expected: usize, received: usize },
    #[error("peer sent more than the expected {expected} bytes")]
    Trailing { expected: usize },
    #[error(transparent)]
    Framing(#[from] WireError),
}

/// One established connection
pub trait Channel {
    /// Send some prefix of `buf`, returning its length
    ///
    /// Zero means the peer no longer accepts data.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Receive into some prefix of `buf`, returning its length
    ///
    /// Zero means the peer closed the connection.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether received data is waiting to be read; must not block
    fn has_pending(&mut self) -> io::Result<bool> {
        Ok(false)
    }

    /// Release the connection; calling this more than once is harmless
    fn close(&mut self) {}
}

/// Exact-count transfers on top of [Channel]
pub trait ChannelExt: Channel {
    /// Send all of `buf` or fail with [TransportError::ShortSend]
    fn send_exact(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let mut sent = 0;
        while sent < buf.len() {
            match self.send(&buf[sent..])? {
                0 => break,
                n => sent += n,
            }
        }
        match sent == buf.len() {
            true => Ok(()),
            false => Err(TransportError::ShortSend {
                expected: buf.len(),
                sent,
            }),
        }
    }

    /// Fill all of `buf` or fail with [TransportError::ShortRecv]
    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut received = 0;
        while received < buf.len() {
            match self.recv(&mut buf[received..])? {
                0 => break,
                n => received += n,
            }
        }
        match received == buf.len() {
            true => Ok(()),
            false => Err(TransportError::ShortRecv {
                expected: buf.len(),
                received,
            }),
        }
    }

    /// Like [Self::recv_exact], but `buf` must also hold everything the
    /// peer has sent so far
    fn recv_exact_whole(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.recv_exact(buf)?;
        match self.has_pending()? {
            true => Err(TransportError::Trailing {
                expected: buf.len(),
            }),
            false => Ok(()),
        }
    }
}

impl<C: Channel + ?Sized> ChannelExt for C {}

/// Source of connections
pub trait Transport {
    type Channel: Channel;

    /// Start listening on `addr`, returning the address actually bound
    fn bind(&mut self, addr: SocketAddr) -> io::Result<SocketAddr>;

    /// Block until a peer connects
    fn accept(&mut self) -> io::Result<(Self::Channel, SocketAddr)>;

    /// Stop listening; calling this more than once is harmless
    fn close(&mut self) {}
}

const LISTENER: Token = Token(0);
const STREAM: Token = Token(1);

/// TCP over mio
pub struct TcpTransport {
    listener: Option<TcpListener>,
    poll: Poll,
    events: Events,
}

impl TcpTransport {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            listener: None,
            poll: Poll::new()?,
            events: Events::with_capacity(8),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn listener(&mut self) -> io::Result<&mut TcpListener> {
        self.listener
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not listening"))
    }
}

impl Transport for TcpTransport {
    type Channel = TcpChannel;

    fn bind(&mut self, addr: SocketAddr) -> io::Result<SocketAddr> {
        self.close();
        let mut listener = TcpListener::bind(addr)?;
        self.poll
            .registry()
            .register(&mut listener, LISTENER, interest::R)?;
        let bound = listener.local_addr()?;
        debug!("Listening on {bound}");
        self.listener = Some(listener);
        Ok(bound)
    }

    fn accept(&mut self) -> io::Result<(TcpChannel, SocketAddr)> {
        loop {
            let listener = self.listener()?;
            if let Some((stream, peer)) = nonblocking_handle_io_errors(|| listener.accept())? {
                return Ok((TcpChannel::new(stream)?, peer));
            }
            trace!("Nobody connected yet, waiting");
            wait_for_readiness(&mut self.poll, &mut self.events)?;
        }
    }

    fn close(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            let _ = self.poll.registry().deregister(&mut listener);
            debug!("Listener closed");
        }
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// Accepted TCP connection with its own readiness poll
pub struct TcpChannel {
    stream: Option<TcpStream>,
    poll: Poll,
    events: Events,
}

impl TcpChannel {
    fn new(mut stream: TcpStream) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry().register(&mut stream, STREAM, interest::RW)?;
        Ok(Self {
            stream: Some(stream),
            poll,
            events: Events::with_capacity(4),
        })
    }

    /// Run `op` on the stream until it stops reporting `WouldBlock`
    fn blocking<T, F>(&mut self, mut op: F) -> io::Result<T>
    where
        F: FnMut(&mut TcpStream) -> io::Result<T>,
    {
        let Self {
            stream,
            poll,
            events,
        } = self;
        let stream = stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))?;
        loop {
            if let Some(v) = nonblocking_handle_io_errors(|| op(stream))? {
                return Ok(v);
            }
            wait_for_readiness(poll, events)?;
        }
    }
}

impl Channel for TcpChannel {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.blocking(|s| s.write(buf))
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.blocking(|s| s.read(buf))
    }

    fn has_pending(&mut self) -> io::Result<bool> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };
        let mut probe = [0u8; 1];
        let peeked = nonblocking_handle_io_errors(|| stream.peek(&mut probe))?;
        Ok(matches!(peeked, Some(n) if n > 0))
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.flush();
            let _ = stream.shutdown(Shutdown::Both);
            let _ = self.poll.registry().deregister(&mut stream);
            debug!("Connection closed");
        }
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let peer = self.stream.as_ref().and_then(|s| s.peer_addr().ok());
        f.debug_struct("TcpChannel").field("peer", &peer).finish()
    }
}
