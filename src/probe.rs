//! Best-effort liveness probe for idle sockets

use crate::errors::PoolError;

use socket2::SockRef;
use std::io;
use std::mem::MaybeUninit;
use tokio::net::TcpStream;

/// Outcome of a liveness probe
#[derive(Debug)]
pub enum Liveness {
    /// Nothing indicates the peer went away
    Alive,

    /// The connection must be discarded
    Dead(PoolError),

    /// The probe itself failed; the caller's policy decides
    Indeterminate(io::Error),
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, Liveness::Alive)
    }
}

/// Peek one byte from a non-blocking TCP socket without consuming it
///
/// An idle connection has nothing to read, so the peek would block. End of
/// stream means the peer closed it, and pending data on a connection
/// nobody is using means the protocol state is unknown.
pub fn probe_tcp(stream: &TcpStream) -> Liveness {
    let sock = SockRef::from(stream);
    let mut buf = [MaybeUninit::<u8>::uninit(); 1];

    match sock.peek(&mut buf) {
        Ok(0) => Liveness::Dead(PoolError::PeerClosed),
        Ok(_) => Liveness::Dead(PoolError::UnexpectedRead),
        Err(err) => classify(err),
    }
}

fn classify(err: io::Error) -> Liveness {
    match err.kind() {
        io::ErrorKind::WouldBlock => Liveness::Alive,
        io::ErrorKind::Interrupted => Liveness::Indeterminate(err),
        kind @ (io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof) => Liveness::Dead(PoolError::Broken(kind)),
        _ => Liveness::Indeterminate(err),
    }
}
