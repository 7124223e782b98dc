//! TCP helpers.
//!
//! # Safety
//!
//! This module uses unsafe code to borrow the raw file descriptor/socket of a
//! compio stream for socket configuration. The borrowed handle is never
//! closed here.

#![allow(unsafe_code)]

use std::io;
use std::net::SocketAddr;

use compio::net::{TcpListener, TcpStream};

/// Enable TCP_NODELAY on a compio TcpStream.
///
/// ZMTP traffic is dominated by small request/reply frames, where Nagle's
/// algorithm only adds latency.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn enable_tcp_nodelay(stream: &TcpStream) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        let fd = stream.as_raw_fd();
        let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
        let result = sock.set_nodelay(true);
        std::mem::forget(sock); // Don't close the fd
        result
    }

    #[cfg(windows)]
    {
        use std::os::windows::io::{AsRawSocket, FromRawSocket};
        let raw = stream.as_raw_socket();
        let sock = unsafe { socket2::Socket::from_raw_socket(raw) };
        let result = sock.set_nodelay(true);
        std::mem::forget(sock); // Don't close the socket
        result
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = stream;
        Ok(())
    }
}

/// Bind a TCP listener.
pub async fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP endpoint, optionally disabling Nagle's algorithm.
pub async fn connect(addr: SocketAddr, nodelay: bool) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    if nodelay {
        enable_tcp_nodelay(&stream)?;
    }
    Ok(stream)
}
