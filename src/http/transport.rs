use std::io;

use tokio::net::TcpStream;

/// Non-blocking byte transport under a connection.
///
/// Both calls must return `ErrorKind::WouldBlock` instead of waiting. A read
/// of zero bytes means the peer closed its sending side.
pub trait Transport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl Transport for TcpStream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}
