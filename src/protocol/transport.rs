use std::io::{self, ErrorKind, Read, Write};

use thiserror::Error;

use super::codec::{CodecError, Encoder, Reader};

const INITIAL_BUFFER: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to decode message: {0}")]
    Codec(#[from] CodecError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether the error is a read timeout, i.e. the peer went quiet.
    pub fn is_timeout(&self) -> bool {
        let kind = match self {
            TransportError::Io(e) => e.kind(),
            TransportError::Codec(CodecError::Io(e)) => e.kind(),
            _ => return false,
        };
        matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
    }
}

/// Buffered, strictly alternating request/response channel.
///
/// Reads pull bytes through [`Reader`]; responses are accumulated in [`ProtocolTransport::output`]
/// and only reach the peer on [`ProtocolTransport::write`]. A new read must not start while a
/// response is still buffered.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
    input: Vec<u8>,
    start: usize,
    end: usize,
    output: Encoder,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            input: vec![0; INITIAL_BUFFER],
            start: 0,
            end: 0,
            output: Encoder::new(),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    /// Number of received bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.end - self.start
    }

    /// Blocks until at least `n` unread bytes are available and returns a view of
    /// them without consuming anything.
    pub fn need(&mut self, n: usize) -> Result<&[u8], TransportError> {
        self.fill(n)?;
        Ok(&self.input[self.start..self.start + n])
    }

    /// Waits for the first byte of the next request. Returns `false` when the peer
    /// closed the connection cleanly.
    pub fn wait_readable(&mut self) -> Result<bool, TransportError> {
        if self.buffered() > 0 {
            return Ok(true);
        }
        match self.fill(1) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Drops any unread input, returning how many bytes were thrown away.
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffered();
        self.start = 0;
        self.end = 0;
        dropped
    }

    /// Pending output for the current response.
    pub fn output(&mut self) -> &mut Encoder {
        &mut self.output
    }

    /// Sends all pending output. Everything buffered has been handed to the stream
    /// once this returns.
    pub fn write(&mut self) -> Result<(), TransportError> {
        self.stream.write_all(self.output.as_bytes())?;
        self.stream.flush()?;
        self.output.clear();
        Ok(())
    }

    fn fill(&mut self, n: usize) -> io::Result<()> {
        while self.buffered() < n {
            if self.start > 0 {
                self.input.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            }
            // Only a full buffer grows; a claimed length alone never sizes it.
            if self.end == self.input.len() {
                let grown = (self.input.len() * 2).min(n.max(self.input.len() + 1));
                self.input.resize(grown, 0);
            }

            match self.stream.read(&mut self.input[self.end..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    ));
                }
                Ok(read) => self.end += read,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<T: Read + Write> Reader for ProtocolTransport<T> {
    fn take(&mut self, n: usize) -> Result<&[u8], CodecError> {
        debug_assert!(
            self.output.is_empty(),
            "request read started before the previous response was written"
        );
        if let Err(e) = self.fill(n) {
            return Err(match e.kind() {
                ErrorKind::UnexpectedEof => CodecError::Truncated {
                    needed: n - self.buffered(),
                },
                _ => CodecError::Io(e),
            });
        }
        let start = self.start;
        self.start += n;
        Ok(&self.input[start..start + n])
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::protocol::codec::MAX_LENGTH;

    use super::*;

    /// Hands out at most one byte per read and records everything written.
    struct Trickle {
        input: Vec<u8>,
        pos: usize,
        written: Vec<u8>,
    }

    impl Trickle {
        fn new(input: &[u8]) -> Self {
            Self {
                input: input.to_vec(),
                pos: 0,
                written: Vec::new(),
            }
        }
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos >= self.input.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.input[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn need_waits_for_partial_reads() {
        let mut transport = ProtocolTransport::new(Trickle::new(b"hello world"));

        assert_eq!(transport.need(5).unwrap(), b"hello");
        assert_eq!(transport.take(6).unwrap(), b"hello ");
        assert_eq!(transport.take(5).unwrap(), b"world");
        assert_eq!(transport.buffered(), 0);
    }

    #[test]
    fn need_grows_past_initial_buffer() {
        let data: Vec<u8> = (0..INITIAL_BUFFER * 3).map(|i| i as u8).collect();
        let mut transport = ProtocolTransport::new(Cursor::new(data.clone()));

        assert_eq!(transport.need(data.len()).unwrap(), &data[..]);
    }

    #[test]
    fn claimed_length_does_not_size_the_buffer() {
        let mut enc = Encoder::new();
        enc.put_int(MAX_LENGTH as i64);
        enc.put_raw(b"abc");
        let mut transport = ProtocolTransport::new(Cursor::new(enc.into_inner()));

        let err = transport.get_buf().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(transport.input.len(), INITIAL_BUFFER);
    }

    #[test]
    fn buffer_grows_with_received_data() {
        let data = vec![7; INITIAL_BUFFER + 1];
        let mut transport = ProtocolTransport::new(Cursor::new(data));

        assert!(transport.need(INITIAL_BUFFER * 16).is_err());
        assert_eq!(transport.buffered(), INITIAL_BUFFER + 1);
        assert_eq!(transport.input.len(), INITIAL_BUFFER * 2);
    }

    #[test]
    fn decodes_values_straight_from_stream() {
        let mut enc = Encoder::new();
        enc.put_int(-12345);
        enc.put_str("name");
        let mut transport = ProtocolTransport::new(Trickle::new(enc.as_bytes()));

        assert_eq!(transport.get_int().unwrap(), -12345);
        assert_eq!(transport.get_str().unwrap(), "name");
    }

    #[test]
    fn eof_mid_message_is_truncation() {
        let mut transport = ProtocolTransport::new(Trickle::new(&[4, b'a']));

        let err = transport.get_str().unwrap_err();
        assert!(matches!(err, CodecError::Truncated { needed: 1 }));
    }

    #[test]
    fn wait_readable_reports_clean_close() {
        let mut transport = ProtocolTransport::new(Trickle::new(&[]));
        assert!(!transport.wait_readable().unwrap());

        let mut transport = ProtocolTransport::new(Trickle::new(&[7]));
        assert!(transport.wait_readable().unwrap());
        assert_eq!(transport.get_byte().unwrap(), 7);
    }

    #[test]
    fn write_flushes_output() {
        let mut transport = ProtocolTransport::new(Trickle::new(&[]));
        transport.output().put_bool(true);
        transport.output().put_str("ok");
        transport.write().unwrap();

        assert!(transport.output().is_empty());
        assert_eq!(transport.get_ref().written, vec![1, 4, b'o', b'k']);
    }

    #[test]
    fn discard_drops_unread_input() {
        let mut transport = ProtocolTransport::new(Cursor::new(vec![1, 2, 3]));
        transport.need(1).unwrap();
        assert_eq!(transport.discard(), 3);
        assert_eq!(transport.buffered(), 0);
    }
}
