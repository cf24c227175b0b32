use std::io::{self, ErrorKind, Read};
use std::time::Instant;

use bytes::BytesMut;
use chatrelay_transport::ChatStream;
use tracing::trace;

use crate::codec::{decode_frame, payload_len, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// The reader never asks the stream for more bytes than the current frame
/// still needs, so no later frame is ever parked in user space where a
/// readiness poll cannot see it.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Ok(None)` when the stream ends before a whole frame arrived,
    /// whether that is a clean EOF, a truncated length prefix, or a payload
    /// cut short. If the underlying read fails (including a read timeout),
    /// the bytes received so far are kept and the next call resumes.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.read_frame_inner(None)
    }

    /// Like [`read_frame`](Self::read_frame), but gives up with a
    /// `TimedOut` I/O error once `deadline` passes, even while bytes keep
    /// arriving. Partial bytes are kept.
    ///
    /// At least one read is attempted, so the bound is `deadline` plus one
    /// read timeout of the underlying stream.
    pub fn read_frame_until(&mut self, deadline: Instant) -> Result<Option<Frame>> {
        self.read_frame_inner(Some(deadline))
    }

    /// Read the next text message (blocking).
    ///
    /// A zero-length payload carries no message and is reported as
    /// `Ok(None)`, the same as a closed stream.
    pub fn read_message(&mut self) -> Result<Option<String>> {
        let frame = self.read_frame()?;
        message_of(frame)
    }

    /// [`read_message`](Self::read_message) bounded by `deadline`.
    pub fn read_message_until(&mut self, deadline: Instant) -> Result<Option<String>> {
        let frame = self.read_frame_until(deadline)?;
        message_of(frame)
    }

    fn read_frame_inner(&mut self, deadline: Option<Instant>) -> Result<Option<Frame>> {
        if !self.fill(HEADER_SIZE, deadline)? {
            return Ok(None);
        }

        let len = payload_len(&self.buf);
        if len > self.config.max_payload_size {
            // The stream is out of sync from here on.
            self.buf.clear();
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.config.max_payload_size,
            });
        }

        if !self.fill(HEADER_SIZE + len, deadline)? {
            return Ok(None);
        }

        decode_frame(&mut self.buf, self.config.max_payload_size)
    }

    /// Whether part of a frame has been received but not yet returned.
    pub fn has_partial_frame(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Read until `self.buf` holds `want` bytes. Returns `false` on EOF.
    fn fill(&mut self, want: usize, deadline: Option<Instant>) -> Result<bool> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        while self.buf.len() < want {
            let need = (want - self.buf.len()).min(READ_CHUNK_SIZE);
            let read = match self.inner.read(&mut chunk[..need]) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if !self.buf.is_empty() {
                    trace!(
                        buffered = self.buf.len(),
                        wanted = want,
                        "stream closed mid-frame"
                    );
                }
                self.buf.clear();
                return Ok(false);
            }

            self.buf.extend_from_slice(&chunk[..read]);

            if self.buf.len() < want && deadline.is_some_and(|d| Instant::now() >= d) {
                trace!(
                    buffered = self.buf.len(),
                    wanted = want,
                    "read deadline passed mid-frame"
                );
                return Err(FrameError::Io(io::Error::new(
                    ErrorKind::TimedOut,
                    "frame read deadline passed",
                )));
            }
        }
        Ok(true)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<ChatStream> {
    /// Create a frame reader for `ChatStream` and apply read timeout from config.
    pub fn with_config_tcp(inner: ChatStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }

    /// Change the read timeout on the underlying stream.
    pub fn set_read_timeout(&mut self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner
            .set_read_timeout(timeout)
            .map_err(transport_to_frame_error)?;
        self.config.read_timeout = timeout;
        Ok(())
    }
}

fn message_of(frame: Option<Frame>) -> Result<Option<String>> {
    match frame {
        Some(frame) if !frame.payload.is_empty() => Ok(Some(frame.as_text()?.to_owned())),
        _ => Ok(None),
    }
}

pub(crate) fn transport_to_frame_error(err: chatrelay_transport::TransportError) -> FrameError {
    match err {
        chatrelay_transport::TransportError::Io(io)
        | chatrelay_transport::TransportError::Accept(io)
        | chatrelay_transport::TransportError::Poll(io) => FrameError::Io(io),
        chatrelay_transport::TransportError::Bind { source, .. }
        | chatrelay_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::encode_frame;

    fn wire(messages: &[&str]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for message in messages {
            encode_frame(message.as_bytes(), &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_message() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["hello"])));
        assert_eq!(reader.read_message().unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn read_multiple_messages() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["one", "two", "three"])));

        assert_eq!(reader.read_message().unwrap().as_deref(), Some("one"));
        assert_eq!(reader.read_message().unwrap().as_deref(), Some("two"));
        assert_eq!(reader.read_message().unwrap().as_deref(), Some("three"));
        assert_eq!(reader.read_message().unwrap(), None);
    }

    #[test]
    fn read_frame_with_large_payload() {
        let payload = "a".repeat(64 * 1024);
        let mut reader = FrameReader::new(Cursor::new(wire(&[&payload])));
        let frame = reader.read_frame().unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), payload.as_bytes());
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&["slow"]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);
        assert_eq!(reader.read_message().unwrap().as_deref(), Some("slow"));
    }

    #[test]
    fn never_reads_past_frame_boundary() {
        let tracking = TrackingReader {
            inner: Cursor::new(wire(&["first", "second"])),
            consumed: 0,
        };
        let mut reader = FrameReader::new(tracking);

        assert_eq!(reader.read_message().unwrap().as_deref(), Some("first"));
        assert_eq!(reader.get_ref().consumed, HEADER_SIZE + "first".len());
        assert!(!reader.has_partial_frame());
    }

    #[test]
    fn connection_closed_cleanly_is_absent() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn short_length_prefix_is_absent() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x00, 0x00]));
        assert!(reader.read_message().unwrap().is_none());
        assert!(!reader.has_partial_frame());
    }

    #[test]
    fn connection_closed_mid_payload_is_absent() {
        let mut partial = BytesMut::new();
        partial.put_u32(16);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn zero_length_payload_is_no_message() {
        let mut reader = FrameReader::new(Cursor::new(vec![0, 0, 0, 0]));
        assert!(reader.read_message().unwrap().is_none());
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let mut buf = BytesMut::new();
        encode_frame(&[0xC3, 0x28], &mut buf).unwrap();
        let mut reader = FrameReader::new(Cursor::new(buf.to_vec()));
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, FrameError::InvalidUtf8(_)));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let mut wire = BytesMut::new();
        wire.put_u32(1024);

        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 1024, max: 16 }));
    }

    #[test]
    fn resumes_after_would_block_mid_frame() {
        let bytes = wire(&["resume"]);
        let reader = StallingReader {
            bytes,
            pos: 0,
            stall_at: HEADER_SIZE + 2,
            stalled: false,
        };
        let mut framed = FrameReader::new(reader);

        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
        assert!(framed.has_partial_frame());

        assert_eq!(framed.read_message().unwrap().as_deref(), Some("resume"));
        assert!(!framed.has_partial_frame());
    }

    #[test]
    fn deadline_stops_a_trickling_sender() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&["trickle"]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        let err = reader.read_frame_until(Instant::now()).unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::TimedOut));
        assert_eq!(reader.get_ref().pos, 1, "one read per expired call");
        assert!(reader.has_partial_frame());

        assert_eq!(reader.read_message().unwrap().as_deref(), Some("trickle"));
    }

    #[test]
    fn deadline_in_the_future_reads_whole_frame() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&["in time"]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);
        let deadline = Instant::now() + std::time::Duration::from_secs(10);

        assert_eq!(
            reader.read_message_until(deadline).unwrap().as_deref(),
            Some("in time")
        );
        assert!(!reader.has_partial_frame());
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            state: 0,
            inner: Cursor::new(wire(&["ok"])),
        };
        let mut framed = FrameReader::new(reader);
        assert_eq!(framed.read_message().unwrap().as_deref(), Some("ok"));
    }

    #[test]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.send_message("ping").unwrap();
        writer.send_message("pong").unwrap();
        assert_eq!(reader.read_message().unwrap().as_deref(), Some("ping"));
        assert_eq!(reader.read_message().unwrap().as_deref(), Some("pong"));

        drop(writer);
        assert_eq!(reader.read_message().unwrap(), None);
    }

    #[test]
    fn payload_split_across_writes_from_another_thread() {
        let (mut left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let bytes = wire(&["split across writes"]);

        let writer = std::thread::spawn(move || {
            use std::io::Write;
            for piece in bytes.chunks(3) {
                left.write_all(piece).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
        });

        let mut reader = FrameReader::new(right);
        assert_eq!(
            reader.read_message().unwrap().as_deref(),
            Some("split across writes")
        );
        writer.join().unwrap();
    }

    #[test]
    fn applies_read_timeout_for_tcp_stream() {
        let listener = chatrelay_transport::ChatListener::bind("127.0.0.1", 0).unwrap();
        let port = listener.local_addr().port();
        let _client = chatrelay_transport::ChatListener::connect("127.0.0.1", port).unwrap();
        let (stream, _) = listener.accept().unwrap();

        let cfg = FrameConfig {
            read_timeout: Some(std::time::Duration::from_millis(10)),
            ..FrameConfig::default()
        };

        let mut reader = FrameReader::with_config_tcp(stream, cfg).unwrap();
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut
        ));
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = FrameReader::new(cursor);

        reader.set_max_payload_size(8);
        assert_eq!(reader.config().max_payload_size, 8);
        let _ = reader.get_ref();
        let _ = reader.get_mut();
        let _inner = reader.into_inner();
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct TrackingReader {
        inner: Cursor<Vec<u8>>,
        consumed: usize,
    }

    impl Read for TrackingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.consumed += n;
            Ok(n)
        }
    }

    struct StallingReader {
        bytes: Vec<u8>,
        pos: usize,
        stall_at: usize,
        stalled: bool,
    }

    impl Read for StallingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos == self.stall_at && !self.stalled {
                self.stalled = true;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            let limit = if self.stalled {
                self.bytes.len()
            } else {
                self.stall_at
            };
            let n = (limit - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct InterruptedThenData {
        state: u8,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
