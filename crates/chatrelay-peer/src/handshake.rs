use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use chatrelay_frame::{FrameError, FrameReader, FrameWriter};

use crate::error::{PeerError, Result};

/// Prefix of the client's first frame: `NAME: <display-name>`.
pub const NAME_PREFIX: &str = "NAME: ";
/// Prefix of the server's reply: `CLIENT: <observed-remote-host>`.
pub const CLIENT_PREFIX: &str = "CLIENT: ";

const MAX_NAME_LEN: usize = 128;
const MAX_HOST_LEN: usize = 255;

/// Configuration for the join handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Overall deadline for receiving the peer's handshake frame.
    ///
    /// `None` waits forever, which lets a silent peer stall the server loop.
    pub timeout: Option<Duration>,
    /// Maximum handshake frame payload size in bytes.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(5)),
            max_handshake_payload: 16 * 1024,
        }
    }
}

/// What the client learns from a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// The display name that was announced.
    pub name: String,
    /// Our address as the server sees it.
    pub observed_host: String,
}

/// Client side: announce `name`, then wait for the server's address reply.
pub fn handshake_client<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    name: &str,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_name(name)?;
    writer.send_message(&format!("{NAME_PREFIX}{name}"))?;

    let reply = recv_handshake_message(reader, config)?;
    let host = field_after(&reply, CLIENT_PREFIX)?;
    if host.is_empty() || host.len() > MAX_HOST_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid observed host length: {}",
            host.len()
        )));
    }

    Ok(HandshakeResult {
        name: name.to_string(),
        observed_host: host.to_string(),
    })
}

/// Server side: read the client's name, then reply with the address we see.
///
/// Returns the declared display name.
pub fn handshake_server<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    peer_addr: SocketAddr,
    config: &HandshakeConfig,
) -> Result<String> {
    let announcement = recv_handshake_message(reader, config)?;
    let name = field_after(&announcement, NAME_PREFIX)?;
    validate_name(name)?;

    writer.send_message(&format!("{CLIENT_PREFIX}{}", peer_addr.ip()))?;
    Ok(name.to_string())
}

/// Socket read timeout to apply while a handshake runs.
///
/// Reads are sliced to at most `slice` so the deadline is rechecked at
/// least that often. `None` leaves the handshake unbounded.
pub(crate) fn handshake_read_timeout(
    timeout: Option<Duration>,
    slice: Option<Duration>,
) -> Option<Duration> {
    let timeout = timeout?;
    let bounded = slice.map_or(timeout, |slice| timeout.min(slice));
    Some(bounded.max(Duration::from_millis(1)))
}

fn recv_handshake_message<R: Read>(
    reader: &mut FrameReader<R>,
    config: &HandshakeConfig,
) -> Result<String> {
    // Handshake uses a tighter pre-join payload budget; restore afterwards.
    let runtime_max = reader.config().max_payload_size;
    reader.set_max_payload_size(config.max_handshake_payload);
    let result = recv_until_deadline(reader, config.timeout);
    reader.set_max_payload_size(runtime_max);
    result
}

fn recv_until_deadline<R: Read>(
    reader: &mut FrameReader<R>,
    timeout: Option<Duration>,
) -> Result<String> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let received = match deadline {
            Some(deadline) => reader.read_message_until(deadline),
            None => reader.read_message(),
        };
        match received {
            Ok(Some(message)) => return Ok(message),
            Ok(None) => {
                return Err(PeerError::Disconnected(
                    "connection closed during handshake".to_string(),
                ))
            }
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                match (deadline, timeout) {
                    (Some(deadline), Some(timeout)) => {
                        if Instant::now() >= deadline {
                            return Err(PeerError::Timeout(timeout));
                        }
                    }
                    _ => return Err(PeerError::Frame(FrameError::Io(err))),
                }
            }
            Err(FrameError::PayloadTooLarge { size, max }) => {
                return Err(PeerError::HandshakeFailed(format!(
                    "handshake payload too large: {size} (max {max})"
                )))
            }
            Err(err) => return Err(PeerError::Frame(err)),
        }
    }
}

/// Text following the first occurrence of `prefix`.
fn field_after<'a>(message: &'a str, prefix: &str) -> Result<&'a str> {
    message
        .split_once(prefix)
        .map(|(_, rest)| rest)
        .ok_or_else(|| {
            PeerError::HandshakeFailed(format!("expected '{}' frame", prefix.trim_end()))
        })
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid display name length: {}",
            name.len()
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(PeerError::HandshakeFailed(
            "display name contains control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::os::unix::net::UnixStream;
    use std::thread;

    use bytes::BytesMut;
    use chatrelay_frame::{decode_frame, encode_frame};

    use super::*;

    fn wire(messages: &[&str]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for message in messages {
            encode_frame(message.as_bytes(), &mut buf).unwrap();
        }
        buf.to_vec()
    }

    fn sent(writer: FrameWriter<Cursor<Vec<u8>>>) -> Vec<String> {
        let mut buf = BytesMut::from(writer.into_inner().into_inner().as_slice());
        let mut out = Vec::new();
        while let Some(frame) = decode_frame(&mut buf, usize::MAX).unwrap() {
            out.push(frame.as_text().unwrap().to_string());
        }
        out
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50123".parse().unwrap()
    }

    #[test]
    fn server_reads_name_and_replies_with_host() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["NAME: alice"])));
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));

        let name =
            handshake_server(&mut reader, &mut writer, peer(), &HandshakeConfig::default())
                .unwrap();

        assert_eq!(name, "alice");
        assert_eq!(sent(writer), vec!["CLIENT: 127.0.0.1"]);
    }

    #[test]
    fn server_rejects_missing_prefix() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["hello there"])));
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));

        let err = handshake_server(&mut reader, &mut writer, peer(), &HandshakeConfig::default())
            .unwrap_err();
        assert!(matches!(err, PeerError::HandshakeFailed(_)));
        assert!(sent(writer).is_empty(), "no reply to a bad announcement");
    }

    #[test]
    fn server_rejects_empty_name() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["NAME: "])));
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));

        let err = handshake_server(&mut reader, &mut writer, peer(), &HandshakeConfig::default())
            .unwrap_err();
        assert!(matches!(err, PeerError::HandshakeFailed(_)));
    }

    #[test]
    fn server_reports_disconnect_before_name() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));

        let err = handshake_server(&mut reader, &mut writer, peer(), &HandshakeConfig::default())
            .unwrap_err();
        assert!(matches!(err, PeerError::Disconnected(_)));
    }

    #[test]
    fn oversized_announcement_rejected() {
        let long = format!("NAME: {}", "x".repeat(64));
        let mut reader = FrameReader::new(Cursor::new(wire(&[&long])));
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        let config = HandshakeConfig {
            max_handshake_payload: 16,
            ..HandshakeConfig::default()
        };

        let err = handshake_server(&mut reader, &mut writer, peer(), &config).unwrap_err();
        assert!(matches!(err, PeerError::HandshakeFailed(_)));
        assert_eq!(
            reader.config().max_payload_size,
            chatrelay_frame::DEFAULT_MAX_PAYLOAD,
            "runtime payload cap is restored"
        );
    }

    #[test]
    fn silent_peer_times_out() {
        let (local, _remote) = UnixStream::pair().unwrap();
        local
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let mut reader = FrameReader::new(local);
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        let config = HandshakeConfig {
            timeout: Some(Duration::from_millis(50)),
            ..HandshakeConfig::default()
        };

        let err = handshake_server(&mut reader, &mut writer, peer(), &config).unwrap_err();
        assert!(matches!(err, PeerError::Timeout(_)));
    }

    #[test]
    fn trickling_peer_cannot_outlast_deadline() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        local
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();

        let trickle = thread::spawn(move || {
            if remote.write_all(&50u32.to_be_bytes()).is_err() {
                return;
            }
            for _ in 0..50 {
                thread::sleep(Duration::from_millis(10));
                if remote.write_all(b"x").is_err() {
                    return;
                }
            }
        });

        let mut reader = FrameReader::new(local);
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        let config = HandshakeConfig {
            timeout: Some(Duration::from_millis(60)),
            ..HandshakeConfig::default()
        };

        let started = Instant::now();
        let err = handshake_server(&mut reader, &mut writer, peer(), &config).unwrap_err();
        assert!(matches!(err, PeerError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_millis(300));

        drop(reader);
        trickle.join().unwrap();
    }

    #[test]
    fn handshake_reads_are_sliced() {
        let ms = Duration::from_millis;
        assert_eq!(handshake_read_timeout(Some(ms(5000)), Some(ms(100))), Some(ms(100)));
        assert_eq!(handshake_read_timeout(Some(ms(50)), Some(ms(100))), Some(ms(50)));
        assert_eq!(handshake_read_timeout(Some(ms(0)), None), Some(ms(1)));
        assert_eq!(handshake_read_timeout(None, Some(ms(100))), None);
    }

    #[test]
    fn client_sends_name_and_parses_reply() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["CLIENT: 10.1.2.3"])));
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));

        let result =
            handshake_client(&mut reader, &mut writer, "bob", &HandshakeConfig::default())
                .unwrap();

        assert_eq!(result.name, "bob");
        assert_eq!(result.observed_host, "10.1.2.3");
        assert_eq!(sent(writer), vec!["NAME: bob"]);
    }

    #[test]
    fn client_rejects_invalid_name_before_sending() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));

        let err = handshake_client(&mut reader, &mut writer, "bad\nname", &HandshakeConfig::default())
            .unwrap_err();
        assert!(matches!(err, PeerError::HandshakeFailed(_)));
        assert!(sent(writer).is_empty());
    }

    #[test]
    fn client_rejects_unexpected_reply() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["WELCOME"])));
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));

        let err = handshake_client(&mut reader, &mut writer, "bob", &HandshakeConfig::default())
            .unwrap_err();
        assert!(matches!(err, PeerError::HandshakeFailed(_)));
    }

    #[test]
    fn roundtrip_over_socket_pair() {
        let (client_sock, server_sock) = UnixStream::pair().unwrap();

        let server = thread::spawn(move || {
            let mut reader = FrameReader::new(server_sock.try_clone().unwrap());
            let mut writer = FrameWriter::new(server_sock);
            handshake_server(&mut reader, &mut writer, peer(), &HandshakeConfig::default())
                .unwrap()
        });

        let mut reader = FrameReader::new(client_sock.try_clone().unwrap());
        let mut writer = FrameWriter::new(client_sock);
        let result =
            handshake_client(&mut reader, &mut writer, "carol", &HandshakeConfig::default())
                .unwrap();

        assert_eq!(server.join().unwrap(), "carol");
        assert_eq!(result.observed_host, "127.0.0.1");
    }
}
