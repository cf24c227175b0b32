//! Length-prefixed message framing for chatrelay.
//!
//! Every message is framed with a 4-byte big-endian (network order) payload
//! length followed by the UTF-8 payload. Readers either return a complete
//! message or report that none is available; callers never see a partially
//! filled payload.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, encode_message, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
