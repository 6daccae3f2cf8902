//! Framed file transfer over a byte stream.
//!
//! A frame is a filename line, a decimal length line and exactly that many
//! payload bytes. There is no escaping and no checksum: the length line is
//! the only thing separating one frame's payload from whatever follows it.

pub mod codec;
pub mod error;
pub mod session;

pub use codec::{read_frame, write_frame, TransferHeader};
pub use error::TransferError;
pub use session::{receive_file, receive_frames, receive_whole_stream, send_file, ReceivedFile};
