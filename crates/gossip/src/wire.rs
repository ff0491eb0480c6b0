//! Length prefixed borsh frames and the messages of the blocking sync protocol.
//!
//! A frame is a little-endian `u32` byte count followed by the borsh encoding of one value.

use std::io::{self, Read, Write};

use borsh::{BorshDeserialize, BorshSerialize};
use skein_primitives::event::GossipEvent;
use skein_primitives::hash::Hash;
use skein_primitives::window::EventWindow;
use thiserror::Error;

/// Largest frame accepted from a peer (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// The opening message of every sync: where the sender's window is and what its tips are.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SyncData {
    pub event_window: EventWindow,
    pub tip_hashes: Vec<Hash>,
}

/// Messages of the blocking sync protocol.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum SyncFrame {
    SyncData(SyncData),
    /// For each tip the peer advertised, whether the sender has it.
    Tips(Vec<bool>),
    Event(GossipEvent),
    EndOfEvents,
    Keepalive,
    /// The sender has read the peer's end-of-events and will write nothing further.
    SyncDone,
}

impl SyncFrame {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SyncData(_) => "sync data",
            Self::Tips(_) => "tips",
            Self::Event(_) => "event",
            Self::EndOfEvents => "end of events",
            Self::Keepalive => "keepalive",
            Self::SyncDone => "sync done",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("stream failure")]
    Io(#[from] io::Error),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("malformed frame")]
    Malformed(#[source] io::Error),
}

pub fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), CodecError>
where
    W: Write + ?Sized,
    T: BorshSerialize,
{
    let bytes = borsh::to_vec(value)?;

    let len = u32::try_from(bytes.len())
        .ok()
        .filter(|len| (*len as usize) <= MAX_FRAME_LEN)
        .ok_or(CodecError::FrameTooLarge {
            len: bytes.len(),
            max: MAX_FRAME_LEN,
        })?;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&bytes)?;

    Ok(())
}

pub fn read_frame<R, T>(reader: &mut R) -> Result<T, CodecError>
where
    R: Read + ?Sized,
    T: BorshDeserialize,
{
    let mut prefix = [0; 4];
    reader.read_exact(&mut prefix)?;

    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut bytes = vec![0; len];
    reader.read_exact(&mut bytes)?;

    borsh::from_slice(&bytes).map_err(CodecError::Malformed)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use skein_primitives::node::NodeId;

    use super::*;

    #[test]
    fn test_frames_are_read_back_in_order() {
        let event = GossipEvent::new(NodeId::new(4), 2, vec![], vec![b"tx".to_vec()]);
        let frames = vec![
            SyncFrame::SyncData(SyncData {
                event_window: EventWindow::genesis(),
                tip_hashes: vec![event.hash()],
            }),
            SyncFrame::Tips(vec![true, false]),
            SyncFrame::Event(event),
            SyncFrame::EndOfEvents,
        ];

        let mut buffer = Vec::new();
        for frame in &frames {
            write_frame(&mut buffer, frame).expect("write");
        }

        let mut cursor = Cursor::new(buffer);
        for expected in &frames {
            let frame: SyncFrame = read_frame(&mut cursor).expect("read");
            assert_eq!(&frame, expected, "same frame");
        }
    }

    #[test]
    fn test_oversized_prefix_is_rejected_before_allocating() {
        let mut bytes = u32::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 8]);

        let result: Result<SyncFrame, _> = read_frame(&mut Cursor::new(bytes));

        assert!(
            matches!(result, Err(CodecError::FrameTooLarge { .. })),
            "length checked first"
        );
    }

    #[test]
    fn test_garbage_payload_is_malformed() {
        let mut bytes = 3_u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xff, 0xff]);

        let result: Result<SyncFrame, _> = read_frame(&mut Cursor::new(bytes));

        assert!(matches!(result, Err(CodecError::Malformed(_))), "unknown variant");
    }

    #[test]
    fn test_truncated_stream_is_io_error() {
        let mut bytes = 10_u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 3]);

        let result: Result<SyncFrame, _> = read_frame(&mut Cursor::new(bytes));

        assert!(matches!(result, Err(CodecError::Io(_))), "unexpected eof");
    }
}
