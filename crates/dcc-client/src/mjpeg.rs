//! MJPEG stream splitting
//!
//! The live-view port serves multipart JPEG. Rather than parsing multipart
//! boundaries we scan for JPEG start/end markers, which also copes with
//! servers that send bare concatenated frames.

use bytes::Bytes;
use std::collections::VecDeque;
use tracing::warn;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Default cap on a single buffered frame (8 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Incremental JPEG frame extractor
#[derive(Debug)]
pub struct MjpegSplitter {
    /// Bytes of the frame still being received
    buffer: Vec<u8>,
    ready: VecDeque<Bytes>,
    max_frame_bytes: usize,
}

impl Default for MjpegSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl MjpegSplitter {
    /// Create a splitter that drops partial frames above `max_frame_bytes`
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(64 * 1024),
            ready: VecDeque::new(),
            max_frame_bytes,
        }
    }

    /// Append a chunk from the network. Complete frames are queued first;
    /// the cap applies only to the trailing partial frame.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        while let Some(frame) = self.take_frame() {
            self.ready.push_back(frame);
        }

        if self.buffer.len() > self.max_frame_bytes {
            warn!(
                "Live view frame exceeded {} bytes without end marker, discarding",
                self.max_frame_bytes
            );
            self.buffer.clear();
        }
    }

    /// Pop the next complete JPEG frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Bytes> {
        self.ready.pop_front()
    }

    fn take_frame(&mut self) -> Option<Bytes> {
        let start = match find(&self.buffer, &SOI, 0) {
            Some(idx) => idx,
            None => {
                // Keep a trailing 0xFF in case the marker straddles chunks
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                let drop_len = self.buffer.len() - keep;
                self.buffer.drain(..drop_len);
                return None;
            }
        };

        if start > 0 {
            self.buffer.drain(..start);
        }

        let end = find(&self.buffer, &EOI, SOI.len())?;
        let frame: Vec<u8> = self.buffer.drain(..end + EOI.len()).collect();
        Some(Bytes::from(frame))
    }

    /// Bytes of the partial frame currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < from + 2 {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn jpeg(payload: &[u8]) -> Vec<u8> {
        let mut v = SOI.to_vec();
        v.extend_from_slice(payload);
        v.extend_from_slice(&EOI);
        v
    }

    #[test]
    fn test_frames_across_chunks() {
        let mut splitter = MjpegSplitter::default();
        let mut stream = b"--boundary\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        stream.extend(jpeg(b"first"));
        stream.extend_from_slice(b"\r\n--boundary\r\nContent-Type: image/jpeg\r\n\r\n");
        stream.extend(jpeg(b"second"));

        let mut frames = Vec::new();
        for chunk in stream.chunks(7) {
            splitter.push(chunk);
            while let Some(frame) = splitter.next_frame() {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), jpeg(b"first").as_slice());
        assert_eq!(frames[1].as_ref(), jpeg(b"second").as_slice());
    }

    #[test]
    fn test_incomplete_frame_waits() {
        let mut splitter = MjpegSplitter::default();
        splitter.push(&[0xFF, 0xD8, 1, 2, 3]);
        assert!(splitter.next_frame().is_none());
        splitter.push(&[0xFF, 0xD9]);
        assert_eq!(splitter.next_frame().unwrap().len(), 7);
        assert_eq!(splitter.buffered(), 0);
    }

    #[test]
    fn test_oversized_frame_discarded() {
        let mut splitter = MjpegSplitter::new(16);
        splitter.push(&[0xFF, 0xD8]);
        splitter.push(&[0u8; 32]);
        assert_eq!(splitter.buffered(), 0);
        assert!(splitter.next_frame().is_none());
    }

    #[test]
    fn test_cap_keeps_complete_frames_from_same_chunk() {
        let mut splitter = MjpegSplitter::new(16);
        let mut chunk = jpeg(b"one");
        chunk.extend(jpeg(b"two"));
        chunk.extend_from_slice(&[0xFF, 0xD8]);
        chunk.extend_from_slice(&[0u8; 32]);

        splitter.push(&chunk);
        assert_eq!(splitter.buffered(), 0);
        assert_eq!(splitter.next_frame().unwrap().as_ref(), jpeg(b"one").as_slice());
        assert_eq!(splitter.next_frame().unwrap().as_ref(), jpeg(b"two").as_slice());
        assert!(splitter.next_frame().is_none());
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_frames(
            payloads in prop::collection::vec(prop::collection::vec(0u8..0xFF, 0..64), 1..8),
            chunk_size in 1usize..48,
        ) {
            let mut stream = Vec::new();
            for payload in &payloads {
                stream.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
                stream.extend(jpeg(payload));
                stream.extend_from_slice(b"\r\n");
            }

            let mut splitter = MjpegSplitter::default();
            let mut frames = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                splitter.push(chunk);
                while let Some(frame) = splitter.next_frame() {
                    frames.push(frame.to_vec());
                }
            }

            let expected: Vec<Vec<u8>> = payloads.iter().map(|p| jpeg(p)).collect();
            prop_assert_eq!(frames, expected);
        }
    }
}
