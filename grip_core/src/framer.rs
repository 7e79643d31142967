//! Reassembles serial read chunks into fixed-length instrument responses.

/// Fixed-length framer. Serial reads may split or merge packets arbitrarily;
/// `push` returns every complete frame in arrival order and keeps the tail.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    len: usize,
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(len: usize) -> Self {
        Self {
            len: len.max(1),
            buf: Vec::with_capacity(len.max(1) * 2),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.len
    }

    /// Switch to a new frame length. Any partial frame is dropped since it
    /// belonged to the previous response format.
    pub fn set_frame_len(&mut self, len: usize) {
        if !self.buf.is_empty() {
            tracing::debug!(dropped = self.buf.len(), "framer: discarding partial frame");
        }
        self.len = len.max(1);
        self.buf.clear();
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let complete = self.buf.len() / self.len;
        if complete == 0 {
            return Vec::new();
        }
        let take = complete * self.len;
        let frames = self.buf[..take]
            .chunks_exact(self.len)
            .map(<[u8]>::to_vec)
            .collect();
        self.buf.drain(..take);
        frames
    }

    /// Bytes buffered towards the next frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_reads_are_joined() {
        let mut f = FrameAssembler::new(6);
        assert!(f.push(b"000").is_empty());
        assert_eq!(f.pending(), 3);
        let frames = f.push(b"123");
        assert_eq!(frames, vec![b"000123".to_vec()]);
        assert_eq!(f.pending(), 0);
    }

    #[test]
    fn merged_reads_are_split_in_order() {
        let mut f = FrameAssembler::new(2);
        let frames = f.push(&[1, 2, 3, 4, 5]);
        assert_eq!(frames, vec![vec![1, 2], vec![3, 4]]);
        assert_eq!(f.pending(), 1);
        assert_eq!(f.push(&[6]), vec![vec![5, 6]]);
    }

    #[test]
    fn changing_length_drops_the_tail() {
        let mut f = FrameAssembler::new(6);
        let _ = f.push(b"0001");
        f.set_frame_len(11);
        assert_eq!(f.pending(), 0);
        assert_eq!(f.frame_len(), 11);
    }
}
