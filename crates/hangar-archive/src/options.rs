use crate::sniff::DEFAULT_WINDOW;

/// Read size for single-stream decompression.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtractOptions {
    pub chunk_size:   usize,
    pub sniff_window: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            chunk_size:   DEFAULT_CHUNK_SIZE,
            sniff_window: DEFAULT_WINDOW,
        }
    }
}

impl ExtractOptions {
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    pub fn sniff_window(mut self, bytes: usize) -> Self {
        self.sniff_window = bytes.max(512);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ExtractOptions::default();
        assert_eq!(options.chunk_size, 4096);
        assert_eq!(options.sniff_window, 8 * 1024);
    }

    #[test]
    fn builder_clamps_degenerate_values() {
        let options = ExtractOptions::default().chunk_size(0).sniff_window(16);
        assert_eq!(options.chunk_size, 1);
        assert_eq!(options.sniff_window, 512);
    }
}
