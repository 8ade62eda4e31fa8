use std::io::{self, Write};

/// Pass-through writer that remembers how many bytes went through it.
#[derive(Debug)]
pub struct CountedWriter<W> {
    inner:   W,
    written: u64,
}

impl<W> CountedWriter<W> {
    pub fn new(inner: W) -> Self { Self { inner, written: 0 } }

    pub fn bytes_written(&self) -> u64 { self.written }

    pub fn get_ref(&self) -> &W { &self.inner }

    pub fn into_inner(self) -> W { self.inner }
}

impl<W: Write> Write for CountedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> { self.inner.flush() }
}
