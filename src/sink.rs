use std::borrow::Cow;
use std::io::{self, Write};
use std::str;

/// An opaque output position taken by [`Sink::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Snapshot(usize);

impl Snapshot {
    pub const fn new(position: usize) -> Self {
        Self(position)
    }

    pub const fn position(self) -> usize {
        self.0
    }
}

/// A transactional destination for generated text.
///
/// The VM takes a snapshot whenever it installs a rescue point and restores
/// it when it backtracks to that point. Snapshots nest: a restore only ever
/// targets the most recent snapshot that has not yet been popped, so a sink
/// can be as simple as a growable buffer that truncates on restore.
///
/// This is implemented for
/// - `Vec<u8>` and `String` to collect output in memory
/// - [`Buffered`] to collect output in memory and copy it to a writer on [`Sink::close`]
/// - [`Direct`] to stream into a writer (can not restore)
/// - [`Limited`] to cap how much another sink accepts
pub trait Sink {
    /// Appends `bytes` at the current position, returning how many were written.
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Returns the current position.
    fn snapshot(&self) -> Snapshot;

    /// Rolls the output back to `snapshot`.
    fn restore(&mut self, snapshot: Snapshot) -> io::Result<()>;

    /// Returns what was written since `snapshot`, or `None` if this sink can
    /// not read back its output.
    fn written_since(&self, snapshot: Snapshot) -> Option<Cow<'_, [u8]>>;

    /// Releases the sink. The caller closes a sink, never the VM.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).write(bytes)
    }
    fn snapshot(&self) -> Snapshot {
        (**self).snapshot()
    }
    fn restore(&mut self, snapshot: Snapshot) -> io::Result<()> {
        (**self).restore(snapshot)
    }
    fn written_since(&self, snapshot: Snapshot) -> Option<Cow<'_, [u8]>> {
        (**self).written_since(snapshot)
    }
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

fn out_of_range(snapshot: Snapshot, len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("snapshot {} is past the end of output ({})", snapshot.0, len),
    )
}

impl Sink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(bytes);
        Ok(bytes.len())
    }
    fn snapshot(&self) -> Snapshot {
        Snapshot(self.len())
    }
    fn restore(&mut self, snapshot: Snapshot) -> io::Result<()> {
        if snapshot.0 > self.len() {
            return Err(out_of_range(snapshot, self.len()));
        }
        self.truncate(snapshot.0);
        Ok(())
    }
    fn written_since(&self, snapshot: Snapshot) -> Option<Cow<'_, [u8]>> {
        self.get(snapshot.0..).map(Cow::Borrowed)
    }
}

/// Only accepts UTF-8; restoring into the middle of a character is an error.
impl Sink for String {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let s = str::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.push_str(s);
        Ok(bytes.len())
    }
    fn snapshot(&self) -> Snapshot {
        Snapshot(self.len())
    }
    fn restore(&mut self, snapshot: Snapshot) -> io::Result<()> {
        if !self.is_char_boundary(snapshot.0) {
            return Err(out_of_range(snapshot, self.len()));
        }
        self.truncate(snapshot.0);
        Ok(())
    }
    fn written_since(&self, snapshot: Snapshot) -> Option<Cow<'_, [u8]>> {
        self.as_bytes().get(snapshot.0..).map(Cow::Borrowed)
    }
}

/// Collects output in memory and copies it to the wrapped writer on [`Sink::close`].
///
/// Restoring only moves the logical end of the output back; the bytes past it
/// stay in the buffer (a disowned tail) until they are overwritten. Only the
/// first [`Buffered::valid_len`] bytes are ever copied to the writer.
#[derive(Debug)]
pub struct Buffered<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    position: usize,
}

impl<W: Write> Buffered<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            position: 0,
        }
    }

    /// Length of the output that is actually part of the result.
    pub fn valid_len(&self) -> usize {
        self.position
    }

    /// Returns the valid output written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.position]
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Sink for Buffered<W> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let end = self.position + bytes.len();
        let overlap = end.min(self.buffer.len());
        if overlap > self.position {
            self.buffer[self.position..overlap].copy_from_slice(&bytes[..overlap - self.position]);
        }
        self.buffer.extend_from_slice(&bytes[overlap - self.position..]);
        self.position = end;
        Ok(bytes.len())
    }
    fn snapshot(&self) -> Snapshot {
        Snapshot(self.position)
    }
    fn restore(&mut self, snapshot: Snapshot) -> io::Result<()> {
        if snapshot.0 > self.buffer.len() {
            return Err(out_of_range(snapshot, self.buffer.len()));
        }
        self.position = snapshot.0;
        Ok(())
    }
    fn written_since(&self, snapshot: Snapshot) -> Option<Cow<'_, [u8]>> {
        self.buffer.get(snapshot.0..self.position).map(Cow::Borrowed)
    }
    fn close(&mut self) -> io::Result<()> {
        self.inner.write_all(&self.buffer[..self.position])?;
        self.buffer.clear();
        self.position = 0;
        self.inner.flush()
    }
}

/// Streams output straight into the wrapped writer.
///
/// It keeps a byte count in place of a real position and can not restore or
/// read back. Use it only for programs where
/// [`crate::Program::may_restore_output`] is `false`.
#[derive(Debug)]
pub struct Direct<W: Write> {
    inner: W,
    written: usize,
}

impl<W: Write> Direct<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Sink for Direct<W> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.inner.write_all(bytes)?;
        self.written += bytes.len();
        Ok(bytes.len())
    }
    fn snapshot(&self) -> Snapshot {
        Snapshot(self.written)
    }
    fn restore(&mut self, snapshot: Snapshot) -> io::Result<()> {
        if snapshot.0 == self.written {
            return Ok(());
        }
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "direct output can not be restored",
        ))
    }
    fn written_since(&self, _: Snapshot) -> Option<Cow<'_, [u8]>> {
        None
    }
    fn close(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Fails any write that would take the wrapped sink past `limit` bytes.
///
/// Generation has no built-in time limit; this is how a caller bounds the
/// output of a grammar that could otherwise grow without end.
#[derive(Debug)]
pub struct Limited<S> {
    inner: S,
    limit: usize,
}

impl<S: Sink> Limited<S> {
    pub fn new(inner: S, limit: usize) -> Self {
        Self { inner, limit }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Sink> Sink for Limited<S> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if self.inner.snapshot().0 + bytes.len() > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("output limit of {} bytes reached", self.limit),
            ));
        }
        self.inner.write(bytes)
    }
    fn snapshot(&self) -> Snapshot {
        self.inner.snapshot()
    }
    fn restore(&mut self, snapshot: Snapshot) -> io::Result<()> {
        self.inner.restore(snapshot)
    }
    fn written_since(&self, snapshot: Snapshot) -> Option<Cow<'_, [u8]>> {
        self.inner.written_since(snapshot)
    }
    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    // `Vec<u8>` is also `io::Write`, so keep that trait out of scope here.
    use super::{Buffered, Direct, Limited, Sink, Snapshot};

    #[test]
    fn nested_snapshots_vec() {
        let mut out = Vec::new();
        out.write(b"ab").unwrap();
        let outer = out.snapshot();
        out.write(b"cd").unwrap();
        let inner = out.snapshot();
        out.write(b"ef").unwrap();
        assert_eq!(out.written_since(outer).unwrap().as_ref(), b"cdef");
        out.restore(inner).unwrap();
        assert_eq!(out, b"abcd");
        out.restore(outer).unwrap();
        assert_eq!(out, b"ab");
        assert!(out.restore(Snapshot::new(10)).is_err());
    }

    #[test]
    fn string_rejects_split_char() {
        let mut out = String::new();
        out.write("é".as_bytes()).unwrap();
        assert!(out.restore(Snapshot::new(1)).is_err());
        assert!(out.write(&[0xff]).is_err());
        out.restore(Snapshot::new(0)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn buffered_keeps_disowned_tail() {
        let mut out = Buffered::new(Vec::new());
        out.write(b"hello").unwrap();
        let s = out.snapshot();
        out.write(b" world").unwrap();
        out.restore(Snapshot::new(2)).unwrap();
        assert_eq!(out.valid_len(), 2);
        assert_eq!(out.as_bytes(), b"he");
        out.write(b"y").unwrap();
        assert_eq!(out.as_bytes(), b"hey");
        assert!(s.position() > out.valid_len());
        out.write(b"!!!!!!!!!").unwrap();
        assert_eq!(out.as_bytes(), b"hey!!!!!!!!!");
        out.close().unwrap();
        assert_eq!(out.into_inner(), b"hey!!!!!!!!!");
    }

    #[test]
    fn direct_is_not_restorable() {
        let mut out = Direct::new(Vec::new());
        let start = out.snapshot();
        out.write(b"abc").unwrap();
        assert!(out.written_since(start).is_none());
        assert!(out.restore(start).is_err());
        out.restore(out.snapshot()).unwrap();
        assert_eq!(out.into_inner(), b"abc");
    }

    #[test]
    fn limited_fails_past_budget() {
        let mut out = Limited::new(Vec::new(), 4);
        out.write(b"abc").unwrap();
        assert!(out.write(b"de").is_err());
        out.write(b"d").unwrap();
        assert_eq!(out.into_inner(), b"abcd");
    }
}
