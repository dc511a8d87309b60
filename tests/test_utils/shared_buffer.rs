//! In-memory writer for capturing local sink output.

use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
};

/// Cloneable byte buffer implementing `io::Write`.
///
/// Clones share the same storage, so a test can keep one clone while the
/// sink owns another.
#[derive(Clone, Default)]
pub struct SharedBuf {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuf {
    /// Return the captured output split into lines.
    pub fn lines(&self) -> Vec<String> {
        let bytes = self.buffer.lock().expect("SharedBuf mutex poisoned").clone();
        String::from_utf8(bytes)
            .expect("sink output is UTF-8")
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .expect("SharedBuf mutex poisoned")
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
