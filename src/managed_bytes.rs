// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Pixel payloads with an owner.

A [ManagedBytes] travels with a pixel write through the command queue.  When the command has
executed, the queue keeps it as a finalizer until the end of the frame; dropping it then hands the
buffer back to whoever supplied it, typically a buffer pool.
*/

use std::fmt::Debug;

type Release = Box<dyn FnOnce(Vec<u8>) + Send>;

pub struct ManagedBytes {
    bytes: Vec<u8>,
    release: Option<Release>,
}

impl ManagedBytes {
    /// Wraps `bytes`; `release` receives them back once the pipeline is done.
    pub fn new<F>(bytes: Vec<u8>, release: F) -> Self
    where
        F: FnOnce(Vec<u8>) + Send + 'static,
    {
        ManagedBytes {
            bytes,
            release: Some(Box::new(release)),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for ManagedBytes {
    fn from(bytes: Vec<u8>) -> Self {
        ManagedBytes {
            bytes,
            release: None,
        }
    }
}

impl Debug for ManagedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedBytes")
            .field("len", &self.bytes.len())
            .field("managed", &self.release.is_some())
            .finish()
    }
}

impl Drop for ManagedBytes {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(std::mem::take(&mut self.bytes));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn drop_returns_the_buffer() {
        let returned = Arc::new(Mutex::new(None));
        let r = returned.clone();
        let bytes = ManagedBytes::new(vec![1, 2, 3], move |b| *r.lock().unwrap() = Some(b));
        assert_eq!(bytes.as_slice(), &[1, 2, 3]);
        assert!(returned.lock().unwrap().is_none());
        drop(bytes);
        assert_eq!(returned.lock().unwrap().as_deref(), Some(&[1u8, 2, 3][..]));
    }
}
