// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Error taxonomy for the draw pipeline.

Backends convert their native result codes into [Error] at the boundary.  Errors raised on the
render thread are latched into an [ErrorSlot] so that every later flush reports the same failure.
*/

use std::fmt::Display;
use std::sync::OnceLock;

/// `DXGI_ERROR_DEVICE_REMOVED`
pub const DEVICE_REMOVED: i32 = 0x887A0005_u32 as i32;
/// `DXGI_ERROR_DEVICE_HUNG`
pub const DEVICE_HUNG: i32 = 0x887A0006_u32 as i32;
/// `DXGI_ERROR_DEVICE_RESET`
pub const DEVICE_RESET: i32 = 0x887A0007_u32 as i32;
/// `E_OUTOFMEMORY`
pub const E_OUTOFMEMORY: i32 = 0x8007000E_u32 as i32;
/// `E_FAIL`
pub const E_FAIL: i32 = 0x80004005_u32 as i32;
/// `E_INVALIDARG`
pub const E_INVALIDARG: i32 = 0x80070057_u32 as i32;
/// `DXGI_ERROR_INVALID_CALL`
pub const DXGI_ERROR_INVALID_CALL: i32 = 0x887A0001_u32 as i32;
/// `DXGI_ERROR_UNSUPPORTED`
pub const DXGI_ERROR_UNSUPPORTED: i32 = 0x887A0004_u32 as i32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The device is gone.  Unrecoverable.
    DeviceLost,
    /// A buffer, resource or descriptor allocation failed.
    OutOfMemory(&'static str),
    /// The caller passed something the pipeline cannot accept.
    InvalidArgument(String),
    /// A native failure that none of the other kinds describe.
    Backend { code: i32, message: String },
    /// The requested backend, adapter or feature is unavailable.
    Unsupported(String),
    /// The output is not visible.  Recovered locally and never latched.
    Occluded,
    /// Encoding an image dump failed.
    Encode(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DeviceLost => write!(f, "device lost"),
            Error::OutOfMemory(what) => write!(f, "out of memory allocating {}", what),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::Backend { code, message } => {
                write!(f, "backend error 0x{:08X}: {}", *code as u32, message)
            }
            Error::Unsupported(msg) => write!(f, "unsupported: {}", msg),
            Error::Occluded => write!(f, "output occluded"),
            Error::Encode(msg) => write!(f, "encode failed: {}", msg),
        }
    }
}

impl Error {
    /// Maps a native result code onto the taxonomy.
    pub fn from_hresult(code: i32, message: impl Into<String>) -> Self {
        match code {
            DEVICE_REMOVED | DEVICE_HUNG | DEVICE_RESET => Error::DeviceLost,
            E_OUTOFMEMORY => Error::OutOfMemory("native allocation"),
            DXGI_ERROR_UNSUPPORTED => Error::Unsupported(message.into()),
            _ => Error::Backend {
                code,
                message: message.into(),
            },
        }
    }

    /// Transient errors are handled where they occur and must not poison a queue.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Occluded)
    }
}

#[cfg(all(windows, feature = "backend_d3d12"))]
impl From<windows::core::Error> for Error {
    fn from(e: windows::core::Error) -> Self {
        Error::from_hresult(e.code().0, e.message())
    }
}

impl From<png::EncodingError> for Error {
    fn from(e: png::EncodingError) -> Self {
        Error::Encode(e.to_string())
    }
}

/// A write-once error latch.
///
/// The first error stored wins; later errors are logged and dropped.
#[derive(Debug, Default)]
pub struct ErrorSlot(OnceLock<Error>);

impl ErrorSlot {
    pub const fn new() -> Self {
        ErrorSlot(OnceLock::new())
    }

    pub fn get(&self) -> Option<&Error> {
        self.0.get()
    }

    /// Returns the latched error, if any, as a `Result`.
    pub fn check(&self) -> Result<(), Error> {
        match self.0.get() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    pub fn latch(&self, err: Error) {
        debug_assert!(!err.is_transient(), "transient errors are not latched");
        if let Err(err) = self.0.set(err) {
            logwise::warn_sync!(
                "error slot already latched; dropping {err}",
                err = logwise::privacy::LogIt(&err)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hresults_map_onto_kinds() {
        assert_eq!(Error::from_hresult(DEVICE_REMOVED, "x"), Error::DeviceLost);
        assert_eq!(Error::from_hresult(DEVICE_RESET, "x"), Error::DeviceLost);
        assert!(matches!(
            Error::from_hresult(E_OUTOFMEMORY, "x"),
            Error::OutOfMemory(_)
        ));
        assert_eq!(
            Error::from_hresult(E_INVALIDARG, "CreateCommittedResource"),
            Error::Backend {
                code: E_INVALIDARG,
                message: "CreateCommittedResource".to_string()
            }
        );
    }

    #[test]
    fn first_error_wins() {
        let slot = ErrorSlot::new();
        assert!(slot.check().is_ok());
        slot.latch(Error::DeviceLost);
        slot.latch(Error::OutOfMemory("vertex buffer"));
        assert_eq!(slot.check(), Err(Error::DeviceLost));
        assert_eq!(slot.get(), Some(&Error::DeviceLost));
    }

    #[test]
    fn display_includes_code() {
        let e = Error::from_hresult(E_INVALIDARG, "Map");
        assert_eq!(e.to_string(), "backend error 0x80070057: Map");
    }
}
