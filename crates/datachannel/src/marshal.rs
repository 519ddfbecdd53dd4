//! String results from caller-sized buffers

use crate::error::{check_size, RtcError, RtcResult};
use std::ffi::{c_char, c_int, CStr};

/// Buffer size for descriptions, addresses and candidates
pub const STRING_BUFFER_SIZE: usize = 65535;

/// Buffer size for channel labels and protocols
pub const LABEL_BUFFER_SIZE: usize = 8192;

/// Runs a buffer query and decodes the NUL-terminated result.
///
/// The engine returns the written size including the terminator; a result
/// that does not fit is reported as [`RtcError::BufferTooSmall`].
pub(crate) fn read_string(
    capacity: usize,
    query: impl FnOnce(&mut [u8]) -> c_int,
) -> RtcResult<String> {
    let mut buffer = vec![0u8; capacity];
    let written = check_size(query(&mut buffer))?;
    if written > buffer.len() {
        return Err(RtcError::BufferTooSmall);
    }
    decode(&buffer[..written])
}

/// Decodes a buffer filled by the engine, up to the first NUL
pub(crate) fn decode(bytes: &[u8]) -> RtcResult<String> {
    let text = match bytes.iter().position(|b| *b == 0) {
        Some(nul) => &bytes[..nul],
        None => bytes,
    };
    String::from_utf8(text.to_vec()).map_err(|e| RtcError::parse(e.to_string()))
}

/// Copies a string handed to a callback.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string valid for the
/// duration of the call.
pub(crate) unsafe fn callback_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// Copies a message handed to a message callback; `size < 0` marks a
/// NUL-terminated text message.
///
/// # Safety
///
/// `ptr` must be null or point to `size` readable bytes (or a NUL-terminated
/// string when `size < 0`) valid for the duration of the call.
pub(crate) unsafe fn callback_message<'a>(ptr: *const c_char, size: c_int) -> &'a [u8] {
    if ptr.is_null() {
        return &[];
    }
    if size < 0 {
        CStr::from_ptr(ptr).to_bytes()
    } else {
        std::slice::from_raw_parts(ptr.cast::<u8>(), size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datachannel_engine::ffi::copy_to_buffer;
    use std::ffi::CString;

    #[test]
    fn test_read_string() {
        let value = read_string(16, |buf| copy_to_buffer("label", buf)).unwrap();
        assert_eq!(value, "label");
    }

    #[test]
    fn test_read_empty_string() {
        let value = read_string(16, |buf| copy_to_buffer("", buf)).unwrap();
        assert_eq!(value, "");
    }

    #[test]
    fn test_read_string_errors() {
        assert!(matches!(
            read_string(4, |buf| copy_to_buffer("too long", buf)),
            Err(RtcError::BufferTooSmall)
        ));
        assert!(matches!(
            read_string(4, |_| -3),
            Err(RtcError::NotAvailable)
        ));
        assert!(matches!(read_string(4, |_| 0), Err(RtcError::Failure)));
    }

    #[test]
    fn test_callback_message() {
        let text = CString::new("hi").unwrap();
        let bytes = unsafe { callback_message(text.as_ptr(), -3) };
        assert_eq!(bytes, b"hi");

        let binary = [1u8, 0, 2];
        let bytes = unsafe { callback_message(binary.as_ptr().cast(), 3) };
        assert_eq!(bytes, &[1, 0, 2]);

        assert!(unsafe { callback_message(std::ptr::null(), 4) }.is_empty());
        assert_eq!(unsafe { callback_string(std::ptr::null()) }, None);
    }
}
