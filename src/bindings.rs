//! C Bindings for PpsChannel
//!
//! Every call returns 0 on success or a positive errno value, the same
//! code that `pps_channel_last_error` reports afterwards.
//!
//! A read into a buffer that is too small fails with `EMSGSIZE` and keeps
//! the snapshot, so the caller can retry with `*out_len` bytes.

use crate::channel::PpsChannel;
use crate::error::PpsError;
use crate::fs::FsTransport;
use crate::transport::OpenMode;
use rustix::io::Errno;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::slice;

// Opaque handle
pub struct PpsChannelHandle {
    channel: PpsChannel<FsTransport>,
    /// Snapshot that did not fit the caller's buffer
    pending: Option<Vec<u8>>,
    last_error: c_int,
}

impl PpsChannelHandle {
    fn new(channel: PpsChannel<FsTransport>) -> Self {
        Self {
            channel,
            pending: None,
            last_error: 0,
        }
    }

    fn settle(&mut self, result: Result<(), PpsError>) -> c_int {
        let code = status(result);
        if code != 0 {
            self.last_error = code;
        }
        code
    }
}

pub const PPS_OPEN_READ: u32 = OpenMode::READ.bits();
pub const PPS_OPEN_WRITE: u32 = OpenMode::WRITE.bits();
pub const PPS_OPEN_CREATE: u32 = OpenMode::CREATE.bits();
pub const PPS_OPEN_TRUNCATE: u32 = OpenMode::TRUNCATE.bits();

fn status(result: Result<(), PpsError>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => e.errno().raw_os_error(),
    }
}

/// Create a closed channel on the node at `path`
///
/// # Safety
/// path must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn pps_channel_create(path: *const c_char) -> *mut PpsChannelHandle {
    if path.is_null() {
        return ptr::null_mut();
    }

    let c_str = CStr::from_ptr(path);
    let str_slice = match c_str.to_str() {
        Ok(s) => s,
        Err(_) => return ptr::null_mut(),
    };

    Box::into_raw(Box::new(PpsChannelHandle::new(PpsChannel::new(str_slice))))
}

/// Destroy a handle, closing the channel
///
/// # Safety
/// handle must come from `pps_channel_create` and not be used afterwards
#[no_mangle]
pub unsafe extern "C" fn pps_channel_destroy(handle: *mut PpsChannelHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Open the node with a combination of `PPS_OPEN_*` flags
///
/// # Safety
/// handle must be a live handle
#[no_mangle]
pub unsafe extern "C" fn pps_channel_open(handle: *mut PpsChannelHandle, mode: u32) -> c_int {
    let Some(handle) = handle.as_mut() else {
        return Errno::INVAL.raw_os_error();
    };
    let result = handle.channel.open(OpenMode::from_bits_truncate(mode));
    if result.is_ok() {
        handle.pending = None;
        handle.last_error = 0;
    }
    handle.settle(result)
}

/// # Safety
/// handle must be a live handle
#[no_mangle]
pub unsafe extern "C" fn pps_channel_close(handle: *mut PpsChannelHandle) -> c_int {
    let Some(handle) = handle.as_mut() else {
        return Errno::INVAL.raw_os_error();
    };
    handle.pending = None;
    let result = handle.channel.close();
    handle.settle(result)
}

/// Read one snapshot into `buf`
///
/// Writes the full snapshot length to `out_len`. If it exceeds `max_len`
/// nothing is copied, `EMSGSIZE` is returned and the next read hands
/// back the same snapshot.
///
/// # Safety
/// handle must be a live handle, buf valid for `max_len` bytes
#[no_mangle]
pub unsafe extern "C" fn pps_channel_read(
    handle: *mut PpsChannelHandle,
    buf: *mut u8,
    max_len: usize,
    out_len: *mut usize,
) -> c_int {
    let Some(handle) = handle.as_mut() else {
        return Errno::INVAL.raw_os_error();
    };
    let data = match handle.pending.take() {
        Some(data) => data,
        None => match handle.channel.read() {
            Ok(data) => data,
            Err(e) => return handle.settle(Err(e)),
        },
    };

    if !out_len.is_null() {
        *out_len = data.len();
    }
    if data.len() > max_len {
        let got = data.len();
        handle.pending = Some(data);
        return handle.settle(Err(PpsError::BufferOverflow { max: max_len, got }));
    }
    if !data.is_empty() {
        if buf.is_null() {
            handle.pending = Some(data);
            return handle.settle(Err(Errno::INVAL.into()));
        }
        slice::from_raw_parts_mut(buf, data.len()).copy_from_slice(&data);
    }
    0
}

/// Publish `len` bytes from `data`
///
/// # Safety
/// handle must be a live handle, data valid for `len` bytes
#[no_mangle]
pub unsafe extern "C" fn pps_channel_write(
    handle: *mut PpsChannelHandle,
    data: *const u8,
    len: usize,
) -> c_int {
    let Some(handle) = handle.as_mut() else {
        return Errno::INVAL.raw_os_error();
    };
    let bytes = if len == 0 || data.is_null() {
        &[][..]
    } else {
        slice::from_raw_parts(data, len)
    };
    let result = handle.channel.write(bytes);
    handle.settle(result)
}

/// # Safety
/// handle must be a live handle
#[no_mangle]
pub unsafe extern "C" fn pps_channel_set_blocking(
    handle: *mut PpsChannelHandle,
    blocking: bool,
) -> c_int {
    let Some(handle) = handle.as_mut() else {
        return Errno::INVAL.raw_os_error();
    };
    let result = handle.channel.set_blocking(blocking);
    handle.settle(result)
}

/// # Safety
/// handle must be a live handle
#[no_mangle]
pub unsafe extern "C" fn pps_channel_is_blocking(handle: *const PpsChannelHandle) -> bool {
    handle.as_ref().map_or(false, |h| h.channel.is_blocking())
}

/// Last error code of the channel, 0 if none
///
/// # Safety
/// handle must be a live handle
#[no_mangle]
pub unsafe extern "C" fn pps_channel_last_error(handle: *const PpsChannelHandle) -> c_int {
    handle.as_ref().map_or(0, |h| h.last_error)
}
