//! TLS record buffers in main SRAM
//!
//! embedded-tls needs a read buffer for one full TLS 1.3 record plus
//! overhead and a write buffer for one outgoing record. The firmware
//! keeps a single pair of static buffers, so at most one session socket
//! can be secured at a time; [`claim`] hands them out behind a flag.
//!
//! **Read Buffer (18 KB)**:
//! - TLS 1.3 maximum plaintext: 16384 bytes
//! - Record header (5 bytes), AEAD tag (16 bytes), padding allowance
//!
//! **Write Buffer (16 KB)**: we control outgoing record sizes.

#![allow(unsafe_code)] // Required for static mut buffers

use core::sync::atomic::{AtomicBool, Ordering};

const TLS_READ_BUF_SIZE: usize = 18 * 1024;
const TLS_WRITE_BUF_SIZE: usize = 16 * 1024;

static mut TLS_READ_BUF: [u8; TLS_READ_BUF_SIZE] = [0; TLS_READ_BUF_SIZE];
static mut TLS_WRITE_BUF: [u8; TLS_WRITE_BUF_SIZE] = [0; TLS_WRITE_BUF_SIZE];

/// Set while a [`TlsBuffers`] is alive
static CLAIMED: AtomicBool = AtomicBool::new(false);

/// Exclusive access to the TLS record buffers, released on drop
pub struct TlsBuffers {
    read: &'static mut [u8],
    write: &'static mut [u8],
}

impl TlsBuffers {
    /// Borrow both buffers for one TLS connection
    pub fn split(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut *self.read, &mut *self.write)
    }
}

impl Drop for TlsBuffers {
    fn drop(&mut self) {
        CLAIMED.store(false, Ordering::Release);
    }
}

/// Take the TLS buffers, or `None` if another session holds them
pub fn claim() -> Option<TlsBuffers> {
    if CLAIMED.swap(true, Ordering::AcqRel) {
        return None;
    }
    // SAFETY: CLAIMED guarantees a single live TlsBuffers, and the statics
    // are never touched outside this function.
    let (read, write) = unsafe {
        (
            &mut *core::ptr::addr_of_mut!(TLS_READ_BUF),
            &mut *core::ptr::addr_of_mut!(TLS_WRITE_BUF),
        )
    };
    Some(TlsBuffers {
        read: read.as_mut_slice(),
        write: write.as_mut_slice(),
    })
}
