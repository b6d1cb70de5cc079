//! Kernel error codes (`spec.md` §6 "Error codes", §7 tier 1).
//!
//! A dense enumeration starting at 1; 0 is success and is modeled as `Ok(())`
//! rather than as a variant, so every fallible kernel entry point returns
//! [`KResult<T>`] instead of a raw integer. Specific semantics match
//! historical Unix where the spec calls it out explicitly (`EEXIST`, `EISDIR`,
//! `ENOTDIR`, `EXDEV`, `EBUSY`, `EFBIG`, ...).

use thiserror::Error;

/// Convenience alias used throughout the crate for fallible kernel operations.
pub type KResult<T> = Result<T, Errno>;

/// Dense error enumeration, `repr(i32)` so a numeric code can be written back
/// into a trap frame register exactly as `spec.md` §6 describes the syscall
/// return convention.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Errno {
    #[error("function not implemented")]
    Enosys = 1,
    #[error("out of memory")]
    Enomem = 2,
    #[error("resource temporarily unavailable")]
    Eagain = 3,
    #[error("interrupted system call")]
    Eintr = 4,
    #[error("bad address")]
    Efault = 5,
    #[error("file name too long")]
    Enametoolong = 6,
    #[error("invalid argument")]
    Einval = 7,
    #[error("operation not permitted")]
    Eperm = 8,
    #[error("permission denied")]
    Eacces = 9,
    #[error("no such file or directory")]
    Enoent = 10,
    #[error("file exists")]
    Eexist = 11,
    #[error("is a directory")]
    Eisdir = 12,
    #[error("not a directory")]
    Enotdir = 13,
    #[error("cross-device link")]
    Exdev = 14,
    #[error("device or resource busy")]
    Ebusy = 15,
    #[error("file too large")]
    Efbig = 16,
    #[error("no such device")]
    Enodev = 17,
    #[error("no space left on device")]
    Enospc = 18,
    #[error("read-only file system")]
    Erofs = 19,
    #[error("too many open files")]
    Emfile = 20,
    #[error("too many open files in system")]
    Enfile = 21,
    #[error("bad file descriptor")]
    Ebadf = 22,
    #[error("illegal seek")]
    Espipe = 23,
    #[error("broken pipe")]
    Epipe = 24,
    #[error("argument list too long")]
    E2big = 25,
    #[error("no such device or address")]
    Enxio = 26,
    #[error("input/output error")]
    Eio = 27,
    #[error("no child processes")]
    Echild = 28,
    #[error("no such process")]
    Esrch = 29,
    #[error("directory not empty")]
    Enotempty = 30,
    #[error("too many levels of symbolic links")]
    Eloop = 31,
    #[error("numerical argument out of domain")]
    Edom = 32,
    #[error("numerical result out of range")]
    Erange = 33,
    #[error("resource deadlock would occur")]
    Edeadlk = 34,
    #[error("no locks available")]
    Enolck = 35,
    #[error("inappropriate ioctl for device")]
    Enotty = 36,
    #[error("text file busy")]
    Etxtbsy = 37,
    #[error("too many links")]
    Emlink = 38,
    #[error("no message of desired type")]
    Enomsg = 39,
    #[error("value too large for defined data type")]
    Eoverflow = 40,
    #[error("operation would block")]
    Ewouldblock = 41,
    #[error("connection refused")]
    Econnrefused = 42,
    #[error("connection reset by peer")]
    Econnreset = 43,
    #[error("network is down")]
    Enetdown = 44,
    #[error("no route to host")]
    Ehostunreach = 45,
    #[error("address already in use")]
    Eaddrinuse = 46,
    #[error("not a socket")]
    Enotsock = 47,
    #[error("protocol not supported")]
    Eprotonosupport = 48,
    #[error("message too long")]
    Emsgsize = 49,
    #[error("operation canceled")]
    Ecanceled = 50,
    #[error("stale file handle")]
    Estale = 51,
    #[error("disk quota exceeded")]
    Edquot = 52,
    #[error("not a typewriter")]
    Enostr = 53,
    #[error("protocol error")]
    Eproto = 54,
    #[error("timer expired")]
    Etime = 55,
    #[error("owner died")]
    Eownerdead = 56,
    #[error("state not recoverable")]
    Enotrecoverable = 57,
    #[error("identifier removed")]
    Eidrm = 58,
    #[error("multihop attempted")]
    Emultihop = 59,
    #[error("no such attribute")]
    Enodata = 60,
    #[error("operation in progress")]
    Einprogress = 61,
    #[error("already in progress")]
    Ealready = 62,
    #[error("bad message")]
    Ebadmsg = 63,
    #[error("operation not supported")]
    Enotsup = 64,
}

static_assertions::const_assert_eq!(crate::param::NUM_ERRNO, 64);

impl Errno {
    /// Numeric code, matching the convention in `spec.md` §6: a dense
    /// enumeration starting at 1 (0 == success, which is not representable
    /// here since success is `Ok(())`).
    pub fn code(self) -> i32 {
        self as i32
    }
}
