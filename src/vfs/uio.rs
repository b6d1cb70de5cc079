//! I/O descriptors (`spec.md` §4.6 `uio`/`uiomove`).
//!
//! `spec.md`'s `uio` carries a destination segment (user or kernel address
//! space) so a single read/write implementation can serve both syscalls and
//! in-kernel callers. This port has no separate user address space
//! (`SPEC_FULL.md` §A), so [`UioSegment`] is retained for interface fidelity
//! — a real port's VM code would switch on it — but [`uiomove`] treats both
//! variants identically.

/// Which address space a [`Uio`] transfer's buffer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UioSegment {
    UserSpace,
    KernelSpace,
}

/// Direction of a transfer relative to the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UioDirection {
    Read,
    Write,
}

/// Describes one I/O transfer: a caller-owned buffer, an offset into the
/// file/device, and bookkeeping on how much of the buffer has been consumed.
pub struct Uio<'a> {
    buf: &'a mut [u8],
    pub offset: u64,
    pub segment: UioSegment,
    pub direction: UioDirection,
    transferred: usize,
}

impl<'a> Uio<'a> {
    pub fn new(buf: &'a mut [u8], offset: u64, segment: UioSegment, direction: UioDirection) -> Self {
        Self { buf, offset, segment, direction, transferred: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.transferred
    }

    pub fn transferred(&self) -> usize {
        self.transferred
    }
}

/// Copies between `uio`'s buffer and `data`, in the direction recorded on
/// `uio`, advancing both `uio.offset` and its transferred count. Copies
/// `min(uio.remaining(), data.len())` bytes.
///
/// `UioDirection::Read` copies `data` (the source, e.g. file or device
/// contents) into `uio`'s buffer; `UioDirection::Write` copies `uio`'s
/// buffer (the caller-supplied data) into `data` (the sink).
pub fn uiomove(data: &mut [u8], uio: &mut Uio<'_>) -> usize {
    let n = uio.remaining().min(data.len());
    let start = uio.transferred;
    match uio.direction {
        UioDirection::Read => uio.buf[start..start + n].copy_from_slice(&data[..n]),
        UioDirection::Write => data[..n].copy_from_slice(&uio.buf[start..start + n]),
    }
    uio.transferred += n;
    uio.offset += n as u64;
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_direction_copies_source_data_into_callers_buffer() {
        let mut callers_buf = [0u8; 5];
        let mut uio = Uio::new(&mut callers_buf, 0, UioSegment::KernelSpace, UioDirection::Read);
        let mut file_contents = *b"hello";
        let n = uiomove(&mut file_contents, &mut uio);
        assert_eq!(n, 5);
        assert_eq!(&callers_buf, b"hello");
        assert_eq!(uio.offset, 5);
    }

    #[test]
    fn write_direction_copies_callers_buffer_into_sink() {
        let mut callers_buf = *b"hello world";
        let mut uio = Uio::new(&mut callers_buf, 0, UioSegment::KernelSpace, UioDirection::Write);
        let mut sink = [0u8; 11];
        let n = uiomove(&mut sink, &mut uio);
        assert_eq!(n, 11);
        assert_eq!(&sink, b"hello world");
    }

    #[test]
    fn stops_at_buffer_boundary() {
        let mut backing = [0u8; 4];
        let mut uio = Uio::new(&mut backing, 10, UioSegment::UserSpace, UioDirection::Write);
        let mut src = *b"too much data";
        let n = uiomove(&mut src, &mut uio);
        assert_eq!(n, 4);
        assert_eq!(uio.remaining(), 0);
        assert_eq!(uio.offset, 14);
    }
}
