//! Devices (`spec.md` §4.6 "named-device table"): vnodes that are always
//! present, independent of any mounted filesystem, reached by `devname:`.

use std::sync::Mutex;

use crate::errno::{Errno, KResult};
use crate::vfs::uio::{Uio, UioDirection};
use crate::vfs::vnode::{VnodeOps, VnodeStat, VnodeType};

/// `/dev/null`-alike: reads return EOF, writes are discarded.
pub struct NullDevice;

impl VnodeOps for NullDevice {
    fn read(&self, _uio: &mut Uio<'_>) -> KResult<usize> {
        Ok(0)
    }
    fn write(&self, uio: &mut Uio<'_>) -> KResult<usize> {
        Ok(uio.remaining())
    }
    fn gettype(&self) -> KResult<VnodeType> {
        Ok(VnodeType::CharDevice)
    }
    fn stat(&self) -> KResult<VnodeStat> {
        Ok(VnodeStat::new(VnodeType::CharDevice, 0, 1))
    }
    fn isseekable(&self) -> bool {
        false
    }
}

/// In-memory line console: writes append to an internal buffer, reads drain
/// it in FIFO order. Stands in for the real `con:`/`emu:` serial devices the
/// teaching kernel talks to over actual hardware.
pub struct ConsoleDevice {
    buffer: Mutex<Vec<u8>>,
}

impl ConsoleDevice {
    pub fn new() -> Self {
        Self { buffer: Mutex::new(Vec::new()) }
    }
}

impl Default for ConsoleDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl VnodeOps for ConsoleDevice {
    fn read(&self, uio: &mut Uio<'_>) -> KResult<usize> {
        if uio.direction != UioDirection::Read {
            return Err(Errno::Einval);
        }
        let mut buffer = self.buffer.lock().unwrap();
        let n = uio.remaining().min(buffer.len());
        let mut drained: Vec<u8> = buffer.drain(..n).collect();
        Ok(crate::vfs::uio::uiomove(&mut drained, uio))
    }

    fn write(&self, uio: &mut Uio<'_>) -> KResult<usize> {
        if uio.direction != UioDirection::Write {
            return Err(Errno::Einval);
        }
        let n = uio.remaining();
        let mut chunk = vec![0u8; n];
        let written = crate::vfs::uio::uiomove(&mut chunk, uio);
        self.buffer.lock().unwrap().extend_from_slice(&chunk[..written]);
        Ok(written)
    }

    fn ioctl(&self, _code: u32, _data: usize) -> KResult<()> {
        Ok(())
    }

    fn gettype(&self) -> KResult<VnodeType> {
        Ok(VnodeType::CharDevice)
    }

    fn stat(&self) -> KResult<VnodeStat> {
        let len = self.buffer.lock().unwrap().len() as u64;
        Ok(VnodeStat::new(VnodeType::CharDevice, len, 1))
    }
}
