//! The virtual filesystem layer (`spec.md` §4.6, component 5 of §2):
//! named-device table, mount table, and path resolution over the vnode
//! operation table in [`vnode`].
//!
//! Grounded in the teacher's `fs/mod.rs` `Itable`/device-table split,
//! generalized from one built-in log-structured filesystem to any number of
//! pluggable [`vnode::VnodeOps`] implementations, since `spec.md` treats the
//! filesystem backing a mount as an external collaborator, not something
//! this crate implements itself. The named-device table's `rawname`/id/swap
//! bookkeeping is grounded in `examples/original_source`'s `struct knowndev`
//! (`kern/vfs/vfslist.c`), since the teacher's own device table has no
//! raw-alias concept to generalize from.

pub mod device;
pub mod path;
pub mod uio;
pub mod vnode;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errno::{Errno, KResult};
use crate::lock::{Lock, RawSpinlock};

pub use path::VfsPath;
pub use vnode::{Vnode, VnodeOps, VnodeStat, VnodeType};

/// One entry in the named-device table (`spec.md` §4.6 "Known-device
/// table"). Grounded in the original kernel's `struct knowndev`
/// (`kern/vfs/vfslist.c`): a unique numeric id assigned at registration, an
/// optional `NAMEraw:` alias reaching the device's own vnode even while a
/// filesystem is mounted on it, and a `swap` flag standing in for the
/// original's `SWAP_FS` sentinel fs pointer.
struct NamedDevice {
    /// `index + 1` (`spec.md` §4.6: "a unique numeric id (index+1)"). Not
    /// yet surfaced through the public API — no syscall layer consumes it
    /// here — but assigned at registration as the spec requires, so it is
    /// ready when one does.
    #[allow(dead_code)]
    id: usize,
    rawname: Option<String>,
    vnode: Arc<Vnode>,
    swap: bool,
}

/// One entry in the mount table: the root vnode of the filesystem mounted
/// on a device.
struct Mount {
    root: Arc<Vnode>,
}

/// The virtual filesystem layer: a table of named devices (always present,
/// reachable as `devname:path`) and a table of filesystem mounts layered
/// over some of those devices (`spec.md` §4.6 "Known-device table" /
/// "Mount table").
pub struct Vfs {
    devices: Lock<RawSpinlock, HashMap<String, NamedDevice>>,
    /// `rawname -> primary device name`, so a `NAMEraw:` path resolves
    /// straight to the device's own vnode (`spec.md` §4.6; real OS/161's
    /// `lhd0raw:`), bypassing whatever filesystem is mounted on the primary
    /// name.
    raw_aliases: Lock<RawSpinlock, HashMap<String, String>>,
    mounts: Lock<RawSpinlock, HashMap<String, Mount>>,
    /// Device name backing the process root (`/`), if one has been
    /// designated (`spec.md` §4.6 "bootfs").
    root_device: Lock<RawSpinlock, Option<String>>,
    next_device_id: AtomicUsize,
}

impl Vfs {
    pub fn new() -> Self {
        Self {
            devices: Lock::new(RawSpinlock::new("vfs.devices"), HashMap::new()),
            raw_aliases: Lock::new(RawSpinlock::new("vfs.raw_aliases"), HashMap::new()),
            mounts: Lock::new(RawSpinlock::new("vfs.mounts"), HashMap::new()),
            root_device: Lock::new(RawSpinlock::new("vfs.root_device"), None),
            next_device_id: AtomicUsize::new(0),
        }
    }

    /// Registers a named device vnode together with a `NAMEraw:` alias
    /// (`spec.md` §4.6: devices are always-present, independent of mounts).
    /// The common case: a physical, mountable device. Use
    /// [`Vfs::add_device_unmountable`] for a device that is inherently a
    /// filesystem or can never be mounted (the original kernel leaves
    /// `kd_rawname` unset for both, e.g. `emu0` and the console).
    ///
    /// # Errors
    ///
    /// [`Errno::Ebusy`] if `name` (or its `NAMEraw:` alias) is already
    /// registered.
    pub fn add_device(&self, name: impl Into<String>, vnode: Arc<Vnode>) -> KResult<()> {
        self.register_device(name, vnode, true)
    }

    /// Registers a named device vnode with no `NAMEraw:` alias (`spec.md`
    /// §4.6: the alias is "optional").
    ///
    /// # Errors
    ///
    /// [`Errno::Ebusy`] if `name` is already registered.
    pub fn add_device_unmountable(&self, name: impl Into<String>, vnode: Arc<Vnode>) -> KResult<()> {
        self.register_device(name, vnode, false)
    }

    fn register_device(&self, name: impl Into<String>, vnode: Arc<Vnode>, mountable: bool) -> KResult<()> {
        let name = name.into();
        let mut devices = self.devices.lock();
        if devices.contains_key(&name) {
            return Err(Errno::Ebusy);
        }
        let rawname = if mountable { Some(format!("{name}raw")) } else { None };
        if let Some(raw) = &rawname {
            if devices.contains_key(raw) || self.raw_aliases.lock().contains_key(raw) {
                return Err(Errno::Ebusy);
            }
        }
        let id = self.next_device_id.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(raw) = &rawname {
            self.raw_aliases.lock().insert(raw.clone(), name.clone());
        }
        devices.insert(name, NamedDevice { id, rawname, vnode, swap: false });
        Ok(())
    }

    /// Mounts a filesystem whose root is `root` on device `device`
    /// (`spec.md` §4.6 "mount").
    ///
    /// # Errors
    ///
    /// [`Errno::Enodev`] if `device` isn't registered; [`Errno::Ebusy`] if
    /// something is already mounted there.
    pub fn mount(&self, device: impl Into<String>, root: Arc<Vnode>) -> KResult<()> {
        let device = device.into();
        if !self.devices.lock().contains_key(&device) {
            return Err(Errno::Enodev);
        }
        let mut mounts = self.mounts.lock();
        if mounts.contains_key(&device) {
            return Err(Errno::Ebusy);
        }
        mounts.insert(device, Mount { root });
        Ok(())
    }

    /// Designates `device` (already mounted) as the root filesystem reached
    /// by absolute paths with no explicit device prefix.
    pub fn set_root_device(&self, device: impl Into<String>) -> KResult<()> {
        let device = device.into();
        if !self.mounts.lock().contains_key(&device) {
            return Err(Errno::Enodev);
        }
        *self.root_device.lock() = Some(device);
        Ok(())
    }

    /// Unmounts `device` (`spec.md` §4.6: "`vfs_unmount(devname)` syncs then
    /// unmounts, refusing if the FS is not mounted, is swap, or unmount
    /// returns EBUSY"). Refuses while anything besides the mount table
    /// itself still references the mounted root. The mount table is left
    /// untouched unless the sync and the reclaim both succeed, so a failure
    /// here never leaves the table disagreeing with the vnode's actual
    /// state (`spec.md` §4.6: "the object persists").
    ///
    /// # Errors
    ///
    /// [`Errno::Enodev`] if nothing is mounted on `device`; [`Errno::Ebusy`]
    /// if the mount's root vnode has outstanding references; whatever
    /// [`VnodeOps::fsync`] returns on a sync failure.
    pub fn unmount(&self, device: &str) -> KResult<()> {
        let mut mounts = self.mounts.lock();
        let mount = mounts.get(device).ok_or(Errno::Enodev)?;
        if mount.root.refcount() > 1 {
            return Err(Errno::Ebusy);
        }
        mount.root.ops().fsync()?;
        mount.root.decref()?;
        mounts.remove(device);
        let mut root_device = self.root_device.lock();
        if root_device.as_deref() == Some(device) {
            *root_device = None;
        }
        Ok(())
    }

    /// Unmounts every mount, best-effort (`spec.md` §4.6: "`vfs_unmountall`
    /// tries each in turn, retrying sync once on failure and forcibly
    /// continuing on the second"): a sync failure is retried once, and if
    /// it fails again the unmount proceeds anyway rather than leaving a
    /// mount stuck forever at shutdown. A genuinely busy root (still
    /// referenced) is left mounted and recorded as the first error. Returns
    /// the first error encountered, if any, but still attempts every mount.
    pub fn unmount_all(&self) -> KResult<()> {
        let devices: Vec<String> = self.mounts.lock().keys().cloned().collect();
        let mut first_error = None;
        for device in devices {
            if let Err(e) = self.unmount_one_best_effort(&device) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn unmount_one_best_effort(&self, device: &str) -> KResult<()> {
        let mut mounts = self.mounts.lock();
        let mount = mounts.get(device).ok_or(Errno::Enodev)?;
        if mount.root.refcount() > 1 {
            return Err(Errno::Ebusy);
        }
        if let Err(e) = mount.root.ops().fsync() {
            log::warn!("unmount_all: sync failed for {device}: {e:?}, retrying once");
            if let Err(e) = mount.root.ops().fsync() {
                log::warn!("unmount_all: sync failed twice for {device}: {e:?}, forcing unmount anyway");
            }
        }
        mount.root.decref()?;
        mounts.remove(device);
        let mut root_device = self.root_device.lock();
        if root_device.as_deref() == Some(device) {
            *root_device = None;
        }
        Ok(())
    }

    /// Flushes every mounted filesystem and registered device (`spec.md`
    /// §4.6 "vfs_sync").
    pub fn sync(&self) -> KResult<()> {
        for mount in self.mounts.lock().values() {
            mount.root.ops().fsync()?;
        }
        for device in self.devices.lock().values() {
            device.vnode.ops().fsync()?;
        }
        Ok(())
    }

    /// Marks `device` as backing store for anonymous/swap pages and hands
    /// back a reference-counted handle to its vnode (`spec.md` §4.6:
    /// "`vfs_swapon(devname)` tolerates a trailing colon, marks the device
    /// with a sentinel FS pointer, and returns a reference-counted vnode
    /// for the raw device").
    ///
    /// # Errors
    ///
    /// [`Errno::Enodev`] if `device` isn't registered; [`Errno::Ebusy`] if
    /// already attached as swap or currently mounted.
    pub fn swapon(&self, device: &str) -> KResult<Arc<Vnode>> {
        let device = device.strip_suffix(':').unwrap_or(device);
        if self.mounts.lock().contains_key(device) {
            return Err(Errno::Ebusy);
        }
        let mut devices = self.devices.lock();
        let entry = devices.get_mut(device).ok_or(Errno::Enodev)?;
        if entry.swap {
            return Err(Errno::Ebusy);
        }
        entry.swap = true;
        entry.vnode.incref();
        Ok(Arc::clone(&entry.vnode))
    }

    fn device_vnode(&self, name: &str) -> KResult<Arc<Vnode>> {
        self.devices.lock().get(name).map(|d| Arc::clone(&d.vnode)).ok_or(Errno::Enodev)
    }

    /// Resolves a `dev:` path prefix to its starting vnode (`spec.md` §4.6
    /// path resolution): a `NAMEraw:` alias always resolves to the device's
    /// own vnode, bypassing any mounted filesystem; a mounted device
    /// resolves to its filesystem root; an unmounted (but registered)
    /// device resolves to the device vnode itself.
    fn resolve_device_root(&self, device: &str) -> KResult<Arc<Vnode>> {
        if let Some(primary) = self.raw_aliases.lock().get(device).cloned() {
            return self.device_vnode(&primary);
        }
        if let Some(mount) = self.mounts.lock().get(device) {
            return Ok(Arc::clone(&mount.root));
        }
        self.device_vnode(device)
    }

    /// Resolves `path` to a vnode (`spec.md` §4.6 path resolution). Relative
    /// paths (no leading `/` and no `dev:` prefix) are out of scope: this
    /// crate has no per-process current working directory (`spec.md` §1
    /// scopes process state out), so a relative path always fails with
    /// [`Errno::Einval`].
    pub fn resolve(&self, path: &str) -> KResult<Arc<Vnode>> {
        let parsed = VfsPath::parse(path);

        let mut current = match &parsed.device {
            Some(device) => self.resolve_device_root(device)?,
            None if parsed.absolute => {
                let root_device = self.root_device.lock().clone().ok_or(Errno::Enodev)?;
                self.resolve_device_root(&root_device)?
            }
            None => return Err(Errno::Einval),
        };

        for component in parsed.components() {
            let name = component?;
            current = current.ops().lookup(name)?;
        }
        Ok(current)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::device::NullDevice;
    use std::sync::Mutex;

    struct FakeDir {
        children: Mutex<HashMap<String, Arc<Vnode>>>,
    }

    impl VnodeOps for FakeDir {
        fn lookup(&self, name: &str) -> KResult<Arc<Vnode>> {
            self.children.lock().unwrap().get(name).cloned().ok_or(Errno::Enoent)
        }
        fn gettype(&self) -> KResult<VnodeType> {
            Ok(VnodeType::Directory)
        }
    }

    fn fake_dir_with(entries: Vec<(&str, Arc<Vnode>)>) -> Arc<Vnode> {
        let mut children = HashMap::new();
        for (name, vnode) in entries {
            children.insert(name.to_string(), vnode);
        }
        Vnode::new(Arc::new(FakeDir { children: Mutex::new(children) }))
    }

    #[test]
    fn resolves_device_qualified_path() {
        let vfs = Vfs::new();
        let leaf = Vnode::new(Arc::new(NullDevice));
        let root = fake_dir_with(vec![("a", leaf)]);
        vfs.add_device("emu0", Vnode::new(Arc::new(NullDevice))).unwrap();
        vfs.mount("emu0", root).unwrap();

        let resolved = vfs.resolve("emu0:a").unwrap();
        assert_eq!(resolved.ops().gettype().unwrap(), VnodeType::CharDevice);
    }

    #[test]
    fn resolves_absolute_path_through_root_device() {
        let vfs = Vfs::new();
        let leaf = Vnode::new(Arc::new(NullDevice));
        let root = fake_dir_with(vec![("a", leaf)]);
        vfs.add_device("emu0", Vnode::new(Arc::new(NullDevice))).unwrap();
        vfs.mount("emu0", root).unwrap();
        vfs.set_root_device("emu0").unwrap();

        assert!(vfs.resolve("/a").is_ok());
        assert_eq!(vfs.resolve("/missing").unwrap_err(), Errno::Enoent);
    }

    #[test]
    fn relative_path_is_einval() {
        let vfs = Vfs::new();
        assert_eq!(vfs.resolve("a/b").unwrap_err(), Errno::Einval);
    }

    #[test]
    fn raw_alias_resolves_to_device_vnode_even_while_mounted() {
        let vfs = Vfs::new();
        let root = fake_dir_with(vec![]);
        vfs.add_device("lhd0", Vnode::new(Arc::new(NullDevice))).unwrap();
        vfs.mount("lhd0", root).unwrap();

        let via_raw = vfs.resolve("lhd0raw:").unwrap();
        assert_eq!(via_raw.ops().gettype().unwrap(), VnodeType::CharDevice);
        let via_mount = vfs.resolve("lhd0:").unwrap();
        assert_eq!(via_mount.ops().gettype().unwrap(), VnodeType::Directory);
    }

    #[test]
    fn unmountable_device_registers_no_raw_alias() {
        let vfs = Vfs::new();
        vfs.add_device_unmountable("con", Vnode::new(Arc::new(NullDevice))).unwrap();
        assert_eq!(vfs.resolve("conraw:").unwrap_err(), Errno::Enodev);
    }

    #[test]
    fn unmount_fails_while_root_vnode_still_referenced() {
        let vfs = Vfs::new();
        let root = fake_dir_with(vec![]);
        let kept_alive = Arc::clone(&root);
        vfs.add_device("emu0", Vnode::new(Arc::new(NullDevice))).unwrap();
        vfs.mount("emu0", root).unwrap();
        root_incref_for_test(&kept_alive);

        assert_eq!(vfs.unmount("emu0").unwrap_err(), Errno::Ebusy);
        assert!(vfs.resolve("emu0:").is_ok());
    }

    #[test]
    fn unmount_succeeds_once_refcount_drops() {
        let vfs = Vfs::new();
        let root = fake_dir_with(vec![]);
        vfs.add_device("emu0", Vnode::new(Arc::new(NullDevice))).unwrap();
        vfs.mount("emu0", root).unwrap();

        assert!(vfs.unmount("emu0").is_ok());
        assert_eq!(vfs.unmount("emu0").unwrap_err(), Errno::Enodev);
    }

    fn root_incref_for_test(vnode: &Arc<Vnode>) {
        vnode.incref();
    }

    #[test]
    fn sync_runs_fsync_on_every_mount_and_device() {
        let vfs = Vfs::new();
        let root = fake_dir_with(vec![]);
        vfs.add_device("emu0", Vnode::new(Arc::new(NullDevice))).unwrap();
        vfs.mount("emu0", root).unwrap();
        assert!(vfs.sync().is_ok());
    }

    #[test]
    fn swapon_requires_a_registered_device_and_returns_its_vnode() {
        let vfs = Vfs::new();
        assert_eq!(vfs.swapon("emu0").unwrap_err(), Errno::Enodev);
        vfs.add_device("emu0", Vnode::new(Arc::new(NullDevice))).unwrap();

        let handle = vfs.swapon("emu0:").unwrap();
        assert_eq!(handle.ops().gettype().unwrap(), VnodeType::CharDevice);
        assert_eq!(vfs.swapon("emu0").unwrap_err(), Errno::Ebusy);
    }
}
