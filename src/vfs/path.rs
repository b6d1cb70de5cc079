//! Path parsing (`spec.md` §4.6 "path resolution grammar").
//!
//! Grounded in the teacher's `fs/path.rs` `skipelem`: walk the string,
//! skipping runs of `/`, taking the next run of non-`/` bytes as a
//! component. The teacher does this over raw byte slices with unsafe
//! `#[repr(transparent)]` casts (it is `no_std`, with no owned `String`);
//! this port works over `&str` instead, since `std` is available and a
//! `String`/`&str`-based API reads naturally for every caller in this crate.

use crate::errno::{Errno, KResult};
use crate::param::NAME_MAX;

/// A parsed OS/161-style path: `dev:path` (named device, path relative to
/// its root), `:path` (current device's root — used for the root of a
/// filesystem during mount), `/path` (root of the process's current
/// filesystem), or a bare relative path (`spec.md` §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsPath {
    pub device: Option<String>,
    pub absolute: bool,
    tail: String,
}

impl VfsPath {
    /// Parses `raw` per the grammar above. Never fails: an empty or
    /// all-slashes path parses to zero components, which callers treat as
    /// "resolves to the starting vnode itself".
    pub fn parse(raw: &str) -> Self {
        if let Some(colon) = raw.find(':') {
            let (maybe_device, rest) = raw.split_at(colon);
            if !maybe_device.contains('/') {
                let tail = &rest[1..];
                let device = if maybe_device.is_empty() { None } else { Some(maybe_device.to_string()) };
                return Self { device, absolute: true, tail: tail.to_string() };
            }
        }
        Self { device: None, absolute: raw.starts_with('/'), tail: raw.to_string() }
    }

    /// Iterates path components, validating each against [`NAME_MAX`].
    pub fn components(&self) -> Components<'_> {
        Components { rest: &self.tail }
    }
}

pub struct Components<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Components<'a> {
    type Item = KResult<&'a str>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.rest.find(|c| c != '/')?;
        let rest = &self.rest[start..];
        let len = rest.find('/').unwrap_or(rest.len());
        let (name, remainder) = rest.split_at(len);
        self.rest = remainder;
        if name.len() > NAME_MAX {
            Some(Err(Errno::Enametoolong))
        } else {
            Some(Ok(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_device_prefix() {
        let p = VfsPath::parse("emu0:a/bb/c");
        assert_eq!(p.device.as_deref(), Some("emu0"));
        assert!(p.absolute);
        let names: Vec<_> = p.components().map(|c| c.unwrap()).collect();
        assert_eq!(names, ["a", "bb", "c"]);
    }

    #[test]
    fn colon_alone_means_current_device_root() {
        let p = VfsPath::parse(":a/b");
        assert_eq!(p.device, None);
        assert!(p.absolute);
        let names: Vec<_> = p.components().map(|c| c.unwrap()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn leading_slash_is_process_root() {
        let p = VfsPath::parse("/a//bb");
        assert_eq!(p.device, None);
        assert!(p.absolute);
        let names: Vec<_> = p.components().map(|c| c.unwrap()).collect();
        assert_eq!(names, ["a", "bb"]);
    }

    #[test]
    fn relative_path_has_no_device_and_is_not_absolute() {
        let p = VfsPath::parse("a/b");
        assert_eq!(p.device, None);
        assert!(!p.absolute);
        let names: Vec<_> = p.components().map(|c| c.unwrap()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn empty_path_has_no_components() {
        let p = VfsPath::parse("");
        assert_eq!(p.components().count(), 0);
    }

    #[test]
    fn oversized_component_is_enametoolong() {
        let long = "a".repeat(NAME_MAX + 1);
        let p = VfsPath::parse(&long);
        let err = p.components().next().unwrap().unwrap_err();
        assert_eq!(err, Errno::Enametoolong);
    }
}
