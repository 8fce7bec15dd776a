//! Virtual filesystem: path lookup, a tagged node dispatch table, and
//! mountpoint substitution over pluggable backends. Ground: `SPEC_FULL.md`
//! §4.7/§4.7a, `original_source/kernel/fs/vfs.c`.
//!
//! Nodes carry a table of `Option<fn>` capability pointers instead of a
//! trait object, matching the original's plain-C dispatch table (§9):
//! a missing pointer means the node type does not support that
//! operation, and the call fails rather than panicking.

extern crate alloc;

pub mod devfs;
pub mod procfs;
pub mod ramfs;

use crate::error::{KernelError, KernelResult};
use crate::sync::spinlock::Spinlock;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// What kind of object a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    CharDevice,
    BlockDevice,
}

/// Per-node state, tagged by backend. Kept as a plain enum rather than a
/// trait object so the dispatch table above stays the only indirection.
pub enum NodeData {
    RamFile(Vec<u8>),
    RamDir(alloc::collections::BTreeMap<String, NodeRef>),
    Device(devfs::DeviceOps),
    /// Backend synthesizes its nodes purely from `finddir`/`readdir`
    /// rather than storing anything here (devfs/procfs roots).
    None,
}

/// Capability function pointers a node type implements. Any field left
/// `None` means that operation is unsupported for this node.
#[derive(Clone, Copy)]
pub struct NodeOps {
    pub read: Option<fn(&Node, usize, &mut [u8]) -> KernelResult<usize>>,
    pub write: Option<fn(&Node, usize, &[u8]) -> KernelResult<usize>>,
    pub open: Option<fn(&Node) -> KernelResult<()>>,
    pub close: Option<fn(&Node) -> KernelResult<()>>,
    pub readdir: Option<fn(&Node, usize) -> KernelResult<Option<String>>>,
    pub finddir: Option<fn(&Node, &str) -> KernelResult<NodeRef>>,
    pub create: Option<fn(&Node, &str) -> KernelResult<NodeRef>>,
    pub unlink: Option<fn(&Node, &str) -> KernelResult<()>>,
}

impl NodeOps {
    pub const NONE: Self = Self {
        read: None,
        write: None,
        open: None,
        close: None,
        readdir: None,
        finddir: None,
        create: None,
        unlink: None,
    };
}

/// A single filesystem object.
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub ops: NodeOps,
    pub data: Spinlock<NodeData>,
    /// If this node is a mountpoint, lookups that reach it transparently
    /// continue at this node instead.
    pub mount: Spinlock<Option<NodeRef>>,
}

pub type NodeRef = Arc<Node>;

impl Node {
    pub fn new(name: &str, kind: NodeKind, ops: NodeOps, data: NodeData) -> NodeRef {
        Arc::new(Self {
            name: String::from(name),
            kind,
            ops,
            data: Spinlock::new(data),
            mount: Spinlock::new(None),
        })
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
        (self.ops.read.ok_or(KernelError::PermissionDenied)?)(self, offset, buf)
    }

    pub fn write(&self, offset: usize, buf: &[u8]) -> KernelResult<usize> {
        (self.ops.write.ok_or(KernelError::PermissionDenied)?)(self, offset, buf)
    }

    pub fn open(&self) -> KernelResult<()> {
        match self.ops.open {
            Some(f) => f(self),
            None => Ok(()),
        }
    }

    pub fn close(&self) -> KernelResult<()> {
        match self.ops.close {
            Some(f) => f(self),
            None => Ok(()),
        }
    }

    pub fn readdir(&self, index: usize) -> KernelResult<Option<String>> {
        (self.ops.readdir.ok_or(KernelError::PermissionDenied)?)(self, index)
    }

    pub fn finddir(&self, name: &str) -> KernelResult<NodeRef> {
        (self.ops.finddir.ok_or(KernelError::NotFound)?)(self, name)
    }

    /// The node a lookup should continue at once it reaches `self`: the
    /// mounted root if one was installed here, or `self` unchanged.
    fn mount_target(self_ref: &NodeRef) -> NodeRef {
        self_ref
            .mount
            .lock()
            .clone()
            .unwrap_or_else(|| self_ref.clone())
    }

    pub fn create(&self, name: &str) -> KernelResult<NodeRef> {
        (self.ops.create.ok_or(KernelError::PermissionDenied)?)(self, name)
    }

    pub fn unlink(&self, name: &str) -> KernelResult<()> {
        (self.ops.unlink.ok_or(KernelError::PermissionDenied)?)(self, name)
    }

}

/// Mounts `root` at `node`; subsequent lookups that reach `node` continue
/// inside `root` instead.
pub fn mount(node: &NodeRef, root: NodeRef) {
    *node.mount.lock() = Some(root);
}

static ROOT: Spinlock<Option<NodeRef>> = Spinlock::new(None);

/// Initializes the VFS root as a ramfs directory and mounts devfs at
/// `/dev` and procfs at `/proc`.
pub fn init() {
    let root = ramfs::new_fs();
    let dev = devfs::new_fs();
    let proc = procfs::new_fs();
    root.create("dev").ok();
    root.create("proc").ok();
    if let Ok(dev_mountpoint) = root.finddir("dev") {
        mount(&dev_mountpoint, dev);
    }
    if let Ok(proc_mountpoint) = root.finddir("proc") {
        mount(&proc_mountpoint, proc);
    }
    *ROOT.lock() = Some(root);
}

/// Resolves an absolute path from the VFS root, substituting mountpoints
/// transparently as each component is traversed.
pub fn lookup(path: &str) -> KernelResult<NodeRef> {
    let mut current = ROOT.lock().clone().ok_or(KernelError::Fatal)?;
    current = Node::mount_target(&current);
    for component in path.split('/').filter(|c| !c.is_empty()) {
        current = current.finddir(component)?;
        current = Node::mount_target(&current);
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn root_lookup_of_empty_path_returns_root() {
        init();
        assert!(lookup("").is_ok());
    }

    #[test_case]
    fn dev_and_proc_are_mounted_at_init() {
        init();
        assert!(lookup("dev").is_ok());
        assert!(lookup("proc").is_ok());
    }

    #[test_case]
    fn missing_component_fails_lookup() {
        init();
        assert!(lookup("does/not/exist").is_err());
    }
}
