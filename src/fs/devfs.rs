//! `/dev` backend: a registration table mapping device names to
//! read/write callbacks supplied by the driver layer. Ground:
//! `SPEC_FULL.md` §4.7a, `original_source/fs/devfs.c`.
//!
//! This module owns only the dispatch table and `register` API; it does
//! not implement any concrete device (drivers are out of scope).

use super::{Node, NodeData, NodeKind, NodeOps, NodeRef};
use crate::error::{KernelError, KernelResult};
use crate::sync::spinlock::Spinlock;
use alloc::collections::BTreeMap;
use alloc::string::String;

/// Read/write callback pair a driver registers for one device node.
#[derive(Clone, Copy)]
pub struct DeviceOps {
    pub read: Option<fn(offset: usize, buf: &mut [u8]) -> KernelResult<usize>>,
    pub write: Option<fn(offset: usize, buf: &[u8]) -> KernelResult<usize>>,
}

static REGISTRY: Spinlock<BTreeMap<String, DeviceOps>> = Spinlock::new(BTreeMap::new());

/// Registers a character/block device under `/dev/<name>`.
pub fn register(name: &str, ops: DeviceOps) {
    REGISTRY.lock().insert(String::from(name), ops);
}

/// Unregisters a previously registered device.
pub fn unregister(name: &str) {
    REGISTRY.lock().remove(name);
}

fn device_read(node: &Node, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
    let data = node.data.lock();
    let NodeData::Device(ops) = &*data else {
        return Err(KernelError::InvalidArgument);
    };
    (ops.read.ok_or(KernelError::PermissionDenied)?)(offset, buf)
}

fn device_write(node: &Node, offset: usize, buf: &[u8]) -> KernelResult<usize> {
    let data = node.data.lock();
    let NodeData::Device(ops) = &*data else {
        return Err(KernelError::InvalidArgument);
    };
    (ops.write.ok_or(KernelError::PermissionDenied)?)(offset, buf)
}

const DEVICE_OPS: NodeOps = NodeOps { read: Some(device_read), write: Some(device_write), ..NodeOps::NONE };

fn root_finddir(_node: &Node, name: &str) -> KernelResult<NodeRef> {
    let ops = REGISTRY.lock().get(name).copied().ok_or(KernelError::NotFound)?;
    Ok(Node::new(name, NodeKind::CharDevice, DEVICE_OPS, NodeData::Device(ops)))
}

fn root_readdir(_node: &Node, index: usize) -> KernelResult<Option<String>> {
    Ok(REGISTRY.lock().keys().nth(index).cloned())
}

const ROOT_OPS: NodeOps = NodeOps { finddir: Some(root_finddir), readdir: Some(root_readdir), ..NodeOps::NONE };

/// Builds the `/dev` mount root; `finddir` resolves registered device
/// names on demand rather than eagerly materializing a node per device.
pub fn new_fs() -> NodeRef {
    Node::new("dev", NodeKind::Directory, ROOT_OPS, NodeData::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_read(_offset: usize, _buf: &mut [u8]) -> KernelResult<usize> {
        Ok(0)
    }

    #[test_case]
    fn registered_device_resolves_through_finddir() {
        register("zero", DeviceOps { read: Some(noop_read), write: None });
        let root = new_fs();
        assert!(root.finddir("zero").is_ok());
        assert!(root.finddir("does-not-exist").is_err());
        unregister("zero");
    }
}
