//! In-memory filesystem backing the VFS root. Ground: `SPEC_FULL.md`
//! §4.7a, `original_source/fs/ramfs.c`.
//!
//! Up to `MAX_NODES` fixed-capacity (`MAX_FILE_SIZE`) files/directories;
//! file content lives in a plain `Vec<u8>` behind the node's `NodeData`.

use super::{Node, NodeData, NodeKind, NodeOps, NodeRef};
use crate::error::{KernelError, KernelResult};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Maximum number of ramfs nodes alive at once, across the whole tree.
pub const MAX_NODES: usize = 128;
/// Maximum bytes a single ramfs file may hold.
pub const MAX_FILE_SIZE: usize = 64 * 1024;

static NODE_COUNT: AtomicUsize = AtomicUsize::new(0);

fn file_read(node: &Node, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
    let data = node.data.lock();
    let NodeData::RamFile(content) = &*data else {
        return Err(KernelError::InvalidArgument);
    };
    if offset >= content.len() {
        return Ok(0);
    }
    let n = buf.len().min(content.len() - offset);
    buf[..n].copy_from_slice(&content[offset..offset + n]);
    Ok(n)
}

fn file_write(node: &Node, offset: usize, buf: &[u8]) -> KernelResult<usize> {
    let mut data = node.data.lock();
    let NodeData::RamFile(content) = &mut *data else {
        return Err(KernelError::InvalidArgument);
    };
    let end = offset + buf.len();
    if end > MAX_FILE_SIZE {
        return Err(KernelError::ResourceExhausted);
    }
    if end > content.len() {
        content.resize(end, 0);
    }
    content[offset..end].copy_from_slice(buf);
    Ok(buf.len())
}

fn dir_finddir(node: &Node, name: &str) -> KernelResult<NodeRef> {
    let data = node.data.lock();
    let NodeData::RamDir(children) = &*data else {
        return Err(KernelError::InvalidArgument);
    };
    children.get(name).cloned().ok_or(KernelError::NotFound)
}

fn dir_readdir(node: &Node, index: usize) -> KernelResult<Option<String>> {
    let data = node.data.lock();
    let NodeData::RamDir(children) = &*data else {
        return Err(KernelError::InvalidArgument);
    };
    Ok(children.keys().nth(index).cloned())
}

fn dir_create(node: &Node, name: &str) -> KernelResult<NodeRef> {
    if NODE_COUNT.load(Ordering::Relaxed) >= MAX_NODES {
        return Err(KernelError::ResourceExhausted);
    }
    let child = Node::new(name, NodeKind::File, FILE_OPS, NodeData::RamFile(Vec::new()));
    NODE_COUNT.fetch_add(1, Ordering::Relaxed);
    let mut data = node.data.lock();
    let NodeData::RamDir(children) = &mut *data else {
        return Err(KernelError::InvalidArgument);
    };
    children.insert(String::from(name), child.clone());
    Ok(child)
}

fn dir_unlink(node: &Node, name: &str) -> KernelResult<()> {
    let mut data = node.data.lock();
    let NodeData::RamDir(children) = &mut *data else {
        return Err(KernelError::InvalidArgument);
    };
    if children.remove(name).is_some() {
        NODE_COUNT.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    } else {
        Err(KernelError::NotFound)
    }
}

fn dir_create_dir(node: &Node, name: &str) -> KernelResult<NodeRef> {
    if NODE_COUNT.load(Ordering::Relaxed) >= MAX_NODES {
        return Err(KernelError::ResourceExhausted);
    }
    let child = new_directory(name);
    NODE_COUNT.fetch_add(1, Ordering::Relaxed);
    let mut data = node.data.lock();
    let NodeData::RamDir(children) = &mut *data else {
        return Err(KernelError::InvalidArgument);
    };
    children.insert(String::from(name), child.clone());
    Ok(child)
}

const FILE_OPS: NodeOps = NodeOps { read: Some(file_read), write: Some(file_write), ..NodeOps::NONE };

const DIR_OPS: NodeOps = NodeOps {
    finddir: Some(dir_finddir),
    readdir: Some(dir_readdir),
    create: Some(dir_create),
    unlink: Some(dir_unlink),
    ..NodeOps::NONE
};

fn new_directory(name: &str) -> NodeRef {
    Node::new(name, NodeKind::Directory, DIR_OPS, NodeData::RamDir(BTreeMap::new()))
}

/// Directories also expose `mkdir` via a dedicated entry point, since the
/// generic `create` in `NodeOps` always produces a file.
pub fn mkdir(parent: &NodeRef, name: &str) -> KernelResult<NodeRef> {
    dir_create_dir(parent, name)
}

/// Builds a fresh ramfs root directory.
pub fn new_fs() -> NodeRef {
    new_directory("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn create_then_write_then_read_round_trips() {
        let root = new_fs();
        let file = root.create("hello").unwrap();
        file.write(0, b"hi").unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(file.read(0, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");
    }

    #[test_case]
    fn unlink_removes_the_child() {
        let root = new_fs();
        root.create("gone").unwrap();
        root.unlink("gone").unwrap();
        assert!(root.finddir("gone").is_err());
    }

    #[test_case]
    fn write_past_max_file_size_is_rejected() {
        let root = new_fs();
        let file = root.create("big").unwrap();
        assert!(file.write(MAX_FILE_SIZE, b"x").is_err());
    }

    #[test_case]
    fn mkdir_nests_directories() {
        let root = new_fs();
        let sub = mkdir(&root, "sub").unwrap();
        sub.create("leaf").unwrap();
        assert!(root.finddir("sub").is_ok());
        assert!(sub.finddir("leaf").is_ok());
    }
}
