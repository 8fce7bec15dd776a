//! `/proc` backend: synthesizes one read-only node per live process,
//! reporting pid/ppid/state/priority, generated fresh on every read
//! rather than cached. Ground: `SPEC_FULL.md` §4.7a,
//! `original_source/fs/procfs.c`.

use super::{Node, NodeData, NodeKind, NodeOps, NodeRef};
use crate::error::{KernelError, KernelResult};
use alloc::format;
use alloc::string::String;

fn entry_read(node: &Node, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
    let pid: u32 = node.name.parse().map_err(|_| KernelError::InvalidArgument)?;
    let line = crate::process::describe(pid).ok_or(KernelError::NotFound)?;
    let bytes = line.as_bytes();
    if offset >= bytes.len() {
        return Ok(0);
    }
    let n = buf.len().min(bytes.len() - offset);
    buf[..n].copy_from_slice(&bytes[offset..offset + n]);
    Ok(n)
}

const ENTRY_OPS: NodeOps = NodeOps { read: Some(entry_read), ..NodeOps::NONE };

fn root_finddir(_node: &Node, name: &str) -> KernelResult<NodeRef> {
    let pid: u32 = name.parse().map_err(|_| KernelError::NotFound)?;
    if crate::process::describe(pid).is_none() {
        return Err(KernelError::NotFound);
    }
    Ok(Node::new(name, NodeKind::File, ENTRY_OPS, NodeData::None))
}

fn root_readdir(_node: &Node, index: usize) -> KernelResult<Option<String>> {
    Ok(crate::process::live_pids().into_iter().nth(index).map(|pid| format!("{pid}")))
}

const ROOT_OPS: NodeOps = NodeOps { finddir: Some(root_finddir), readdir: Some(root_readdir), ..NodeOps::NONE };

/// Builds the `/proc` mount root.
pub fn new_fs() -> NodeRef {
    Node::new("proc", NodeKind::Directory, ROOT_OPS, NodeData::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn unknown_pid_is_not_found() {
        let root = new_fs();
        assert!(root.finddir("999999").is_err());
    }

    #[test_case]
    fn non_numeric_entry_is_not_found() {
        let root = new_fs();
        assert!(root.finddir("not-a-pid").is_err());
    }
}
