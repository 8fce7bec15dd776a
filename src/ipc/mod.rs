//! Inter-process communication primitives. Ground: `SPEC_FULL.md` §4.7.

pub mod msgq;
pub mod pipe;
pub mod shm;

pub use msgq::{Message, MessageQueue};
pub use pipe::Pipe;
pub use shm::ShmId;
