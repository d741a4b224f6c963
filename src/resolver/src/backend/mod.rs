//! Store client implementations and wire decoding
pub mod etcd;
pub mod memory;
