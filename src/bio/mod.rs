//! Component D: the buffered block-I/O cache (spec §4.4). The
//! filesystem and coredumper sit on top of this; it is out of scope to
//! say anything about either of them beyond the narrow `VnodeOps`
//! contract in [`crate::contracts`].

pub mod buf;
pub mod cache;

pub use buf::{BufFlags, Buffer};
pub use cache::{bawrite, bdwrite, bio_clrbuf, bio_geterror, biowait, bwrite, BufferCache};
