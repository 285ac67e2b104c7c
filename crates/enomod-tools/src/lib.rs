//! Shared plumbing for the `enoone-*` command-line tools.

pub mod common;
