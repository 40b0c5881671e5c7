//! Library side of the `rsort` binary: the interactive command language and its prompt loop.
//!
//! The sorting engine itself lives in the `common` crate.

pub mod command;
pub mod repl;
