//! Stream lexing for fast-import input.

pub mod reader;

pub use reader::{Result, StreamError, StreamReader};
