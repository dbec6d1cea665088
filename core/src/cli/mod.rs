//! Argument parsing for the `hcv` binary.

mod parse;

pub use parse::parse_args;
