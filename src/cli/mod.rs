//! Interactive shell: rustyline REPL, meta-commands and result rendering.

pub mod commands;
pub mod repl;
pub mod table;

pub use repl::Repl;
