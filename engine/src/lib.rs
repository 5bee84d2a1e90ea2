// pinpoint — execution-point to syntax-node resolution for mica
//
// Library root. The pipeline runs parse → lower → decode → resolve;
// the remaining modules are the resolver's supporting cast.

pub mod ast;
pub mod bytecode;
pub mod decode;
pub mod error;
pub mod filter;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod position;
pub mod qualname;
pub mod resolve;
pub mod source;
pub mod tree;
pub mod verify;

pub use bytecode::{CompiledUnit, Encoding};
pub use error::{Limitation, ResolveError, Resolution, UnresolvedReason};
pub use qualname::QualnameTable;
pub use resolve::{resolve, ExecutionPoint};
pub use source::SourceUnit;
