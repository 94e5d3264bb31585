//! Relocatable object format and linker for vm16 assembly output (spec
//! §6). The lexer, parser and text assembler that produce an [`Object`]
//! from assembly text are front-end collaborators outside this crate's
//! scope; this crate starts from the object tuple itself.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

mod error;
mod linker;
mod object;

pub use error::{LinkError, LinkErrors, Location};
pub use linker::Linker;
pub use object::{GlobalReloc, Object};
