//! Self-contained email artifacts.
//!
//! Each article becomes one `.eml` file whose images travel as inline MIME
//! parts, so the message renders without network access. File names come
//! from the article title and never overwrite an existing file.

mod assembler;
mod filename;

pub use assembler::{AssembleError, EmailAssembler, RenderedEmail};
pub use filename::{candidate_name, escape_title, write_exclusive, EML_EXTENSION};
