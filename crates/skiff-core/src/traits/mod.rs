//! Core traits for skiff collaborators and import definitions.

mod definition;
mod storage;
mod tokenizer;

pub use definition::*;
pub use storage::*;
pub use tokenizer::*;
