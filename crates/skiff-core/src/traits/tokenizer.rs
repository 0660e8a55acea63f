//! Tabular source tokenizer trait.

use std::io::Read;

use crate::config::ReadOptions;
use crate::error::ImportResult;
use crate::types::Record;

/// Decodes a byte stream into records.
///
/// `emit` is called once per record, in source order, before the next one is
/// decoded. An error from `emit` stops decoding and is returned unchanged.
pub trait Tokenizer {
    fn decode(
        &self,
        input: &mut dyn Read,
        options: &ReadOptions,
        emit: &mut dyn FnMut(Record) -> ImportResult<()>,
    ) -> ImportResult<()>;
}
