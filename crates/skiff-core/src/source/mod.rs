//! Sources and chunked streaming.
//!
//! A [`Source`] names where records come from. [`ChunkedSource`] feeds it
//! through a [`Tokenizer`] and hands records on in bounded, ordered chunks,
//! so only one chunk is held in memory at a time.

mod csv;
mod encoding;

pub use self::csv::CsvTokenizer;
pub use self::encoding::{encoding_for_label, DecodingReader};

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ReadOptions;
use crate::error::{ErrorCode, ImportError, ImportResult};
use crate::traits::Tokenizer;
use crate::types::Record;

const SOURCE_EXTENSION: &str = "csv";

/// Where an import reads from.
pub enum Source {
    /// A file, or a directory of `.csv` files read in lexical order.
    Path(PathBuf),
    /// Any byte stream.
    Reader(Box<dyn Read>),
    /// In-memory text.
    Text(String),
}

impl Source {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn reader(reader: impl Read + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
            Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
        }
    }
}

/// Streams a source in chunks of at most `chunk_size` records.
#[derive(Debug)]
pub struct ChunkedSource<'a, T: ?Sized> {
    tokenizer: &'a T,
}

impl<'a, T: Tokenizer + ?Sized> ChunkedSource<'a, T> {
    pub fn new(tokenizer: &'a T) -> Self {
        Self { tokenizer }
    }

    /// Decode `source` and call `on_chunk` once per chunk, in source order,
    /// before decoding further. Returns the number of chunks delivered.
    ///
    /// The files of a directory source are decoded one after another into the
    /// same chunk stream. Errors from `on_chunk` stop the stream and are
    /// returned unchanged.
    pub fn stream<F>(
        &self,
        source: Source,
        options: &ReadOptions,
        on_chunk: F,
    ) -> ImportResult<u64>
    where
        F: FnMut(Vec<Record>) -> ImportResult<()>,
    {
        let chunk_size = options.chunk_size();
        if chunk_size == 0 {
            return Err(ImportError::configuration("chunk_size must be at least 1"));
        }

        let mut chunker = Chunker::new(chunk_size, on_chunk);
        match source {
            Source::Path(path) => {
                let recursive = options.recursive.unwrap_or(false);
                for file in source_files(&path, recursive)? {
                    debug!(path = %file.display(), "Reading source file");
                    let mut input = File::open(&file).map_err(|e| open_error(&file, e))?;
                    self.decode_into(&mut input, options, &mut chunker)?;
                }
            }
            Source::Reader(mut reader) => {
                self.decode_into(&mut reader, options, &mut chunker)?;
            }
            Source::Text(text) => {
                let mut bytes = text.as_bytes();
                self.decode_into(&mut bytes, options, &mut chunker)?;
            }
        }
        chunker.finish()
    }

    fn decode_into<F>(
        &self,
        input: &mut dyn Read,
        options: &ReadOptions,
        chunker: &mut Chunker<F>,
    ) -> ImportResult<()>
    where
        F: FnMut(Vec<Record>) -> ImportResult<()>,
    {
        let mut downstream = None;

        let decoded = self.tokenizer.decode(input, options, &mut |record| {
            chunker.push(record).map_err(|e| {
                downstream = Some(e);
                ImportError::source_read("chunk handler failed")
            })
        });

        match decoded {
            Ok(()) => Ok(()),
            Err(err) => Err(match downstream {
                Some(err) => err,
                None => tokenizer_error(err),
            }),
        }
    }
}

/// Buffers records and hands them on in full chunks.
struct Chunker<F> {
    chunk_size: usize,
    buffer: Vec<Record>,
    chunks: u64,
    on_chunk: F,
}

impl<F> Chunker<F>
where
    F: FnMut(Vec<Record>) -> ImportResult<()>,
{
    fn new(chunk_size: usize, on_chunk: F) -> Self {
        Self {
            chunk_size,
            buffer: Vec::with_capacity(chunk_size.min(1024)),
            chunks: 0,
            on_chunk,
        }
    }

    fn push(&mut self, record: Record) -> ImportResult<()> {
        self.buffer.push(record);
        if self.buffer.len() < self.chunk_size {
            return Ok(());
        }
        self.chunks += 1;
        (self.on_chunk)(std::mem::take(&mut self.buffer))
    }

    /// Flush the trailing partial chunk.
    fn finish(mut self) -> ImportResult<u64> {
        if !self.buffer.is_empty() {
            self.chunks += 1;
            (self.on_chunk)(std::mem::take(&mut self.buffer))?;
        }
        Ok(self.chunks)
    }
}

/// Files a path source expands to.
fn source_files(path: &Path, recursive: bool) -> ImportResult<Vec<PathBuf>> {
    let metadata = fs::metadata(path).map_err(|e| open_error(path, e))?;
    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut entries = fs::read_dir(path)
        .map_err(|e| open_error(path, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| open_error(path, e))?;
    entries.sort();

    let mut files = Vec::new();
    for entry in entries {
        if entry.is_dir() {
            if recursive {
                files.extend(source_files(&entry, recursive)?);
            }
        } else if entry
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SOURCE_EXTENSION))
        {
            files.push(entry);
        }
    }
    Ok(files)
}

fn open_error(path: &Path, err: io::Error) -> ImportError {
    let code = if err.kind() == io::ErrorKind::NotFound {
        ErrorCode::SrcNotFound
    } else {
        ErrorCode::SrcMalformed
    };
    ImportError::source_read_with(
        format!("cannot read {}: {}", path.display(), err),
        code,
        err,
    )
}

/// Tokenizers report I/O failures as source errors.
fn tokenizer_error(err: ImportError) -> ImportError {
    match err {
        ImportError::Io(io) => ImportError::source_read_with(
            format!("failed to read source: {}", io),
            ErrorCode::SrcMalformed,
            io,
        ),
        other => other,
    }
}
