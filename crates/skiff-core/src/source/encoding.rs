//! Streaming transcoding of source bytes to UTF-8.

use std::io::{self, Read};

use encoding_rs::{Decoder, DecoderResult, Encoding};

use crate::error::{ImportError, ImportResult};

const BUFFER_SIZE: usize = 8 * 1024;

/// Look up an encoding by its WHATWG label (`"utf-8"`, `"latin1"`,
/// `"windows-1252"`, `"utf-16le"`, ...).
pub fn encoding_for_label(label: &str) -> ImportResult<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
        ImportError::configuration(format!("unknown file encoding '{}'", label))
    })
}

/// A reader yielding the UTF-8 form of another reader's bytes.
///
/// A leading byte order mark is removed. Byte sequences that are malformed in
/// the source encoding surface as [`io::ErrorKind::InvalidData`].
pub struct DecodingReader<R> {
    inner: R,
    decoder: Decoder,
    input: Box<[u8]>,
    input_pos: usize,
    input_len: usize,
    output: Box<[u8]>,
    output_pos: usize,
    output_len: usize,
    eof: bool,
    finished: bool,
}

impl<R: Read> DecodingReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder_with_bom_removal(),
            input: vec![0; BUFFER_SIZE].into_boxed_slice(),
            input_pos: 0,
            input_len: 0,
            output: vec![0; BUFFER_SIZE * 3].into_boxed_slice(),
            output_pos: 0,
            output_len: 0,
            eof: false,
            finished: false,
        }
    }

    fn fill_output(&mut self) -> io::Result<()> {
        while self.output_pos == self.output_len && !self.finished {
            if self.input_pos == self.input_len && !self.eof {
                let n = self.inner.read(&mut self.input)?;
                self.input_pos = 0;
                self.input_len = n;
                self.eof = n == 0;
            }

            let (result, read, written) = self.decoder.decode_to_utf8_without_replacement(
                &self.input[self.input_pos..self.input_len],
                &mut self.output,
                self.eof,
            );
            self.input_pos += read;
            self.output_pos = 0;
            self.output_len = written;

            match result {
                DecoderResult::InputEmpty => self.finished = self.eof,
                DecoderResult::OutputFull => {}
                DecoderResult::Malformed(_, _) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("malformed {} input", self.decoder.encoding().name()),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.fill_output()?;
        let available = &self.output[self.output_pos..self.output_len];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.output_pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8], label: &str) -> io::Result<String> {
        let encoding = encoding_for_label(label).unwrap();
        let mut reader = DecodingReader::new(bytes, encoding);
        let mut out = String::new();
        reader.read_to_string(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_latin1_is_transcoded() {
        let bytes = b"name\ncaf\xe9\n";
        assert_eq!(decode_all(bytes, "latin1").unwrap(), "name\ncafé\n");
    }

    #[test]
    fn test_utf8_bom_is_removed() {
        let bytes = b"\xef\xbb\xbfname\nfoo\n";
        assert_eq!(decode_all(bytes, "utf-8").unwrap(), "name\nfoo\n");
    }

    #[test]
    fn test_utf16_is_transcoded() {
        let text = "a,b\n1,2\n";
        let mut bytes = vec![0xff, 0xfe];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_all(&bytes, "utf-16le").unwrap(), text);
    }

    #[test]
    fn test_large_input_spans_buffers() {
        let text = "é".repeat(BUFFER_SIZE * 2 + 17);
        assert_eq!(decode_all(text.as_bytes(), "utf-8").unwrap(), text);
    }

    #[test]
    fn test_malformed_utf8_is_invalid_data() {
        let err = decode_all(b"name\n\xff\xfe\xfd\n", "utf-8").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_unknown_label() {
        assert!(matches!(
            encoding_for_label("klingon"),
            Err(ImportError::Configuration(_))
        ));
    }
}
