//! gzip compression and chunked transfer framing (spec.md §4.E "Response
//! construction").

use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

/// Wraps a gzip encoder so each `write` call emits one RFC 7230 §4.1 chunk
/// of the *compressed* bytes it produced, not of the input. Callers must
/// call [`ChunkedGzipWriter::finish`] to flush the encoder and emit the
/// terminating `0\r\n\r\n` chunk.
pub struct ChunkedGzipWriter {
    encoder: GzEncoder<ChunkSink>,
}

/// Collects encoder output and immediately frames it as chunks into the
/// underlying buffer.
struct ChunkSink {
    out: Vec<u8>,
}

impl Write for ChunkSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !buf.is_empty() {
            write_chunk(&mut self.out, buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ChunkedGzipWriter {
    pub fn new() -> Self {
        // level 3 matches spec.md §4.E's compression level for response streaming.
        ChunkedGzipWriter {
            encoder: GzEncoder::new(ChunkSink { out: Vec::new() }, Compression::new(3)),
        }
    }

    /// Feed more plaintext; returns newly available chunked bytes.
    pub fn write(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        self.encoder.write_all(data)?;
        self.encoder.flush()?;
        Ok(std::mem::take(&mut self.encoder.get_mut().out))
    }

    /// Finish the gzip stream and append the terminating chunk.
    pub fn finish(mut self) -> io::Result<Vec<u8>> {
        self.encoder.try_finish()?;
        let mut sink = self.encoder.finish()?;
        sink.out.extend_from_slice(b"0\r\n\r\n");
        Ok(sink.out)
    }
}

impl Default for ChunkedGzipWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn write_chunk(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(format!("{:X}\r\n", payload.len()).as_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n");
}

/// One-shot gzip of a complete buffer, for responses small enough to
/// compress in full before the first byte is sent.
pub fn gzip_all(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(3));
    encoder.write_all(data)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_gzip_roundtrips() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let data = b"hello, pulsewatch".repeat(10);
        let compressed = gzip_all(&data).unwrap();
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn chunked_writer_frames_each_flush() {
        let mut writer = ChunkedGzipWriter::new();
        let chunk1 = writer.write(b"hello").unwrap();
        assert!(!chunk1.is_empty());
        let tail = writer.finish().unwrap();
        assert!(tail.ends_with(b"0\r\n\r\n"));
    }
}
