use flate2::read::MultiGzDecoder;
use std::io::{self, BufRead, BufReader, Cursor, Read};

const GZIP_MAGIC: [u8; 3] = [0x1F, 0x8B, 0x08];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

const READ_BUFFER_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zstd,
    None,
}

impl Compression {
    /// Detect compression format by magic bytes
    pub fn detect(head: &[u8]) -> Self {
        if head.starts_with(&ZSTD_MAGIC) {
            Compression::Zstd
        } else if head.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else {
            Compression::None
        }
    }
}

/// Wrap `source` in a streaming decoder matching its magic bytes
///
/// The sniffed bytes are put back in front of the stream, so plain input
/// passes through unchanged.
pub fn decompress<R>(mut source: R) -> io::Result<Box<dyn BufRead + Send>>
where
    R: Read + Send + 'static,
{
    let mut head = Vec::with_capacity(ZSTD_MAGIC.len());
    source
        .by_ref()
        .take(ZSTD_MAGIC.len() as u64)
        .read_to_end(&mut head)?;

    let compression = Compression::detect(&head);
    let chained = Cursor::new(head).chain(source);

    Ok(match compression {
        Compression::Gzip => Box::new(BufReader::with_capacity(
            READ_BUFFER_SIZE,
            MultiGzDecoder::new(chained),
        )),
        Compression::Zstd => Box::new(BufReader::with_capacity(
            READ_BUFFER_SIZE,
            zstd::Decoder::new(chained)?,
        )),
        Compression::None => Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, chained)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn read_all(mut reader: Box<dyn BufRead + Send>) -> String {
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn detects_magic_bytes() {
        assert_eq!(Compression::detect(&[0x1F, 0x8B, 0x08, 0x00]), Compression::Gzip);
        assert_eq!(Compression::detect(&ZSTD_MAGIC), Compression::Zstd);
        assert_eq!(Compression::detect(b"plain"), Compression::None);
        assert_eq!(Compression::detect(&[0x1F]), Compression::None);
        assert_eq!(Compression::detect(&[]), Compression::None);
    }

    #[test]
    fn plain_input_passes_through() {
        let reader = decompress(Cursor::new(b"ab\ncd\n".to_vec())).unwrap();
        assert_eq!(read_all(reader), "ab\ncd\n");

        // shorter than the magic window
        let reader = decompress(Cursor::new(b"x".to_vec())).unwrap();
        assert_eq!(read_all(reader), "x");
    }

    #[test]
    fn decodes_gzip() {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"line one\nline two\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let reader = decompress(Cursor::new(compressed)).unwrap();
        assert_eq!(read_all(reader), "line one\nline two\n");
    }

    #[test]
    fn decodes_zstd() {
        let compressed = zstd::encode_all(&b"zstd line\n"[..], 0).unwrap();
        let reader = decompress(Cursor::new(compressed)).unwrap();
        assert_eq!(read_all(reader), "zstd line\n");
    }
}
