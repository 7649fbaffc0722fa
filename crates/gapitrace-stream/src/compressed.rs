use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use flate2::bufread::{GzDecoder, ZlibDecoder};

use gapitrace_format::{TraceError, TraceErrorKind};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZLIB_MAGIC_HIGH_NIBBLE: u8 = 0x7; // zlib CMF byte, low nibble is compression method (8 == deflate)

/// Whether `file`'s leading bytes look like a whole-file gzip or zlib stream,
/// as opposed to a raw (uncompressed) trace file.
///
/// Trace files are never compressed by `gapitrace-compress` at the
/// whole-file level — only individual packet bodies are. Whole-file
/// compression is an operator-applied transform (e.g. `gzip trace.gfxtrace`)
/// that this stream layer transparently undoes on open, mirroring the
/// original tool's `vktrace_File_IsCompressed`/`Decompress`.
pub fn is_compressed(file: &mut File) -> std::io::Result<bool> {
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    file.seek_to_start()?;
    if read < 2 {
        return Ok(false);
    }
    Ok(magic == GZIP_MAGIC || (magic[0] & 0x0f) == 8 && (magic[0] >> 4) <= ZLIB_MAGIC_HIGH_NIBBLE)
}

trait SeekToStart {
    fn seek_to_start(&mut self) -> std::io::Result<()>;
}

impl SeekToStart for File {
    fn seek_to_start(&mut self) -> std::io::Result<()> {
        use std::io::{Seek, SeekFrom};
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }
}

/// Decompresses `infile` (detected as gzip or zlib) into `outfile`, which is
/// created or truncated.
pub fn decompress_file(infile: &Path, outfile: &Path) -> Result<(), TraceError> {
    let map_io = |source: std::io::Error| {
        TraceError::new("gapitrace_stream::decompress_file", TraceErrorKind::StreamIO).with_source(source)
    };

    let mut source = File::open(infile).map_err(map_io)?;
    let is_gzip = {
        let mut magic = [0u8; 2];
        let read = source.read(&mut magic).map_err(map_io)?;
        read == 2 && magic == GZIP_MAGIC
    };
    source.seek_to_start().map_err(map_io)?;

    let reader = BufReader::new(source);
    let mut dest = File::create(outfile).map_err(map_io)?;

    if is_gzip {
        let mut decoder = GzDecoder::new(reader);
        std::io::copy(&mut decoder, &mut dest).map_err(map_io)?;
    } else {
        let mut decoder = ZlibDecoder::new(reader);
        std::io::copy(&mut decoder, &mut dest).map_err(map_io)?;
    }
    dest.flush().map_err(map_io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    #[test]
    fn detects_gzip_magic_and_decompresses() {
        let dir = std::env::temp_dir();
        let infile = dir.join("gapitrace-stream-compressed-test.gz");
        let outfile = dir.join("gapitrace-stream-compressed-test.out");

        let payload = b"packet stream bytes";
        {
            let file = File::create(&infile).unwrap();
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(payload).unwrap();
            encoder.finish().unwrap();
        }

        let mut opened = File::open(&infile).unwrap();
        assert!(is_compressed(&mut opened).unwrap());

        decompress_file(&infile, &outfile).unwrap();
        let decompressed = std::fs::read(&outfile).unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn raw_file_is_not_compressed() {
        let dir = std::env::temp_dir();
        let infile = dir.join("gapitrace-stream-raw-test.gfxtrace");
        std::fs::write(&infile, [0u8; 32]).unwrap();
        let mut opened = File::open(&infile).unwrap();
        assert!(!is_compressed(&mut opened).unwrap());
    }
}
