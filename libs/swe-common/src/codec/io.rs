use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read, Write},
    path::Path,
};

use base64::{
    engine::{GeneralPurpose, general_purpose::STANDARD},
    read::DecoderReader,
    write::EncoderWriter,
};

use crate::{encoding::ByteEncoding, error::Error};

pub(crate) type BoxedInput = Box<dyn BufRead + Send>;
pub(crate) type BoxedOutput = Box<dyn Write + Send>;

/// Byte input of a parser, after byte decoding. Optionally records what is consumed so raw
/// handlers can see the exact bytes of each record.
pub(crate) struct Input {
    inner: BoxedInput,
    capture: Option<Vec<u8>>,
}

impl Input {
    pub fn new(inner: BoxedInput, byte_encoding: ByteEncoding) -> Self {
        let inner: BoxedInput = match byte_encoding {
            ByteEncoding::Raw => inner,
            ByteEncoding::Base64 => Box::new(BufReader::new(DecoderReader::new(inner, &STANDARD))),
        };
        Input {
            inner,
            capture: None,
        }
    }

    pub fn start_capture(&mut self) {
        match &mut self.capture {
            Some(buf) => buf.clear(),
            None => self.capture = Some(vec![]),
        }
    }

    pub fn take_capture(&mut self) -> Vec<u8> {
        self.capture.take().unwrap_or_default()
    }

    pub fn at_end(&mut self) -> io::Result<bool> {
        Ok(self.inner.fill_buf()?.is_empty())
    }
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(capture) = &mut self.capture {
            capture.extend_from_slice(&buf[..n]);
        }
        Ok(n)
    }
}

impl BufRead for Input {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        if let Some(capture) = &mut self.capture {
            if let Ok(buf) = self.inner.fill_buf() {
                capture.extend_from_slice(&buf[..amt.min(buf.len())]);
            }
        }
        self.inner.consume(amt);
    }
}

/// Byte output of a writer, before byte encoding.
pub(crate) enum Output {
    Raw(BoxedOutput),
    Base64(EncoderWriter<'static, GeneralPurpose, BoxedOutput>),
}

impl Output {
    pub fn new(inner: BoxedOutput, byte_encoding: ByteEncoding) -> Self {
        match byte_encoding {
            ByteEncoding::Raw => Output::Raw(inner),
            ByteEncoding::Base64 => Output::Base64(EncoderWriter::new(inner, &STANDARD)),
        }
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Output::Raw(w) => w.write_all(bytes),
            Output::Base64(w) => w.write_all(bytes),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Raw(w) => w.flush(),
            Output::Base64(w) => w.flush(),
        }
    }

    /// Emits any buffered partial group and flushes the underlying output.
    pub fn finish(self) -> io::Result<()> {
        match self {
            Output::Raw(mut w) => w.flush(),
            Output::Base64(mut w) => w.finish()?.flush(),
        }
    }
}

pub(crate) fn open_path(path: &Path) -> Result<BoxedInput, Error> {
    Ok(Box::new(BufReader::new(File::open(path)?)))
}

/// Opens a local path or a `file://` URI.
pub(crate) fn open_uri(uri: &str) -> Result<BoxedInput, Error> {
    if let Some(path) = uri.strip_prefix("file://") {
        return open_path(Path::new(path));
    }
    if uri.contains("://") {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unsupported uri scheme in `{uri}`"),
        )));
    }
    open_path(Path::new(uri))
}
