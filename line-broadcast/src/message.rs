use std::{fmt, io, sync::Arc};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest accepted line, delimiter excluded. A client that goes past it
/// without sending `\n` gets an `InvalidData` read error.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const DELIMITER: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';
const UNMAPPABLE: u8 = b'?';

/// One line of text, decoded as ISO-8859-1 with its delimiter stripped.
///
/// Cloning is cheap: every recipient of a broadcast shares the same buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message(Arc<str>);

impl Message {
    /// Decodes raw line bytes. Every byte maps to the char with the same code
    /// point, so decoding never fails and `encode` gives the bytes back.
    pub fn decode(bytes: &[u8]) -> Self {
        let text: String = bytes.iter().map(|&byte| char::from(byte)).collect();
        Self(text.into())
    }

    /// Encodes to ISO-8859-1. Chars above U+00FF become `?`.
    pub fn encode(&self) -> Vec<u8> {
        self.0
            .chars()
            .map(|ch| u8::try_from(u32::from(ch)).unwrap_or(UNMAPPABLE))
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self(text.into())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads the next line. `Ok(None)` means the peer closed the stream.
///
/// Lines end at `\n`; a `\r` right before it is dropped as well. Bytes left
/// over at end-of-stream without a delimiter still form a final line.
pub async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<Message>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = (MAX_LINE_BYTES + 1) as u64;
    let bytes = (&mut *reader).take(limit).read_until(DELIMITER, buf).await?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&DELIMITER) && buf.len() > MAX_LINE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line longer than {MAX_LINE_BYTES} bytes"),
        ));
    }

    if buf.last() == Some(&DELIMITER) {
        buf.pop();
        if buf.last() == Some(&CARRIAGE_RETURN) {
            buf.pop();
        }
    }

    Ok(Some(Message::decode(buf)))
}

pub async fn write_line<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut encoded = message.encode();
    encoded.push(DELIMITER);
    writer.write_all(&encoded).await?;
    writer.flush().await
}
