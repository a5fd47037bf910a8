use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FramingError;

/// Reads one length-prefixed frame: a big-endian `u32` byte count followed by
/// exactly that many bytes. Returns `Ok(None)` on a clean EOF at a frame
/// boundary (the normal way a connection ends); any other truncation is a
/// [`FramingError`].
///
/// `max_frame_bytes` bounds the header value before any body bytes are read,
/// so an attacker (or a buggy host) cannot force an unbounded allocation by
/// sending an oversized length prefix.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: u32) -> Result<Option<Vec<u8>>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match read_exact_or_eof(reader, &mut header).await? {
        ReadOutcome::Eof => return Ok(None),
        ReadOutcome::Short(_) => return Err(FramingError::ShortHeader),
        ReadOutcome::Full => {}
    }

    let size = u32::from_be_bytes(header);
    if size > max_frame_bytes {
        return Err(FramingError::TooLarge {
            size,
            limit: max_frame_bytes,
        });
    }

    let mut body = vec![0u8; size as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => FramingError::ShortBody {
                expected: size,
                got: 0,
            },
            _ => FramingError::Io(err),
        })?;

    Ok(Some(body))
}

/// Writes one length-prefixed frame and flushes it. Framing is symmetric
/// with [`read_frame`]: a `write_frame` on one end is read back whole by a
/// single `read_frame` on the other, regardless of how the underlying stream
/// chooses to fragment the writes.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len()).map_err(|_| FramingError::TooLarge {
        size: u32::MAX,
        limit: u32::MAX,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

enum ReadOutcome {
    Full,
    Short(usize),
    Eof,
}

/// Like `AsyncReadExt::read_exact`, but distinguishes "zero bytes read, EOF
/// right at the boundary" from "some bytes read, then EOF mid-header" — the
/// former is a normal connection close, the latter is a protocol violation.
async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(if filled == 0 {
                ReadOutcome::Eof
            } else {
                ReadOutcome::Short(filled)
            });
        }
        filled += n;
    }
    Ok(ReadOutcome::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello world").await.unwrap();

        let mut cursor = Cursor::new(buf);
        let frame = read_frame(&mut cursor, 1024).await.unwrap();
        assert_eq!(frame.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn clean_eof_at_boundary_returns_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let frame = read_frame(&mut cursor, 1024).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn truncated_header_is_an_error() {
        let mut cursor = Cursor::new(vec![0u8, 1u8]);
        let err = read_frame(&mut cursor, 1024).await.unwrap_err();
        assert!(matches!(err, FramingError::ShortHeader));
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let mut bytes = 10u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"short");
        let mut cursor = Cursor::new(bytes);
        let err = read_frame(&mut cursor, 1024).await.unwrap_err();
        assert!(matches!(err, FramingError::ShortBody { expected: 10, .. }));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_reading_body() {
        let bytes = 100u32.to_be_bytes().to_vec();
        let mut cursor = Cursor::new(bytes);
        let err = read_frame(&mut cursor, 10).await.unwrap_err();
        assert!(matches!(err, FramingError::TooLarge { size: 100, limit: 10 }));
    }

    #[tokio::test]
    async fn empty_body_frame_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let frame = read_frame(&mut cursor, 1024).await.unwrap();
        assert_eq!(frame.unwrap(), b"");
    }
}
