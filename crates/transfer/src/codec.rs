use std::io;

use tokio::io::{
    copy, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Take,
};

use crate::error::TransferError;

/// Upper bound for a single header line, newline included.
pub const MAX_HEADER_LINE: u64 = 4_096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferHeader {
    pub filename: String,
    pub byte_length: u64,
}

impl TransferHeader {
    #[must_use]
    pub fn new(filename: impl Into<String>, byte_length: u64) -> Self {
        Self {
            filename: filename.into(),
            byte_length,
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}\n{}\n", self.filename, self.byte_length).into_bytes()
    }
}

/// Rejects names that cannot survive the header or that would resolve
/// outside the receiver's output directory.
pub fn validate_filename(filename: &str) -> Result<(), TransferError> {
    let invalid = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\'])
        || filename.chars().any(char::is_control)
        || filename.trim_end() != filename;

    if invalid {
        return Err(TransferError::InvalidFilename(filename.to_owned()));
    }

    Ok(())
}

/// Writes one frame: header, flush, exactly `byte_length` bytes of
/// `source`, flush.
///
/// A source shorter than `byte_length` fails with `UnexpectedEof` after the
/// partial payload has already been written.
pub async fn write_frame<W, R>(
    writer: &mut W,
    filename: &str,
    source: R,
    byte_length: u64,
) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin,
{
    validate_filename(filename)?;

    let header = TransferHeader::new(filename, byte_length);

    writer.write_all(&header.to_bytes()).await?;
    writer.flush().await?;

    let mut payload = source.take(byte_length);
    let copied = copy(&mut payload, &mut *writer).await?;

    if copied < byte_length {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("source yielded {copied} of {byte_length} declared bytes"),
        )
        .into());
    }

    writer.flush().await?;

    Ok(())
}

/// Reads one header and hands back a reader bounded to its payload.
///
/// The bounded reader never pulls bytes past the declared length, so the
/// next frame stays intact in `reader`'s buffer.
pub async fn read_frame<R>(reader: &mut R) -> Result<(TransferHeader, Take<&mut R>), TransferError>
where
    R: AsyncBufRead + Unpin,
{
    let filename = read_header_line(reader, "filename").await?;
    let length = read_header_line(reader, "length").await?;

    let digits = length.trim();

    let byte_length = digits
        .bytes()
        .all(|b| b.is_ascii_digit())
        .then(|| digits.parse::<u64>().ok())
        .flatten()
        .ok_or_else(|| TransferError::protocol(format!("invalid length line {length:?}")))?;

    let header = TransferHeader {
        filename,
        byte_length,
    };

    Ok((header, reader.take(byte_length)))
}

async fn read_header_line<R>(reader: &mut R, field: &str) -> Result<String, TransferError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();

    let read = (&mut *reader)
        .take(MAX_HEADER_LINE)
        .read_until(b'\n', &mut line)
        .await?;

    if read == 0 {
        return Err(TransferError::protocol(format!(
            "stream closed before the {field} line"
        )));
    }

    if line.last() != Some(&b'\n') {
        let reason = if line.len() as u64 >= MAX_HEADER_LINE {
            "exceeds the header line limit"
        } else {
            "was cut short by the stream closing"
        };

        return Err(TransferError::protocol(format!("{field} line {reason}")));
    }

    let line = String::from_utf8(line)
        .map_err(|_| TransferError::protocol(format!("{field} line is not valid UTF-8")))?;

    Ok(line.trim_end().to_owned())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    use super::*;

    async fn encode(filename: &str, payload: &[u8]) -> Vec<u8> {
        let mut wire = Vec::new();
        write_frame(&mut wire, filename, payload, payload.len() as u64)
            .await
            .unwrap();
        wire
    }

    #[tokio::test]
    async fn frame_layout_on_the_wire() {
        let wire = encode("a.txt", b"0123456789").await;

        assert_eq!(wire, b"a.txt\n10\n0123456789", "unexpected wire format");
    }

    #[tokio::test]
    async fn round_trip_including_empty_payload() {
        for payload in [&b""[..], &b"x"[..], &b"hello\nworld\n"[..], &[0_u8, 255, 10, 13][..]] {
            let wire = encode("file.bin", payload).await;
            let mut reader = BufReader::new(Cursor::new(wire));

            let (header, mut body) = read_frame(&mut reader).await.unwrap();
            let mut received = Vec::new();
            let _ = body.read_to_end(&mut received).await.unwrap();

            assert_eq!(header.filename, "file.bin", "filename should round trip");
            assert_eq!(
                header.byte_length,
                payload.len() as u64,
                "length should round trip"
            );
            assert_eq!(received, payload, "payload should round trip");
        }
    }

    #[tokio::test]
    async fn payload_reader_stops_at_declared_length() {
        let mut wire = encode("first", b"abc").await;
        wire.extend_from_slice(b"trailing bytes that belong to someone else");
        let mut reader = BufReader::new(Cursor::new(wire));

        let (_, mut body) = read_frame(&mut reader).await.unwrap();
        let mut received = Vec::new();
        let _ = body.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"abc", "payload must stop at declared length");

        let mut rest = String::new();
        let _ = reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(
            rest, "trailing bytes that belong to someone else",
            "bytes past the payload must stay unread"
        );
    }

    #[tokio::test]
    async fn consecutive_frames_share_one_stream() {
        let mut wire = encode("one", b"1").await;
        wire.extend(encode("two", b"22").await);
        let mut reader = BufReader::new(Cursor::new(wire));

        for (name, payload) in [("one", &b"1"[..]), ("two", &b"22"[..])] {
            let (header, mut body) = read_frame(&mut reader).await.unwrap();
            let mut received = Vec::new();
            let _ = body.read_to_end(&mut received).await.unwrap();

            assert_eq!(header.filename, name, "frames should arrive in order");
            assert_eq!(received, payload, "payloads should not bleed together");
        }
    }

    #[tokio::test]
    async fn header_split_across_reads() {
        let stream = Builder::new()
            .read(b"rep")
            .read(b"ort.pdf\n1")
            .read(b"2\nhello")
            .read(b", world")
            .build();
        let mut reader = BufReader::new(stream);

        let (header, mut body) = read_frame(&mut reader).await.unwrap();
        let mut received = Vec::new();
        let _ = body.read_to_end(&mut received).await.unwrap();

        assert_eq!(
            header,
            TransferHeader::new("report.pdf", 12),
            "header should be reassembled"
        );
        assert_eq!(received, b"hello, world", "payload should be reassembled");
    }

    #[tokio::test]
    async fn trailing_whitespace_is_trimmed() {
        let mut reader = BufReader::new(Cursor::new(b"notes.md \r\n 3 \r\nabc".to_vec()));

        let (header, _) = read_frame(&mut reader).await.unwrap();

        assert_eq!(
            header,
            TransferHeader::new("notes.md", 3),
            "whitespace around header values should be dropped"
        );
    }

    #[tokio::test]
    async fn missing_or_broken_header_is_a_protocol_error() {
        let cases: [&[u8]; 8] = [
            b"",
            b"name-only\n",
            b"name\n12",
            b"name\nabc\n",
            b"name\n-1\n",
            b"name\n+5\nhello",
            b"name\n1_0\n",
            b"name\n\n",
        ];

        for wire in cases {
            let mut reader = BufReader::new(Cursor::new(wire.to_vec()));

            let err = read_frame(&mut reader).await.unwrap_err();

            assert!(
                matches!(err, TransferError::Protocol(_)),
                "{wire:?} should be a protocol error, got {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn oversized_header_line_is_rejected() {
        let mut wire = vec![b'a'; MAX_HEADER_LINE as usize + 10];
        wire.extend_from_slice(b"\n1\nx");
        let mut reader = BufReader::new(Cursor::new(wire));

        let err = read_frame(&mut reader).await.unwrap_err();

        assert!(
            matches!(err, TransferError::Protocol(ref msg) if msg.contains("limit")),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn short_source_is_an_io_error() {
        let mut wire = Vec::new();

        let err = write_frame(&mut wire, "short.bin", &b"abc"[..], 10)
            .await
            .unwrap_err();

        assert!(
            matches!(err, TransferError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof),
            "unexpected error: {err:?}"
        );
        assert_eq!(
            wire, b"short.bin\n10\nabc",
            "partial frame stays on the wire"
        );
    }

    #[tokio::test]
    async fn writer_rejects_names_that_break_the_header() {
        for name in ["", "two\nlines", "dir/file", "..", "tab\tname", "trailing "] {
            let mut wire = Vec::new();

            let err = write_frame(&mut wire, name, &b""[..], 0).await.unwrap_err();

            assert!(
                matches!(err, TransferError::InvalidFilename(_)),
                "{name:?} should be rejected, got {err:?}"
            );
            assert!(wire.is_empty(), "nothing should be written for {name:?}");
        }
    }

    #[test]
    fn filename_validation() {
        for ok in ["a.txt", "report 2024.pdf", ".hidden", "файл.txt"] {
            assert!(validate_filename(ok).is_ok(), "{ok:?} should be accepted");
        }

        for bad in ["../etc/passwd", "..", "a\\b", "nul\0byte", "/abs"] {
            assert!(
                validate_filename(bad).is_err(),
                "{bad:?} should be rejected"
            );
        }
    }
}
