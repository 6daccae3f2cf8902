use std::ffi::OsStr;
use std::fs::File as StdFile;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempPath};
use tokio::fs::File;
use tokio::io::{
    copy, sink, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::{debug, info, warn};

use crate::codec::{read_frame, validate_filename, write_frame, TransferHeader};
use crate::error::TransferError;

/// Prefix of every file written by a receiver.
pub const RECEIVED_PREFIX: &str = "received_";

const PARTIAL_SUFFIX: &str = ".part";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedFile {
    pub header: TransferHeader,
    pub path: PathBuf,
}

/// Sends one file as a single frame and closes the stream.
pub async fn send_file<S>(stream: &mut S, path: &Path) -> Result<TransferHeader, TransferError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let header = offer_file(stream, path).await?;

    stream.shutdown().await?;

    Ok(header)
}

/// Writes one file as a frame, leaving the stream open for the next one.
pub async fn offer_file<W>(writer: &mut W, path: &Path) -> Result<TransferHeader, TransferError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let filename = path
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| TransferError::InvalidFilename(path.display().to_string()))?;

    validate_filename(filename)?;

    let file = File::open(path).await?;
    let metadata = file.metadata().await?;

    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        )
        .into());
    }

    let header = TransferHeader::new(filename, metadata.len());

    debug!(filename, byte_length = header.byte_length, "Sending file");

    write_frame(writer, filename, file, header.byte_length).await?;

    Ok(header)
}

/// Receives exactly one frame into `output_dir` and closes the stream,
/// whether or not the transfer succeeded.
pub async fn receive_file<S>(stream: S, output_dir: &Path) -> Result<ReceivedFile, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);

    let result = receive_frame(&mut stream, output_dir).await;

    if let Err(err) = stream.shutdown().await {
        debug!(%err, "Failed to close transfer stream");
    }

    result
}

/// Receives one frame from a buffered stream.
///
/// The payload lands in a staging file of its own next to the destination,
/// which replaces `received_<name>` only once every declared byte arrived.
/// Concurrent receives of the same name never share a staging file; the
/// last one to complete wins.
pub async fn receive_frame<R>(reader: &mut R, output_dir: &Path) -> Result<ReceivedFile, TransferError>
where
    R: AsyncBufRead + Unpin,
{
    let (header, mut payload) = read_frame(reader).await?;

    if let Err(err) = validate_filename(&header.filename) {
        // skip the payload so the stream stays at a frame boundary
        let _skipped = copy(&mut payload, &mut sink()).await?;
        return Err(err);
    }

    let name = format!("{RECEIVED_PREFIX}{}", header.filename);
    let (file, staged) = stage(output_dir, &name)?;

    let received = write_payload(&mut payload, file).await?;

    if received != header.byte_length {
        return Err(TransferError::TruncatedTransfer {
            expected: header.byte_length,
            received,
        });
    }

    let path = output_dir.join(name);
    staged.persist(&path).map_err(io::Error::from)?;

    Ok(ReceivedFile { header, path })
}

/// Receives frames until the stream ends cleanly between two frames.
///
/// Rejected filenames are skipped; any other failure leaves the stream at an
/// unknown position and ends the loop.
pub async fn receive_frames<R>(reader: &mut R, output_dir: &Path) -> Result<u64, TransferError>
where
    R: AsyncBufRead + Unpin,
{
    let mut received = 0_u64;

    loop {
        if reader.fill_buf().await?.is_empty() {
            return Ok(received);
        }

        match receive_frame(reader, output_dir).await {
            Ok(file) => {
                received = received.saturating_add(1);
                info!(
                    filename = %file.header.filename,
                    byte_length = file.header.byte_length,
                    path = %file.path.display(),
                    "File received"
                );
            }
            Err(err) if err.is_recoverable() => warn!(%err, "Skipped frame"),
            Err(err) => return Err(err),
        }
    }
}

/// Unframed variant: everything until the sender closes becomes `path`.
/// The file is replaced only when the stream ended without an error.
pub async fn receive_whole_stream<S>(stream: S, path: &Path) -> Result<u64, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = stream;

    let result = save_whole_stream(&mut stream, path).await;

    if let Err(err) = stream.shutdown().await {
        debug!(%err, "Failed to close transfer stream");
    }

    Ok(result?)
}

async fn save_whole_stream<R>(stream: &mut R, path: &Path) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or(RECEIVED_PREFIX);

    let (file, staged) = stage(dir, name)?;

    let written = write_payload(stream, file).await?;

    staged.persist(path)?;

    Ok(written)
}

/// Creates a uniquely named `.part` file in `dir`. Dropping the returned
/// path removes the file.
fn stage(dir: &Path, name: &str) -> io::Result<(StdFile, TempPath)> {
    let staged = Builder::new()
        .prefix(&format!("{name}."))
        .suffix(PARTIAL_SUFFIX)
        .tempfile_in(dir)?;

    Ok(staged.into_parts())
}

async fn write_payload<R>(payload: &mut R, file: StdFile) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = File::from_std(file);

    let written = copy(payload, &mut file).await?;
    file.flush().await?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use core::time::Duration;
    use std::io::Cursor;

    use tempfile::tempdir;
    use tokio::io::{duplex, AsyncReadExt};
    use tokio::join;
    use tokio::time::sleep;

    use super::*;

    fn staging_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(PARTIAL_SUFFIX)
            })
            .count()
    }

    async fn wait_for_staging(dir: &Path) {
        for _ in 0..400 {
            if staging_files(dir) > 0 {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }

        panic!("no staging file appeared in {}", dir.display());
    }

    #[tokio::test]
    async fn receives_into_prefixed_file() {
        let dir = tempdir().unwrap();
        let mut reader = BufReader::new(Cursor::new(b"a.txt\n10\n0123456789".to_vec()));

        let file = receive_frame(&mut reader, dir.path()).await.unwrap();

        assert_eq!(
            file.header,
            TransferHeader::new("a.txt", 10),
            "header should be reported"
        );
        assert_eq!(
            file.path,
            dir.path().join("received_a.txt"),
            "output should be prefixed"
        );
        assert_eq!(
            std::fs::read(&file.path).unwrap(),
            b"0123456789",
            "content should match"
        );
    }

    #[tokio::test]
    async fn truncated_payload_leaves_no_output() {
        let dir = tempdir().unwrap();
        let mut reader = BufReader::new(Cursor::new(b"cut.bin\n10\n01234".to_vec()));

        let err = receive_frame(&mut reader, dir.path()).await.unwrap_err();

        assert!(
            matches!(
                err,
                TransferError::TruncatedTransfer {
                    expected: 10,
                    received: 5
                }
            ),
            "unexpected error: {err:?}"
        );
        assert_eq!(
            std::fs::read_dir(dir.path()).unwrap().count(),
            0,
            "neither the final nor the partial file may remain"
        );
    }

    #[tokio::test]
    async fn traversal_names_are_rejected_and_skipped() {
        let dir = tempdir().unwrap();
        let mut wire = b"../escape.txt\n3\nabc".to_vec();
        wire.extend_from_slice(b"ok.txt\n2\nhi");
        let mut reader = BufReader::new(Cursor::new(wire));

        let count = receive_frames(&mut reader, dir.path()).await.unwrap();

        assert_eq!(count, 1, "only the valid frame counts");
        assert!(
            !dir.path().join("received_../escape.txt").exists(),
            "traversal name must not be written"
        );
        assert_eq!(
            std::fs::read(dir.path().join("received_ok.txt")).unwrap(),
            b"hi",
            "the following frame should still be received"
        );
    }

    #[tokio::test]
    async fn frames_stop_on_protocol_error() {
        let dir = tempdir().unwrap();
        let mut reader = BufReader::new(Cursor::new(b"a\n1\nxb\nnope\n".to_vec()));

        let err = receive_frames(&mut reader, dir.path()).await.unwrap_err();

        assert!(
            matches!(err, TransferError::Protocol(_)),
            "unexpected error: {err:?}"
        );
        assert!(
            dir.path().join("received_a").exists(),
            "the first frame completed before the error"
        );
    }

    #[tokio::test]
    async fn send_then_receive_over_a_pipe() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let path = src.path().join("a.txt");
        std::fs::write(&path, b"0123456789").unwrap();

        let (mut sender, receiver) = duplex(4);

        let output = dst.path().to_path_buf();
        let receiving = tokio::spawn(async move { receive_file(receiver, &output).await });

        let sent = send_file(&mut sender, &path).await.unwrap();
        let received = receiving.await.unwrap().unwrap();

        assert_eq!(sent, TransferHeader::new("a.txt", 10), "sender header");
        assert_eq!(received.header, sent, "receiver sees the sender's header");
        assert_eq!(
            std::fs::read(received.path).unwrap(),
            b"0123456789",
            "content should survive the pipe"
        );
    }

    #[tokio::test]
    async fn sender_sees_receiver_hang_up() {
        let src = tempdir().unwrap();
        let path = src.path().join("big.bin");
        std::fs::write(&path, vec![7_u8; 256 * 1024]).unwrap();

        let (mut sender, mut receiver) = duplex(64);

        let hang_up = tokio::spawn(async move {
            let mut partial = [0_u8; 32];
            receiver.read_exact(&mut partial).await.unwrap();
            drop(receiver);
        });

        let err = send_file(&mut sender, &path).await.unwrap_err();
        hang_up.await.unwrap();

        assert!(
            matches!(err, TransferError::Io(_) | TransferError::TruncatedTransfer { .. }),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let (mut sender, _receiver) = duplex(64);

        let err = send_file(&mut sender, &dir.path().join("absent"))
            .await
            .unwrap_err();

        assert!(
            matches!(err, TransferError::Io(ref e) if e.kind() == io::ErrorKind::NotFound),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn whole_stream_variant_copies_until_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("incoming.bin");
        let (mut sender, receiver) = duplex(8);

        let target = path.clone();
        let receiving = tokio::spawn(async move { receive_whole_stream(receiver, &target).await });

        sender.write_all(b"no header, just bytes").await.unwrap();
        sender.shutdown().await.unwrap();
        drop(sender);

        let written = receiving.await.unwrap().unwrap();

        assert_eq!(written, 21, "every byte should be written");
        assert_eq!(
            std::fs::read(path).unwrap(),
            b"no header, just bytes",
            "content should match"
        );
    }

    #[tokio::test]
    async fn overlapping_receives_of_one_name_stay_whole() {
        let dir = tempdir().unwrap();
        let final_path = dir.path().join("received_x");

        let (mut slow, slow_rx) = duplex(64);
        let (mut fast, fast_rx) = duplex(64);

        let output = dir.path().to_path_buf();
        let slow_receiving = tokio::spawn(async move { receive_file(slow_rx, &output).await });

        slow.write_all(b"x\n10\nAAAAA").await.unwrap();
        wait_for_staging(dir.path()).await;

        let output = dir.path().to_path_buf();
        let fast_receiving = tokio::spawn(async move { receive_file(fast_rx, &output).await });

        fast.write_all(b"x\n10\nBBBBBBBBBB").await.unwrap();
        fast.shutdown().await.unwrap();

        let fast_file = fast_receiving.await.unwrap().unwrap();
        assert_eq!(fast_file.path, final_path, "fast receive installs the file");
        assert_eq!(
            std::fs::read(&final_path).unwrap(),
            b"BBBBBBBBBB",
            "a completed file holds only its own bytes"
        );

        slow.write_all(b"AAAAA").await.unwrap();
        slow.shutdown().await.unwrap();

        let slow_file = slow_receiving.await.unwrap().unwrap();
        assert_eq!(slow_file.path, final_path, "slow receive completes too");
        assert_eq!(
            std::fs::read(&final_path).unwrap(),
            b"AAAAAAAAAA",
            "the last completed receive wins, whole"
        );
        assert_eq!(staging_files(dir.path()), 0, "no staging file is left behind");
    }

    #[tokio::test]
    async fn concurrent_receives_of_different_names() {
        let dir = tempdir().unwrap();

        let (mut first, first_rx) = duplex(8);
        let (mut second, second_rx) = duplex(8);

        let sending = async {
            let (one, two) = join!(
                first.write_all(b"one.txt\n3\n111"),
                second.write_all(b"two.txt\n4\n2222"),
            );
            one.unwrap();
            two.unwrap();
            first.shutdown().await.unwrap();
            second.shutdown().await.unwrap();
        };

        let (one, two, ()) = join!(
            receive_file(first_rx, dir.path()),
            receive_file(second_rx, dir.path()),
            sending,
        );

        assert_eq!(one.unwrap().header, TransferHeader::new("one.txt", 3), "first header");
        assert_eq!(two.unwrap().header, TransferHeader::new("two.txt", 4), "second header");
        assert_eq!(
            std::fs::read(dir.path().join("received_one.txt")).unwrap(),
            b"111",
            "first content"
        );
        assert_eq!(
            std::fs::read(dir.path().join("received_two.txt")).unwrap(),
            b"2222",
            "second content"
        );
    }

    #[tokio::test]
    async fn overlapping_whole_stream_receives_stay_whole() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dump.bin");

        let (mut slow, slow_rx) = duplex(64);
        let (mut fast, fast_rx) = duplex(64);

        let target = path.clone();
        let slow_receiving =
            tokio::spawn(async move { receive_whole_stream(slow_rx, &target).await });

        slow.write_all(b"slow-").await.unwrap();
        wait_for_staging(dir.path()).await;

        let target = path.clone();
        let fast_receiving =
            tokio::spawn(async move { receive_whole_stream(fast_rx, &target).await });

        fast.write_all(b"fast stream").await.unwrap();
        fast.shutdown().await.unwrap();

        assert_eq!(fast_receiving.await.unwrap().unwrap(), 11, "fast byte count");
        assert_eq!(std::fs::read(&path).unwrap(), b"fast stream", "fast content");

        slow.write_all(b"finished").await.unwrap();
        slow.shutdown().await.unwrap();

        assert_eq!(slow_receiving.await.unwrap().unwrap(), 13, "slow byte count");
        assert_eq!(std::fs::read(&path).unwrap(), b"slow-finished", "slow content");
        assert_eq!(staging_files(dir.path()), 0, "no staging file is left behind");
    }
}
