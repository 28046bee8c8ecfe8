use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::stream::LineStream;

const LINE_BUFFER: usize = 256;

/// Follow a growing log file, yielding each complete line
///
/// Waits for the file to appear, and starts over from the top when the file
/// shrinks or disappears. With `from_start` unset, content already in the
/// file when following starts is skipped. The tail stops once the returned
/// stream is dropped.
pub fn follow(path: impl Into<PathBuf>, poll_interval: Duration, from_start: bool) -> LineStream {
    let path = path.into();
    let (tx, rx) = mpsc::channel(LINE_BUFFER);

    tokio::spawn(async move {
        if let Err(e) = tail_file(&path, poll_interval, from_start, &tx).await {
            error!("Stopped following {}: {}", path.display(), e);
        }
    });

    LineStream::new(rx)
}

async fn tail_file(
    path: &Path,
    poll_interval: Duration,
    from_start: bool,
    tx: &mpsc::Sender<String>,
) -> io::Result<()> {
    let mut skip_existing = !from_start;

    loop {
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if tx.is_closed() {
                    return Ok(());
                }
                // Whatever appears next was written after we started
                skip_existing = false;
                sleep(poll_interval).await;
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut reader = BufReader::new(file);
        let mut position = if skip_existing {
            reader.seek(SeekFrom::End(0)).await?
        } else {
            0
        };
        // A replacement file is read from its first line
        skip_existing = false;
        info!("Following {} from offset {}", path.display(), position);

        let mut pending = Vec::new();
        loop {
            let read = reader.read_until(b'\n', &mut pending).await?;
            if read == 0 {
                if tx.is_closed() {
                    return Ok(());
                }
                match tokio::fs::metadata(path).await {
                    Ok(meta) if meta.len() < position => {
                        debug!("{} was truncated, reopening", path.display());
                        break;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!("{} was removed, waiting for it to return", path.display());
                        break;
                    }
                    _ => {}
                }
                sleep(poll_interval).await;
                continue;
            }

            position += read as u64;
            if pending.last() != Some(&b'\n') {
                // Partial line; the rest is still being written
                continue;
            }

            let line = String::from_utf8_lossy(&pending)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            pending.clear();
            if tx.send(line).await.is_err() {
                return Ok(());
            }
        }
    }
}
