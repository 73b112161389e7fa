//! Directory-backed message source.
//!
//! Each regular file in the spool directory is one message. Files are
//! consumed in file-name order; the file stem becomes the transport
//! correlation token. Writers create `<name>.tmp` and rename into place, so
//! files with a `.tmp` extension are never read.
//!
//! A delivered file is removed on the next `receive` or on `close`, after the
//! caller has taken the message. Dropping a `receive` future therefore never
//! loses a message; at worst a file is read again.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use super::{MessageSource, SourceError};
use crate::message::RawMessage;

/// Extension of files still being written.
pub const TMP_EXTENSION: &str = "tmp";

pub struct SpoolSource {
    dir: PathBuf,
    poll_interval: Duration,
    pending: VecDeque<PathBuf>,
    /// Last file handed to the caller, not yet removed.
    delivered: Option<PathBuf>,
}

impl SpoolSource {
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll_interval,
            pending: VecDeque::new(),
            delivered: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Refill the pending queue from a directory listing.
    async fn scan(&mut self) -> Result<(), SourceError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == TMP_EXTENSION) {
                continue;
            }
            if entry.file_type().await?.is_file() {
                files.push(path);
            }
        }

        files.sort();
        self.pending = files.into();
        Ok(())
    }

    /// Remove the previously delivered file.
    async fn acknowledge(&mut self) -> Result<(), SourceError> {
        if let Some(path) = &self.delivered {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.delivered = None;
        }
        Ok(())
    }

    /// Take the next ready file, if any.
    async fn next_message(&mut self) -> Result<Option<RawMessage>, SourceError> {
        self.acknowledge().await?;

        if self.pending.is_empty() {
            self.scan().await?;
        }

        while let Some(path) = self.pending.front().cloned() {
            let payload = match tokio::fs::read(&path).await {
                Ok(payload) => payload,
                // Consumed or moved away since the scan.
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.pending.pop_front();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // No await between here and the return.
            self.pending.pop_front();
            let token = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.delivered = Some(path);

            return Ok(Some(RawMessage::new(payload, token)));
        }

        Ok(None)
    }
}

impl MessageSource for SpoolSource {
    fn name(&self) -> &str {
        "spool"
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let meta = tokio::fs::metadata(&self.dir).await.map_err(|e| {
            SourceError::Unavailable(format!("spool directory {}: {e}", self.dir.display()))
        })?;
        if !meta.is_dir() {
            return Err(SourceError::Unavailable(format!(
                "spool path {} is not a directory",
                self.dir.display()
            )));
        }
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<RawMessage>, SourceError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(msg) = self.next_message().await? {
                return Ok(Some(msg));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.acknowledge().await {
            tracing::warn!(dir = %self.dir.display(), error = %e, "removing delivered spool file");
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_missing_directory_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut source = SpoolSource::new(tmp.path().join("absent"), Duration::from_millis(10));
        let err = source.open().await.expect_err("missing dir");
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_reads_in_name_order_and_removes() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join("0002-b.msg"), "second").expect("write");
        std::fs::write(tmp.path().join("0001-a.msg"), "first").expect("write");

        let mut source = SpoolSource::new(tmp.path(), Duration::from_millis(10));
        source.open().await.expect("open");

        let first = source
            .receive(Duration::from_millis(50))
            .await
            .expect("ok")
            .expect("message");
        assert_eq!(first.payload, b"first");
        assert_eq!(first.correlation_token, b"0001-a");
        // Kept until the caller comes back for the next message.
        assert!(tmp.path().join("0001-a.msg").exists());

        let second = source
            .receive(Duration::from_millis(50))
            .await
            .expect("ok")
            .expect("message");
        assert_eq!(second.payload, b"second");
        assert!(!tmp.path().join("0001-a.msg").exists());

        source.close().await;
        assert!(!tmp.path().join("0002-b.msg").exists());
    }

    #[tokio::test]
    async fn test_dropped_receive_never_loses_a_message() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let expected: Vec<String> = (0..20).map(|i| format!("payload-{i:02}")).collect();
        for (i, body) in expected.iter().enumerate() {
            std::fs::write(tmp.path().join(format!("{i:04}.msg")), body).expect("write");
        }

        let mut source = SpoolSource::new(tmp.path(), Duration::from_millis(1));
        source.open().await.expect("open");

        let mut delivered = std::collections::BTreeSet::new();

        // Abandon receives at arbitrary await points.
        for _ in 0..200 {
            if let Ok(Ok(Some(msg))) =
                tokio::time::timeout(Duration::from_micros(1), source.receive(Duration::from_millis(5)))
                    .await
            {
                delivered.insert(msg.payload_text());
            }
        }

        while let Some(msg) = source
            .receive(Duration::from_millis(20))
            .await
            .expect("ok")
        {
            delivered.insert(msg.payload_text());
        }
        source.close().await;

        let expected: std::collections::BTreeSet<_> = expected.into_iter().collect();
        assert_eq!(delivered, expected);
        assert_eq!(std::fs::read_dir(tmp.path()).expect("read dir").count(), 0);
    }

    #[tokio::test]
    async fn test_ignores_tmp_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join("0001.tmp"), "partial").expect("write");

        let mut source = SpoolSource::new(tmp.path(), Duration::from_millis(5));
        source.open().await.expect("open");

        let got = source.receive(Duration::from_millis(20)).await.expect("ok");
        assert!(got.is_none());
        assert!(tmp.path().join("0001.tmp").exists());
    }

    #[tokio::test]
    async fn test_picks_up_files_written_while_waiting() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().to_path_buf();

        let mut source = SpoolSource::new(&dir, Duration::from_millis(5));
        source.open().await.expect("open");

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            std::fs::write(dir.join("late.tmp"), "late").expect("write");
            std::fs::rename(dir.join("late.tmp"), dir.join("late.msg")).expect("rename");
        });

        let got = source
            .receive(Duration::from_secs(2))
            .await
            .expect("ok")
            .expect("message");
        assert_eq!(got.payload, b"late");
        writer.await.expect("writer");
    }
}
