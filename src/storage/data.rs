//! Binary data segments: append-only files of framed article payloads,
//! named `<db>.data.0`, `<db>.data.1`, ... (§4.2, §6).

use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::article::FRAME_SEPARATOR;
use crate::error::{Result, ServerError};

const MAX_SEGMENT_SIZE: u64 = 1 << 30; // 1 GiB, mirrors typical Usenet spool segment sizing.

/// Where a payload was written: which segment, and the byte range within it
/// occupied by the framed record (separator + length prefix + payload).
pub struct WriteLocation {
    pub data_file_index: u32,
    /// Offset of the payload bytes themselves, i.e. just past the 8-byte
    /// separator and 8-byte length prefix -- this is what callers store in
    /// `ArticleRef.offset`.
    pub offset: u64,
    pub length: u64,
}

/// Manages the set of `<db>.data.N` segments backing one journal.
pub struct DataStore {
    db_path: PathBuf,
    current_index: u32,
}

impl DataStore {
    /// Discover the highest-numbered existing segment by scanning the
    /// journal's directory for the `<db>.data.` prefix, creating segment 0
    /// if none exist yet.
    pub async fn discover(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let dir = db_path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = db_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("db")
            .to_string();
        let prefix = format!("{}.data.", file_name);

        let mut highest: Option<u32> = None;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    db_path,
                    current_index: 0,
                })
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(suffix) = name.strip_prefix(&prefix) {
                    if let Ok(idx) = suffix.parse::<u32>() {
                        highest = Some(highest.map_or(idx, |h: u32| h.max(idx)));
                    }
                }
            }
        }
        Ok(Self {
            db_path,
            current_index: highest.unwrap_or(0),
        })
    }

    fn segment_path(&self, index: u32) -> PathBuf {
        let mut p = self.db_path.clone();
        let mut name = p
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("db")
            .to_string();
        name.push_str(&format!(".data.{}", index));
        p.set_file_name(name);
        p
    }

    /// Append a framed payload to the current segment, rolling over to a
    /// new one if it would exceed the size cap. Caller must hold the
    /// backend's file mutex.
    pub async fn write_payload(&mut self, payload: &[u8]) -> Result<WriteLocation> {
        let path = self.segment_path(self.current_index);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let current_len = file.metadata().await?.len();
        if current_len > 0 && current_len + payload.len() as u64 + 16 > MAX_SEGMENT_SIZE {
            self.current_index += 1;
            return Box::pin(self.write_payload(payload)).await;
        }

        let mut frame = Vec::with_capacity(16 + payload.len());
        frame.extend_from_slice(&FRAME_SEPARATOR);
        frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        frame.extend_from_slice(payload);

        let written = file.write(&frame).await?;
        if written != frame.len() {
            return Err(ServerError::Other("short data segment write".to_string()));
        }
        file.flush().await?;

        Ok(WriteLocation {
            data_file_index: self.current_index,
            offset: current_len + 16,
            length: payload.len() as u64,
        })
    }

    /// Read a payload back, validating the separator and length prefix just
    /// before `offset`. Any mismatch is surfaced as "invalid article
    /// number", never as a raw I/O detail (§4.2).
    pub async fn read_payload(&self, data_file_index: u32, offset: u64, length: u64) -> Result<Vec<u8>> {
        let path = self.segment_path(data_file_index);
        let mut file = OpenOptions::new()
            .read(true)
            .open(&path)
            .await
            .map_err(|_| ServerError::InvalidArticleNumber)?;

        let frame_start = offset
            .checked_sub(16)
            .ok_or(ServerError::InvalidArticleNumber)?;
        file.seek(SeekFrom::Start(frame_start))
            .await
            .map_err(|_| ServerError::InvalidArticleNumber)?;

        let mut header = [0u8; 16];
        file.read_exact(&mut header)
            .await
            .map_err(|_| ServerError::InvalidArticleNumber)?;
        if header[..8] != FRAME_SEPARATOR {
            return Err(ServerError::InvalidArticleNumber);
        }
        let stored_length = u64::from_be_bytes(header[8..16].try_into().unwrap());
        if stored_length != length {
            return Err(ServerError::InvalidArticleNumber);
        }

        let mut payload = vec![0u8; length as usize];
        file.read_exact(&mut payload)
            .await
            .map_err(|_| ServerError::InvalidArticleNumber)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_db(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("newsd-data-test-{}-{}.db", std::process::id(), name));
        p
    }

    async fn cleanup(db: &Path) {
        let _ = tokio::fs::remove_file(db.with_extension("db")).await;
        for i in 0..4u32 {
            let mut p = db.to_path_buf();
            let name = format!(
                "{}.data.{}",
                db.file_name().and_then(|n| n.to_str()).unwrap(),
                i
            );
            p.set_file_name(name);
            let _ = tokio::fs::remove_file(p).await;
        }
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let db = tmp_db("roundtrip");
        cleanup(&db).await;
        let mut store = DataStore::discover(&db).await.unwrap();

        let loc = store.write_payload(b"hello world").await.unwrap();
        let back = store
            .read_payload(loc.data_file_index, loc.offset, loc.length)
            .await
            .unwrap();
        assert_eq!(back, b"hello world");

        cleanup(&db).await;
    }

    #[tokio::test]
    async fn length_mismatch_is_invalid_article_number() {
        let db = tmp_db("mismatch");
        cleanup(&db).await;
        let mut store = DataStore::discover(&db).await.unwrap();
        let loc = store.write_payload(b"payload").await.unwrap();

        let err = store
            .read_payload(loc.data_file_index, loc.offset, loc.length + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidArticleNumber));

        cleanup(&db).await;
    }

    #[tokio::test]
    async fn discover_finds_highest_existing_segment() {
        let db = tmp_db("discover");
        cleanup(&db).await;
        {
            let mut store = DataStore::discover(&db).await.unwrap();
            store.write_payload(b"a").await.unwrap();
            store.current_index = 3;
            store.write_payload(b"b").await.unwrap();
        }
        let store = DataStore::discover(&db).await.unwrap();
        assert_eq!(store.current_index, 3);
        cleanup(&db).await;
    }
}
