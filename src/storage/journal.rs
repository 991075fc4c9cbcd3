//! The text index file: one tagged record per line, replayed in order to
//! rebuild the in-memory backend on startup (§4.2, §4.3).

use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::base36;
use crate::error::{Result, ServerError};
use crate::model::{BaseGroupInfo, Config, ModInfo};

/// A single parsed journal record. `Nop` is the masked-out form used to
/// soft-delete a corrupt line without reindexing the file.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalRecord {
    Nop,
    Group(BaseGroupInfo),
    Article {
        group: String,
        msgid: String,
        data_file_index: u32,
        offset: u64,
        length: u64,
    },
    Delete {
        msgid: String,
    },
    Mod(ModInfo),
    Blacklist {
        name: String,
        cidr: String,
    },
    Config(Config),
}

impl JournalRecord {
    /// Render to the on-disk line form (without the leading `\n` separator
    /// or trailing newline -- the store adds those).
    fn encode(&self) -> Result<String> {
        Ok(match self {
            JournalRecord::Nop => " ".to_string(),
            JournalRecord::Group(info) => format!("G{}", serde_json::to_string(info)?),
            JournalRecord::Article {
                group,
                msgid,
                data_file_index,
                offset,
                length,
            } => format!(
                "A{} {} {} {} {}",
                group,
                msgid,
                data_file_index,
                base36::encode(*offset),
                base36::encode(*length)
            ),
            JournalRecord::Delete { msgid } => format!("D{}", msgid),
            JournalRecord::Mod(info) => format!("m{}", serde_json::to_string(info)?),
            JournalRecord::Blacklist { name, cidr } => format!("B{} {}", name, cidr),
            JournalRecord::Config(cfg) => format!("C{}", serde_json::to_string(cfg)?),
        })
    }

    /// Parse a single non-empty journal line. Malformed lines return `None`
    /// rather than an error -- the caller logs and skips them, per §4.3.
    fn parse(line: &str) -> Option<JournalRecord> {
        let mut chars = line.chars();
        let tag = chars.next()?;
        let rest = chars.as_str();
        match tag {
            ' ' => Some(JournalRecord::Nop),
            'G' => serde_json::from_str(rest).ok().map(JournalRecord::Group),
            'A' => {
                let mut parts = rest.split_whitespace();
                let group = parts.next()?.to_string();
                let msgid = parts.next()?.to_string();
                let data_file_index: u32 = parts.next()?.parse().ok()?;
                let offset = base36::decode(parts.next()?)?;
                let length = base36::decode(parts.next()?)?;
                Some(JournalRecord::Article {
                    group,
                    msgid,
                    data_file_index,
                    offset,
                    length,
                })
            }
            'D' => Some(JournalRecord::Delete {
                msgid: rest.to_string(),
            }),
            'm' => serde_json::from_str(rest).ok().map(JournalRecord::Mod),
            'B' => {
                let mut parts = rest.split_whitespace();
                let name = parts.next()?.to_string();
                let cidr = parts.next()?.to_string();
                Some(JournalRecord::Blacklist { name, cidr })
            }
            'C' => serde_json::from_str(rest).ok().map(JournalRecord::Config),
            _ => None,
        }
    }
}

/// The journal file itself. Appends are `\n`-prefixed for crash
/// self-synchronization; reads replay the whole file in order.
pub struct JournalStore {
    path: PathBuf,
}

impl JournalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Callers must hold the backend's file mutex so
    /// appends never interleave with each other or with data-file writes.
    pub async fn append(&self, record: &JournalRecord) -> Result<()> {
        let line = record.encode()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut buf = Vec::with_capacity(line.len() + 2);
        buf.push(b'\n');
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        let written = file.write(&buf).await?;
        if written != buf.len() {
            return Err(ServerError::Other("short journal write".to_string()));
        }
        file.flush().await?;
        Ok(())
    }

    /// Read every record in the journal, in order, along with its 1-based
    /// line number. Blank lines are skipped silently; malformed lines are
    /// returned as `None` so the caller can log and continue.
    pub async fn read_all(&self) -> Result<Vec<(usize, Option<JournalRecord>)>> {
        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;

        let mut out = Vec::new();
        for (idx, line) in contents.split('\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            out.push((idx + 1, JournalRecord::parse(line)));
        }
        Ok(out)
    }

    /// Rewrite the given 1-based line numbers to a single space byte,
    /// masking known-corrupt records without touching the rest of the file
    /// (§4.3 maintenance operation).
    pub async fn mask_lines(&self, line_numbers: &[usize]) -> Result<()> {
        let mut file = OpenOptions::new().read(true).open(&self.path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        drop(file);

        let mut lines: Vec<&str> = contents.split('\n').collect();
        for &n in line_numbers {
            if n >= 1 && n <= lines.len() {
                lines[n - 1] = " ";
            }
        }
        let rewritten = lines.join("\n");

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&self.path)
            .await?;
        file.write_all(rewritten.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
