//! Durable record shapes shared between the journal, the backend, and the
//! wire protocol.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Whether a group accepts posts, and from whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostingStatus {
    #[serde(rename = "y")]
    Permitted,
    #[serde(rename = "n")]
    NotPermitted,
    #[serde(rename = "m")]
    Moderated,
}

impl PostingStatus {
    /// Single-character status code used by LIST ACTIVE (RFC 6048 §3).
    pub fn as_active_char(&self) -> char {
        match self {
            PostingStatus::Permitted => 'y',
            PostingStatus::NotPermitted => 'n',
            PostingStatus::Moderated => 'm',
        }
    }
}

/// The journal's `G` record: the static fields of a group, replayed and
/// applied wholesale on every occurrence (a later `G` replaces the earlier
/// one in full; only the window's contents survive independently).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseGroupInfo {
    pub name: String,
    pub desc: String,
    pub posting: PostingStatus,
    pub max_lives: usize,
    pub max_post_size: u64,
    pub create_time: i64,
}

/// A stored pointer to an article's payload on disk. The message-id is kept
/// in its 16-byte padded raw form (Open Question (a) in DESIGN.md) rather
/// than as a `String`, so refs stay small and `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArticleRef {
    pub data_file_index: u32,
    pub offset: u64,
    pub length: u64,
    pub raw_msgid: [u8; 16],
}

impl ArticleRef {
    /// Pack an ASCII message-id local part into the fixed 16-byte slot,
    /// zero-padded. Longer ids are truncated to 16 bytes at the caller.
    pub fn pack_msgid(msgid: &str) -> [u8; 16] {
        let mut buf = [0u8; 16];
        let bytes = msgid.as_bytes();
        let n = bytes.len().min(16);
        buf[..n].copy_from_slice(&bytes[..n]);
        buf
    }

    /// Unpack the raw message-id back into a `String`, stopping at the
    /// first zero byte (or the full 16 bytes if none).
    pub fn unpack_msgid(raw: &[u8; 16]) -> String {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(16);
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

/// The journal's `m` record: a moderator toggle. A second `m` with the same
/// email flips `deleted`, it never inserts a duplicate entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModInfo {
    pub email: String,
    pub password: String,
}

/// A registered moderator.
#[derive(Debug, Clone)]
pub struct Moderator {
    pub email: String,
    pub password: String,
    pub deleted: bool,
}

/// A blacklist entry: a CIDR range that is refused posting/connection
/// rights, keyed by the admin-assigned `name`.
#[derive(Debug, Clone)]
pub struct BlacklistEntry {
    pub name: String,
    pub cidr: crate::cidr::Cidr,
}

/// The journal's `C` record: server-wide posting configuration. Replaces
/// the prior configuration wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub max_post_size: u64,
    pub throt_cmd_window_seconds: u64,
    pub throt_cmd_interval_millis: u64,
    pub post_interval_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_post_size: 1_000_000,
            throt_cmd_window_seconds: 1,
            throt_cmd_interval_millis: 100,
            post_interval_seconds: 60,
        }
    }
}

/// The identity a session authenticates as via AUTHINFO USER/PASS.
#[derive(Debug, Clone)]
pub struct AuthIdentity {
    pub user: String,
    pub pass: String,
}

/// Current Unix time in seconds, used for `create_time` stamps and cooldown
/// bookkeeping.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
