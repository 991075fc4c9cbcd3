//! In-memory backend: the maps and locking discipline sitting in front of
//! the journal/data storage engine (§4.3, §5).
//!
//! `state` is one `RwLock` guarding the group/moderator/blacklist/config
//! maps and the global message-id map. Each group's window gets its own
//! `RwLock` so readers on different groups never contend; `file` serializes
//! every journal and data-segment append.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::article::Article;
use crate::cidr::Cidr;
use crate::error::{Result, ServerError};
use crate::model::{ArticleRef, BaseGroupInfo, BlacklistEntry, Config, ModInfo, Moderator, unix_now};
use crate::storage::data::DataStore;
use crate::storage::journal::{JournalRecord, JournalStore};
use crate::highlow::HighLowWindow;

/// A group's static fields plus its independently-locked window.
struct GroupEntry {
    info: BaseGroupInfo,
    window: Arc<RwLock<HighLowWindow>>,
}

struct BackendState {
    groups: HashMap<String, GroupEntry>,
    msgids: HashMap<String, ArticleRef>,
    moderators: HashMap<String, Moderator>,
    blacklist: HashMap<String, BlacklistEntry>,
    config: Config,
}

struct FileState {
    journal: JournalStore,
    data: DataStore,
}

/// A read-only summary of a group's derived counters, used by `GROUP`,
/// `LIST`, and `CAPABILITIES`.
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub name: String,
    pub desc: String,
    pub posting: crate::model::PostingStatus,
    pub count: usize,
    pub low: u64,
    pub high: u64,
}

pub struct Backend {
    state: RwLock<BackendState>,
    file: Mutex<FileState>,
    started_at: u64,
}

impl Backend {
    /// Replay the journal from scratch and build a live backend, per §4.3.
    pub async fn load(db_path: impl Into<std::path::PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let journal = JournalStore::new(&db_path);
        let data = DataStore::discover(&db_path).await?;

        let mut state = BackendState {
            groups: HashMap::new(),
            msgids: HashMap::new(),
            moderators: HashMap::new(),
            blacklist: HashMap::new(),
            config: Config::default(),
        };

        let records = journal.read_all().await?;
        for (line_no, record) in records {
            let Some(record) = record else {
                warn!(line = line_no, "skipping malformed journal record");
                continue;
            };
            if let Err(e) = apply_record(&mut state, record).await {
                warn!(line = line_no, error = %e, "skipping journal record that failed to apply");
            }
        }

        for entry in state.groups.values() {
            let mut window = entry.window.write().await;
            window.set_no_purge_notify(false);
        }

        Ok(Self {
            state: RwLock::new(state),
            file: Mutex::new(FileState { journal, data }),
            started_at: unix_now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        unix_now().saturating_sub(self.started_at)
    }

    // -- groups ----------------------------------------------------------

    pub async fn group_summary(&self, name: &str) -> Result<GroupSummary> {
        let state = self.state.read().await;
        let entry = state.groups.get(name).ok_or(ServerError::NoSuchGroup)?;
        let window = entry.window.read().await;
        Ok(GroupSummary {
            name: entry.info.name.clone(),
            desc: entry.info.desc.clone(),
            posting: entry.info.posting,
            count: window.len(),
            low: window.low_base() + 1,
            high: window.high(),
        })
    }

    pub async fn list_groups(&self) -> Vec<GroupSummary> {
        let state = self.state.read().await;
        let mut out = Vec::with_capacity(state.groups.len());
        for entry in state.groups.values() {
            let window = entry.window.read().await;
            out.push(GroupSummary {
                name: entry.info.name.clone(),
                desc: entry.info.desc.clone(),
                posting: entry.info.posting,
                count: window.len(),
                low: window.low_base() + 1,
                high: window.high(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn group_max_post_size(&self, name: &str) -> Result<u64> {
        let state = self.state.read().await;
        let entry = state.groups.get(name).ok_or(ServerError::NoSuchGroup)?;
        Ok(entry.info.max_post_size)
    }

    pub async fn group_posting(&self, name: &str) -> Result<crate::model::PostingStatus> {
        let state = self.state.read().await;
        let entry = state.groups.get(name).ok_or(ServerError::NoSuchGroup)?;
        Ok(entry.info.posting)
    }

    pub async fn create_or_update_group(&self, info: BaseGroupInfo) -> Result<()> {
        let record = JournalRecord::Group(info.clone());
        let mut file = self.file.lock().await;
        file.journal.append(&record).await?;
        drop(file);

        let mut state = self.state.write().await;
        apply_group(&mut state, info, false).await;
        Ok(())
    }

    /// Resolve an absolute article number within `group` to its ref.
    pub async fn article_by_number(&self, group: &str, number: u64) -> Result<ArticleRef> {
        let state = self.state.read().await;
        let entry = state.groups.get(group).ok_or(ServerError::NoSuchGroup)?;
        let window = entry.window.read().await;
        window.get(number).ok_or(ServerError::NoSuchArticleNumber)
    }

    /// Resolve a message-id to its ref via the global map.
    pub async fn article_by_msgid(&self, msgid: &str) -> Result<ArticleRef> {
        let state = self.state.read().await;
        state
            .msgids
            .get(msgid)
            .copied()
            .ok_or(ServerError::NoSuchArticleId)
    }

    pub async fn msgid_exists(&self, msgid: &str) -> bool {
        self.state.read().await.msgids.contains_key(msgid)
    }

    /// Refs and their absolute numbers in `[i, j]` within `group`, for
    /// `OVER`/`XOVER`.
    pub async fn slice_group(&self, group: &str, i: u64, j: u64) -> Result<Vec<(u64, ArticleRef)>> {
        let state = self.state.read().await;
        let entry = state.groups.get(group).ok_or(ServerError::NoSuchGroup)?;
        let window = entry.window.read().await;
        let (refs, start, _end) = window.slice(i, j);
        Ok(refs
            .into_iter()
            .enumerate()
            .map(|(idx, r)| (start + idx as u64, r))
            .collect())
    }

    // -- articles ----------------------------------------------------------

    pub async fn read_article(&self, r: ArticleRef) -> Result<Article> {
        let file = self.file.lock().await;
        let payload = file.data.read_payload(r.data_file_index, r.offset, r.length).await?;
        drop(file);
        Article::decode(&payload)
    }

    pub async fn read_headers(&self, r: ArticleRef) -> Result<crate::article::Headers> {
        let file = self.file.lock().await;
        let payload = file.data.read_payload(r.data_file_index, r.offset, r.length).await?;
        drop(file);
        Article::decode_headers_only(&payload)
    }

    /// Write a canonical payload to the current data segment. Does not yet
    /// register it in any group or the global msgid map -- callers do that
    /// per-group via [`Backend::post_to_group`] (§4.4 steps 9-11).
    pub async fn write_payload(&self, article: &Article) -> Result<ArticleRef> {
        let encoded = article.encode();
        let mut file = self.file.lock().await;
        let loc = file.data.write_payload(&encoded).await?;
        Ok(ArticleRef {
            data_file_index: loc.data_file_index,
            offset: loc.offset,
            length: loc.length,
            raw_msgid: [0u8; 16],
        })
    }

    /// Append an `A` journal record and the ref to `group`'s window,
    /// handling any purge by unregistering the purged message-ids from the
    /// global map. Lock order is window, then backend state, matching §5.
    pub async fn post_to_group(&self, group: &str, msgid: &str, r: ArticleRef) -> Result<()> {
        let record = JournalRecord::Article {
            group: group.to_string(),
            msgid: msgid.to_string(),
            data_file_index: r.data_file_index,
            offset: r.offset,
            length: r.length,
        };
        let mut file = self.file.lock().await;
        file.journal.append(&record).await?;
        drop(file);

        let window = {
            let state = self.state.read().await;
            let entry = state.groups.get(group).ok_or(ServerError::NoSuchGroup)?;
            entry.window.clone()
        };
        let purged = {
            let mut window = window.write().await;
            window.append(r)
        };
        if !purged.is_empty() {
            let mut state = self.state.write().await;
            for p in purged {
                let id = ArticleRef::unpack_msgid(&p.raw_msgid);
                state.msgids.remove(&id);
            }
        }
        Ok(())
    }

    pub async fn register_msgid(&self, msgid: &str, r: ArticleRef) {
        let mut state = self.state.write().await;
        state.msgids.insert(msgid.to_string(), r);
    }

    pub async fn delete_article(&self, msgid: &str) -> Result<()> {
        let record = JournalRecord::Delete { msgid: msgid.to_string() };
        let mut file = self.file.lock().await;
        file.journal.append(&record).await?;
        drop(file);

        let mut state = self.state.write().await;
        state.msgids.remove(msgid);
        Ok(())
    }

    // -- moderators ----------------------------------------------------------

    pub async fn toggle_moderator(&self, info: ModInfo) -> Result<()> {
        let record = JournalRecord::Mod(info.clone());
        let mut file = self.file.lock().await;
        file.journal.append(&record).await?;
        drop(file);

        let mut state = self.state.write().await;
        apply_mod(&mut state, info);
        Ok(())
    }

    pub async fn is_moderator(&self, email: &str, password: &str) -> bool {
        let state = self.state.read().await;
        match state.moderators.get(email) {
            Some(m) => !m.deleted && m.password == password,
            None => false,
        }
    }

    pub async fn is_moderator_email(&self, email: &str) -> bool {
        let state = self.state.read().await;
        matches!(state.moderators.get(email), Some(m) if !m.deleted)
    }

    pub async fn moderator_count(&self) -> usize {
        self.state.read().await.moderators.values().filter(|m| !m.deleted).count()
    }

    // -- blacklist ----------------------------------------------------------

    pub async fn toggle_blacklist(&self, name: &str, cidr: &str) -> Result<()> {
        let record = JournalRecord::Blacklist {
            name: name.to_string(),
            cidr: cidr.to_string(),
        };
        let mut file = self.file.lock().await;
        file.journal.append(&record).await?;
        drop(file);

        let mut state = self.state.write().await;
        apply_blacklist(&mut state, name.to_string(), cidr.to_string());
        Ok(())
    }

    pub async fn is_blacklisted(&self, ip: IpAddr) -> bool {
        let state = self.state.read().await;
        state.blacklist.values().any(|b| b.cidr.contains(ip))
    }

    pub async fn blacklist_count(&self) -> usize {
        self.state.read().await.blacklist.len()
    }

    // -- config ----------------------------------------------------------

    pub async fn set_config(&self, cfg: Config) -> Result<()> {
        let record = JournalRecord::Config(cfg.clone());
        let mut file = self.file.lock().await;
        file.journal.append(&record).await?;
        drop(file);

        let mut state = self.state.write().await;
        state.config = cfg;
        Ok(())
    }

    pub async fn config(&self) -> Config {
        self.state.read().await.config.clone()
    }
}

async fn apply_record(state: &mut BackendState, record: JournalRecord) -> Result<()> {
    match record {
        JournalRecord::Nop => {}
        JournalRecord::Group(info) => apply_group(state, info, true).await,
        JournalRecord::Article {
            group,
            msgid,
            data_file_index,
            offset,
            length,
        } => {
            let entry = state.groups.get(&group).ok_or(ServerError::NoSuchGroup)?;
            let r = ArticleRef {
                data_file_index,
                offset,
                length,
                raw_msgid: ArticleRef::pack_msgid(&msgid),
            };
            // Replay runs single-task before the listener starts accepting,
            // so the window lock is always uncontended here.
            let purged = entry
                .window
                .try_write()
                .expect("window lock contended during replay")
                .append(r);
            for p in purged {
                state.msgids.remove(&ArticleRef::unpack_msgid(&p.raw_msgid));
            }
            state.msgids.insert(msgid, r);
        }
        JournalRecord::Delete { msgid } => {
            state.msgids.remove(&msgid);
        }
        JournalRecord::Mod(info) => apply_mod(state, info),
        JournalRecord::Blacklist { name, cidr } => apply_blacklist(state, name, cidr),
        JournalRecord::Config(cfg) => state.config = cfg,
    }
    Ok(())
}

async fn apply_group(state: &mut BackendState, info: BaseGroupInfo, no_purge_notify: bool) {
    match state.groups.get_mut(&info.name) {
        Some(entry) => {
            entry.window.write().await.set_max_size(info.max_lives);
            entry.info = info;
        }
        None => {
            // During replay, `no_purge_notify` stays true until replay
            // finishes, so purges triggered by replayed `A` records don't
            // try to unregister message-ids that replay hasn't seen yet.
            // A group created live starts with it off: its purges must
            // unregister message-ids from the global map immediately.
            let mut window = HighLowWindow::new(info.max_lives);
            window.set_no_purge_notify(no_purge_notify);
            state.groups.insert(
                info.name.clone(),
                GroupEntry {
                    info,
                    window: Arc::new(RwLock::new(window)),
                },
            );
        }
    }
}

fn apply_mod(state: &mut BackendState, info: ModInfo) {
    match state.moderators.get_mut(&info.email) {
        Some(existing) => existing.deleted = !existing.deleted,
        None => {
            state.moderators.insert(
                info.email.clone(),
                Moderator {
                    email: info.email,
                    password: info.password,
                    deleted: false,
                },
            );
        }
    }
}

fn apply_blacklist(state: &mut BackendState, name: String, cidr: String) {
    let parsed = match Cidr::parse(&cidr) {
        Ok(c) => c,
        Err(_) => return,
    };
    if parsed.is_delete_marker() {
        state.blacklist.remove(&name);
        return;
    }
    match state.blacklist.get(&name) {
        Some(_) => {
            state.blacklist.remove(&name);
        }
        None => {
            state.blacklist.insert(name.clone(), BlacklistEntry { name, cidr: parsed });
        }
    }
}
