//! The posting pipeline: turns a raw header block plus a bounded body
//! stream into a stored, cross-posted article (§4.4).

use std::net::IpAddr;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::Mutex;

use crate::article::{Article, Headers};
use crate::backend::Backend;
use crate::base36;
use crate::cache::CooldownCache;
use crate::error::{Result, ServerError};
use crate::model::unix_now;

/// Everything the pipeline needs about the posting session besides the
/// backend and the raw headers/body: who's connected, and whether they're
/// an authenticated moderator.
pub struct PostContext<'a> {
    pub backend: &'a Backend,
    pub cooldowns: &'a Mutex<CooldownCache>,
    pub peer_ip: IpAddr,
    pub moderator_email: Option<&'a str>,
    pub server_name: &'a str,
}

/// Truncates a subject to 128 Unicode scalar values, keeping an RFC 2047
/// encoded-word intact rather than splitting it, per §4.4 step 2.
pub fn truncate_subject(subject: &str) -> String {
    let scalars: Vec<char> = subject.chars().collect();
    if scalars.len() <= 128 {
        return subject.to_string();
    }
    if subject.trim_start().starts_with("=?") {
        return subject.to_string();
    }
    let head: String = scalars[..64].iter().collect();
    let tail: String = scalars[scalars.len() - 64..].iter().collect();
    format!("{}{}", head, tail)
}

/// Synthesizes `<unix_seconds_base36><rand32_base36>@<server-name>` when the
/// client didn't supply a usable `Message-Id` (§4.4 step 6).
pub fn synthesize_message_id(server_name: &str) -> String {
    let secs = base36::encode(unix_now());
    let rand_part = base36::encode(rand::thread_rng().r#gen::<u32>() as u64);
    format!("{}{}@{}", secs, rand_part, server_name)
}

/// Strips the `<local@host>` wrapper from a message-id header value,
/// keeping only the local part (the form stored internally, per §3/GLOSSARY).
fn local_part(msgid: &str) -> &str {
    let trimmed = msgid.trim().trim_start_matches('<').trim_end_matches('>');
    trimmed.split('@').next().unwrap_or(trimmed)
}

/// Extracts the email address inside `From`'s angle brackets, or the whole
/// trimmed value if there are none.
fn extract_email(from: &str) -> String {
    if let (Some(start), Some(end)) = (from.find('<'), from.find('>')) {
        if start < end {
            return from[start + 1..end].trim().to_string();
        }
    }
    from.trim().to_string()
}

/// The outcome of a successful post: the canonical ref and the message-id it
/// was finally registered under.
pub struct PostOutcome {
    pub msgid: String,
}

/// Runs the full posting pipeline over `raw_headers` and `body`. `raw_headers`
/// is the dot-unstuffed header block up to the blank line; `body` is the
/// dot-unstuffed, already-bounded body.
pub async fn post(ctx: &PostContext<'_>, raw_headers: &str, body: Vec<u8>) -> Result<PostOutcome> {
    let mut headers = Headers::parse(raw_headers);

    // Step 1: moderator delete command.
    if headers.get("subject").map(str::trim) == Some("d") {
        let Some(moderator) = ctx.moderator_email else {
            return Err(ServerError::NotAuthenticated);
        };
        if !ctx.backend.is_moderator_email(moderator).await {
            return Err(ServerError::NotModerator);
        }
        let target = headers
            .get("references")
            .map(|r| local_part(r).to_string())
            .ok_or_else(|| ServerError::PostingFailed("delete requires References".to_string()))?;
        ctx.backend.delete_article(&target).await?;
        return Ok(PostOutcome { msgid: target });
    }

    // Step 2: subject truncation.
    if let Some(subject) = headers.get("subject").map(str::to_string) {
        headers.set("Subject", truncate_subject(&subject));
    }

    // Step 3: sender spoof check.
    if let Some(from) = headers.get("from").map(str::to_string) {
        let email = extract_email(&from);
        if ctx.backend.is_moderator_email(&email).await {
            let authed_as_same = ctx
                .moderator_email
                .map(|m| m.eq_ignore_ascii_case(&email))
                .unwrap_or(false);
            if !authed_as_same {
                return Err(ServerError::PostingFailed(
                    "From address impersonates a moderator".to_string(),
                ));
            }
        }
    }

    // Step 4: IP policy -- blacklist, then cooldown for non-moderators.
    if ctx.backend.is_blacklisted(ctx.peer_ip).await {
        return Err(ServerError::PostingFailed("IP is blacklisted".to_string()));
    }
    let config = ctx.backend.config().await;
    let is_moderator = ctx.moderator_email.is_some();
    if !is_moderator {
        let mut cooldowns = ctx.cooldowns.lock().await;
        if let Some(last) = cooldowns.last_post(ctx.peer_ip) {
            let now = unix_now();
            let elapsed = now.saturating_sub(last);
            if elapsed < config.post_interval_seconds {
                let wait = config.post_interval_seconds - elapsed;
                return Err(ServerError::PostingFailed(format!("cooldown, wait {}s", wait)));
            }
        }
    }

    // Step 5: bounded body read already happened at the I/O boundary; here
    // we only enforce the cap against what arrived.
    let max_body = config.max_post_size.saturating_mul(4) / 3;
    if body.len() as u64 >= max_body {
        return Err(ServerError::PostingFailed("Post too large".to_string()));
    }

    // Step 6: message-id.
    let client_msgid = headers.get("message-id").map(|m| local_part(m).to_string());
    let msgid = match client_msgid {
        Some(id) if !id.is_empty() => id,
        _ => synthesize_message_id(ctx.server_name),
    };
    if ctx.backend.msgid_exists(&msgid).await {
        return Err(ServerError::PostingFailed("duplicate message-id".to_string()));
    }

    // Step 7: internal headers.
    headers.remove("Message-Id");
    headers.set("X-Message-Id", msgid.clone());
    headers.set("X-Remote-Ip", ctx.peer_ip.to_string());
    let line_count = body.iter().filter(|&&b| b == b'\n').count();
    headers.set("X-Lines", line_count.to_string());
    headers.set("X-Length", body.len().to_string());

    // Step 8: cross-post expansion.
    let newsgroups = headers.get("newsgroups").unwrap_or("").to_string();
    let targets: Vec<String> = newsgroups
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if targets.is_empty() {
        return Err(ServerError::PostingFailed("no newsgroups".to_string()));
    }

    // Step 9: payload persistence -- one canonical ref shared by every
    // target group.
    let article = Article {
        headers,
        body,
        refer: targets.clone(),
    };
    let mut article_ref = ctx.backend.write_payload(&article).await?;
    article_ref.raw_msgid = crate::model::ArticleRef::pack_msgid(&msgid);

    // Step 10: per-group fan-out.
    let mut accepted = false;
    for group in &targets {
        let posting = match ctx.backend.group_posting(group).await {
            Ok(p) => p,
            Err(_) => continue, // unknown group: silently skipped, not a hard failure.
        };
        if posting == crate::model::PostingStatus::NotPermitted && !is_moderator {
            continue;
        }
        let group_cap = ctx.backend.group_max_post_size(group).await.unwrap_or(0);
        if group_cap > 0 && article.body.len() as u64 * 4 / 3 > group_cap {
            return Err(ServerError::PostingFailed(format!(
                "Post too large (max {})",
                group_cap
            )));
        }
        if ctx.backend.post_to_group(group, &msgid, article_ref).await.is_ok() {
            accepted = true;
        }
    }

    // Step 11: global registration only if at least one group took it.
    if !accepted {
        return Err(ServerError::PostingFailed("posting failed".to_string()));
    }
    ctx.backend.register_msgid(&msgid, article_ref).await;

    if !is_moderator {
        let mut cooldowns = ctx.cooldowns.lock().await;
        cooldowns.record(ctx.peer_ip, unix_now());
    }

    Ok(PostOutcome { msgid })
}

/// Shared, process-wide cooldown cache handed to every connection's posting
/// pipeline invocation.
pub fn new_cooldown_cache(capacity: usize) -> Arc<Mutex<CooldownCache>> {
    Arc::new(Mutex::new(CooldownCache::new(capacity)))
}
