//! The NNTP command table: one handler per command name, dispatched
//! case-insensitively from the read loop in [`super::run_connection`]
//! (§4.5).

use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::error::{Result, ServerError};
use crate::model::ArticleRef;
use crate::posting::{self, PostContext};

use super::response::{
    read_post_body_bounded, write_dotted_block, write_dotted_block_with_body, write_dotted_body, write_line,
};
use super::session::Session;

/// `true` if the connection should close after this command.
pub type ShouldClose = bool;

fn format_msgid(local: &str, server_name: &str) -> String {
    format!("<{}@{}>", local, server_name)
}

fn strip_angle_brackets(token: &str) -> &str {
    token.trim_start_matches('<').trim_end_matches('>')
}

/// Resolves an `id|num` token per §4.5: a plain integer is a 1-based
/// article number within the selected group; anything else (or an integer
/// with no group selected) is a message-id.
async fn resolve(
    session: &Session,
    token: &str,
) -> Result<(u64, String, ArticleRef)> {
    if let Ok(number) = token.parse::<u64>() {
        let group = session.current_group.as_ref().ok_or(ServerError::NoGroupSelected)?;
        let r = session.backend.article_by_number(group, number).await?;
        let msgid = ArticleRef::unpack_msgid(&r.raw_msgid);
        return Ok((number, msgid, r));
    }
    let msgid = strip_angle_brackets(token).to_string();
    let r = session
        .backend
        .article_by_msgid(&msgid)
        .await
        .map_err(|_| ServerError::NoSuchArticleId)?;
    Ok((0, msgid, r))
}

/// `OVER`/`XOVER` range syntax: empty -> `[0, +inf)`; `"N"` -> `[0, N]`;
/// `"A-B"` -> `[A, B]` with a missing `B` meaning `+inf`.
fn parse_range(arg: &str) -> (u64, u64) {
    let arg = arg.trim();
    if arg.is_empty() {
        return (0, u64::MAX);
    }
    if let Some((a, b)) = arg.split_once('-') {
        let start: u64 = a.parse().unwrap_or(0);
        let end: u64 = if b.is_empty() { u64::MAX } else { b.parse().unwrap_or(u64::MAX) };
        (start, end)
    } else {
        let n: u64 = arg.parse().unwrap_or(u64::MAX);
        (0, n)
    }
}

pub async fn dispatch<R, W>(
    session: &mut Session,
    cmd: &str,
    args: &str,
    reader: &mut R,
    writer: &mut W,
) -> Result<ShouldClose>
where
    R: AsyncBufReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    match cmd.to_ascii_uppercase().as_str() {
        "QUIT" => {
            write_line(writer, "205 bye").await?;
            return Ok(true);
        }
        "GROUP" => handle_group(session, args, writer).await?,
        "LIST" => handle_list(session, args, writer).await?,
        "NEWGROUPS" => {
            write_line(writer, "231 list of new newsgroups follows").await?;
            write_dotted_block(writer, std::iter::empty::<&str>()).await?;
        }
        "HEAD" => handle_head(session, args, writer).await?,
        "BODY" => handle_body(session, args, writer).await?,
        "ARTICLE" => handle_article(session, args, writer).await?,
        "STAT" => handle_stat(session, args, writer).await?,
        "OVER" | "XOVER" => handle_over(session, args, writer).await?,
        "POST" => handle_post(session, reader, writer).await?,
        "IHAVE" => handle_ihave(session, args, reader, writer).await?,
        "CAPABILITIES" => handle_capabilities(session, writer).await?,
        "MODE" => handle_mode(session, args, writer).await?,
        "AUTHINFO" => handle_authinfo(session, args, writer).await?,
        _ => write_line(writer, "500 Unknown command").await?,
    }
    Ok(false)
}

async fn handle_group<W: AsyncWriteExt + Unpin>(session: &mut Session, args: &str, writer: &mut W) -> Result<()> {
    let name = args.trim();
    match session.backend.group_summary(name).await {
        Ok(summary) => {
            session.current_group = Some(name.to_string());
            write_line(
                writer,
                &format!("211 {} {} {} {}", summary.count, summary.low, summary.high, summary.name),
            )
            .await?;
        }
        Err(_) => write_line(writer, "411 No such newsgroup").await?,
    }
    Ok(())
}

async fn handle_list<W: AsyncWriteExt + Unpin>(session: &Session, args: &str, writer: &mut W) -> Result<()> {
    let kind = args.trim().to_ascii_lowercase();
    let groups = session.backend.list_groups().await;
    match kind.as_str() {
        "" | "active" => {
            write_line(writer, "215 list of newsgroups follows").await?;
            let lines: Vec<String> = groups
                .iter()
                .map(|g| format!("{} {} {} {}", g.name, g.high, g.low, g.posting.as_active_char()))
                .collect();
            write_dotted_block(writer, lines.into_iter()).await?;
        }
        "newsgroups" => {
            write_line(writer, "215 list of newsgroups follows").await?;
            let lines: Vec<String> = groups.iter().map(|g| format!("{} {}", g.name, g.desc)).collect();
            write_dotted_block(writer, lines.into_iter()).await?;
        }
        "overview.fmt" => {
            write_line(writer, "215 order of fields in overview database").await?;
            let fields = [
                "Subject:", "From:", "Date:", "Message-ID:", "References:", "Bytes:", "Lines:",
            ];
            write_dotted_block(writer, fields.into_iter()).await?;
        }
        _ => write_line(writer, "500 Unknown command").await?,
    }
    Ok(())
}

async fn handle_head<W: AsyncWriteExt + Unpin>(session: &Session, args: &str, writer: &mut W) -> Result<()> {
    match resolve(session, args.trim()).await {
        Ok((num, msgid, r)) => {
            let headers = session.backend.read_headers(r).await?;
            write_line(writer, &format!("221 {} {}", num, format_msgid(&msgid, &session.server_name))).await?;
            let lines: Vec<String> = rendered_header_lines(&headers, &msgid, &session.server_name);
            write_dotted_block(writer, lines.into_iter()).await?;
        }
        Err(e) => write_line(writer, &error_line(&e)).await?,
    }
    Ok(())
}

async fn handle_body<W: AsyncWriteExt + Unpin>(session: &Session, args: &str, writer: &mut W) -> Result<()> {
    match resolve(session, args.trim()).await {
        Ok((num, msgid, r)) => {
            let article = session.backend.read_article(r).await?;
            write_line(writer, &format!("222 {} {}", num, format_msgid(&msgid, &session.server_name))).await?;
            write_dotted_body(writer, &article.body).await?;
        }
        Err(e) => write_line(writer, &error_line(&e)).await?,
    }
    Ok(())
}

async fn handle_article<W: AsyncWriteExt + Unpin>(session: &Session, args: &str, writer: &mut W) -> Result<()> {
    match resolve(session, args.trim()).await {
        Ok((num, msgid, r)) => {
            let article = session.backend.read_article(r).await?;
            write_line(writer, &format!("220 {} {}", num, format_msgid(&msgid, &session.server_name))).await?;
            let mut lines = rendered_header_lines(&article.headers, &msgid, &session.server_name);
            lines.push(String::new());
            write_dotted_block_with_body(writer, lines.into_iter(), &article.body).await?;
        }
        Err(e) => write_line(writer, &error_line(&e)).await?,
    }
    Ok(())
}

async fn handle_stat<W: AsyncWriteExt + Unpin>(session: &Session, args: &str, writer: &mut W) -> Result<()> {
    match resolve(session, args.trim()).await {
        Ok((num, msgid, _)) => {
            write_line(writer, &format!("223 {} {}", num, format_msgid(&msgid, &session.server_name))).await?;
        }
        Err(e) => write_line(writer, &error_line(&e)).await?,
    }
    Ok(())
}

async fn handle_over<W: AsyncWriteExt + Unpin>(session: &Session, args: &str, writer: &mut W) -> Result<()> {
    let Some(group) = session.current_group.clone() else {
        write_line(writer, "412 No newsgroup selected").await?;
        return Ok(());
    };
    let (start, end) = parse_range(args);
    let refs = session.backend.slice_group(&group, start, end).await?;
    write_line(writer, "224 overview information follows").await?;
    let mut lines = Vec::with_capacity(refs.len());
    for (num, r) in refs {
        let headers = session.backend.read_headers(r).await?;
        let msgid = ArticleRef::unpack_msgid(&r.raw_msgid);
        let subject = headers.get("subject").unwrap_or("").to_string();
        let from = headers.get("from").unwrap_or("").to_string();
        let date = headers.get("date").unwrap_or("").to_string();
        let references = headers.get("references").unwrap_or("").to_string();
        let bytes = headers.get("x-length").unwrap_or("0").to_string();
        let line_count = headers.get("x-lines").unwrap_or("0").to_string();
        lines.push(format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            num,
            subject,
            from,
            date,
            format_msgid(&msgid, &session.server_name),
            references,
            bytes,
            line_count
        ));
    }
    write_dotted_block(writer, lines.into_iter()).await?;
    Ok(())
}

async fn handle_post<R, W>(session: &mut Session, reader: &mut R, writer: &mut W) -> Result<()>
where
    R: AsyncBufReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    write_line(writer, "340 send article").await?;
    run_post_body(session, reader, writer, "240 article posted", false).await
}

async fn handle_ihave<R, W>(session: &mut Session, args: &str, reader: &mut R, writer: &mut W) -> Result<()>
where
    R: AsyncBufReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let msgid = strip_angle_brackets(args.trim());
    if session.backend.msgid_exists(msgid).await {
        write_line(writer, "435 Article not wanted").await?;
        return Ok(());
    }
    write_line(writer, "335 send article").await?;
    run_post_body(session, reader, writer, "235 article transferred", true).await
}

async fn run_post_body<R, W>(
    session: &mut Session,
    reader: &mut R,
    writer: &mut W,
    success_line: &str,
    is_ihave: bool,
) -> Result<()>
where
    R: AsyncBufReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let config = session.backend.config().await;
    let max_body_bytes = (config.max_post_size as usize).saturating_mul(4) / 3;
    let (raw_headers, body) = match read_post_body_bounded(reader, max_body_bytes.max(1)).await {
        Ok(v) => v,
        Err(_) => {
            write_line(writer, "441 Posting failed: Post too large").await?;
            return Ok(());
        }
    };

    let moderator_email = session.moderator_email().await;
    let ctx = PostContext {
        backend: &session.backend,
        cooldowns: &session.cooldowns,
        peer_ip: session.peer_ip,
        moderator_email: moderator_email.as_deref(),
        server_name: &session.server_name,
    };
    match posting::post(&ctx, &raw_headers, body).await {
        Ok(_) => write_line(writer, success_line).await?,
        Err(e) => {
            let code = if is_ihave { 437 } else { e.code().unwrap_or(441) };
            write_line(writer, &format!("{} {}", code, e.reply_text())).await?;
        }
    }
    Ok(())
}

async fn handle_capabilities<W: AsyncWriteExt + Unpin>(_session: &Session, writer: &mut W) -> Result<()> {
    write_line(writer, "101 capability list follows").await?;
    // Posting rights are evaluated per-group by the posting pipeline, so
    // the capability list always advertises POST/IHAVE; a session without
    // rights to any particular group is rejected there, not here.
    let mut lines = vec![
        "VERSION 2".to_string(),
        "READER".to_string(),
        "POST".to_string(),
        "IHAVE".to_string(),
    ];
    lines.push("OVER".to_string());
    lines.push("XOVER".to_string());
    lines.push("LIST ACTIVE NEWSGROUPS OVERVIEW.FMT".to_string());
    write_dotted_block(writer, lines.into_iter()).await?;
    Ok(())
}

async fn handle_mode<W: AsyncWriteExt + Unpin>(_session: &Session, args: &str, writer: &mut W) -> Result<()> {
    if args.trim().eq_ignore_ascii_case("reader") {
        write_line(writer, "200 Reader mode, posting permitted").await?;
    } else {
        write_line(writer, "500 Unknown command").await?;
    }
    Ok(())
}

async fn handle_authinfo<W: AsyncWriteExt + Unpin>(session: &mut Session, args: &str, writer: &mut W) -> Result<()> {
    let mut parts = args.splitn(2, ' ');
    let sub = parts.next().unwrap_or("").to_ascii_uppercase();
    let value = parts.next().unwrap_or("").trim();
    match sub.as_str() {
        "USER" => {
            session.pending_user = Some(value.to_string());
            write_line(writer, "381 more authentication information required").await?;
        }
        "PASS" => {
            let Some(user) = session.pending_user.take() else {
                write_line(writer, "482 authentication out of sequence").await?;
                return Ok(());
            };
            if session.backend.is_moderator(&user, value).await {
                session.auth = Some(crate::model::AuthIdentity {
                    user,
                    pass: value.to_string(),
                });
                write_line(writer, "281 authentication accepted").await?;
            } else {
                write_line(writer, "452 authorization rejected").await?;
            }
        }
        _ => write_line(writer, "501 Syntax error").await?,
    }
    Ok(())
}

fn rendered_header_lines(headers: &crate::article::Headers, msgid: &str, server_name: &str) -> Vec<String> {
    let mut out: Vec<String> = headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("x-message-id"))
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect();
    out.push(format!("Message-Id: {}", format_msgid(msgid, server_name)));
    out
}

fn error_line(err: &ServerError) -> String {
    match err.code() {
        Some(code) => format!("{} {}", code, err.reply_text()),
        None => format!("501 {}", err),
    }
}
