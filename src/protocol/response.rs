//! The wire I/O boundary: CRLF line framing and dot-stuffing, implemented
//! once here and never re-implemented per command handler (§9).

use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::error::{Result, ServerError};

/// Read one CRLF- or LF-terminated line, stripped of its terminator.
pub async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::with_capacity(256);
    let n = reader.read_until(b'\n', &mut bytes).await?;
    if n == 0 {
        return Err(ServerError::ConnectionClosed);
    }
    let line = String::from_utf8_lossy(&bytes);
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Reads a dot-terminated multi-line block (e.g. a `POST` body), removing
/// byte-stuffing (a leading ".." becomes ".") and stopping at the solitary
/// `.` terminator line.
pub async fn read_dotted_block<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<String> {
    let mut out = String::new();
    loop {
        let line = read_line(reader).await?;
        if line == "." {
            break;
        }
        let content = if let Some(rest) = line.strip_prefix("..") {
            format!(".{}", rest)
        } else {
            line
        };
        out.push_str(&content);
        out.push_str("\r\n");
    }
    Ok(out)
}

/// Reads a dot-terminated `POST`/`IHAVE` block, splitting it into the raw
/// header text (read unbounded, up to the first blank line) and the body
/// (everything after, bounded by `max_body_bytes`) -- only the body is
/// capped, per §4.4 step 5.
pub async fn read_post_body_bounded<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    max_body_bytes: usize,
) -> Result<(String, Vec<u8>)> {
    let mut raw_headers = String::new();
    let mut body = Vec::new();
    let mut in_headers = true;
    loop {
        let line = read_line(reader).await?;
        if line == "." {
            break;
        }
        let content = if let Some(rest) = line.strip_prefix("..") {
            format!(".{}", rest)
        } else {
            line
        };
        if in_headers {
            if content.is_empty() {
                in_headers = false;
                continue;
            }
            raw_headers.push_str(&content);
            raw_headers.push_str("\r\n");
        } else {
            body.extend_from_slice(content.as_bytes());
            body.extend_from_slice(b"\n");
            if body.len() >= max_body_bytes {
                return Err(ServerError::PostingFailed("Post too large".to_string()));
            }
        }
    }
    Ok((raw_headers, body))
}

/// Write one CRLF-terminated line.
pub async fn write_line<W: AsyncWriteExt + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    Ok(())
}

async fn write_dotted_str_line<W: AsyncWriteExt + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    if line.starts_with('.') {
        write_line(writer, &format!(".{}", line)).await
    } else {
        write_line(writer, line).await
    }
}

async fn write_dotted_byte_line<W: AsyncWriteExt + Unpin>(writer: &mut W, line: &[u8]) -> Result<()> {
    if line.first() == Some(&b'.') {
        writer.write_all(b".").await?;
    }
    writer.write_all(line).await?;
    writer.write_all(b"\r\n").await?;
    Ok(())
}

/// Splits a raw body into lines the way [`str::lines`] would (dropping one
/// trailing empty line from a final `\n`, dropping a trailing `\r` from
/// each line), without assuming the body is valid UTF-8.
fn split_body_lines(body: &[u8]) -> Vec<&[u8]> {
    if body.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&[u8]> = body
        .split(|&b| b == b'\n')
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
        .collect();
    if lines.last() == Some(&&b""[..]) {
        lines.pop();
    }
    lines
}

/// Write a dot-terminated multi-line block, applying byte-stuffing to any
/// line that itself begins with `.`.
pub async fn write_dotted_block<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    lines: impl Iterator<Item = impl AsRef<str>>,
) -> Result<()> {
    for line in lines {
        write_dotted_str_line(writer, line.as_ref()).await?;
    }
    write_line(writer, ".").await?;
    Ok(())
}

/// Write a dot-terminated block consisting solely of a raw article body
/// (`BODY`), byte-transparent so non-UTF-8 payloads round-trip exactly
/// (§6, §8).
pub async fn write_dotted_body<W: AsyncWriteExt + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    for line in split_body_lines(body) {
        write_dotted_byte_line(writer, line).await?;
    }
    write_line(writer, ".").await?;
    Ok(())
}

/// Write a dot-terminated block made of text header lines followed by a
/// raw, byte-transparent body (`ARTICLE`).
pub async fn write_dotted_block_with_body<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    header_lines: impl Iterator<Item = impl AsRef<str>>,
    body: &[u8],
) -> Result<()> {
    for line in header_lines {
        write_dotted_str_line(writer, line.as_ref()).await?;
    }
    for line in split_body_lines(body) {
        write_dotted_byte_line(writer, line).await?;
    }
    write_line(writer, ".").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn read_line_strips_crlf() {
        let mut reader = BufReader::new(Cursor::new(b"hello\r\n".to_vec()));
        assert_eq!(read_line(&mut reader).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn read_dotted_block_unstuffs_and_stops_at_terminator() {
        let mut reader = BufReader::new(Cursor::new(b"..leading dot\r\nplain\r\n.\r\n".to_vec()));
        let block = read_dotted_block(&mut reader).await.unwrap();
        assert_eq!(block, ".leading dot\r\nplain\r\n");
    }

    #[tokio::test]
    async fn post_body_read_rejects_oversized_body_but_not_headers() {
        let mut reader = BufReader::new(Cursor::new(
            b"Subject: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\naaaaaaaaaa\r\n.\r\n".to_vec(),
        ));
        let result = read_post_body_bounded(&mut reader, 5).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn post_body_read_splits_headers_from_body() {
        let mut reader = BufReader::new(Cursor::new(b"Subject: hi\r\n\r\nhello\r\n.\r\n".to_vec()));
        let (headers, body) = read_post_body_bounded(&mut reader, 1_000_000).await.unwrap();
        assert_eq!(headers, "Subject: hi\r\n");
        assert_eq!(body, b"hello\n");
    }

    #[tokio::test]
    async fn write_dotted_block_stuffs_leading_dots() {
        let mut out = Vec::new();
        write_dotted_block(&mut out, vec![".dotted", "plain"].into_iter()).await.unwrap();
        assert_eq!(out, b"..dotted\r\nplain\r\n.\r\n");
    }

    #[tokio::test]
    async fn write_dotted_body_round_trips_non_utf8_bytes() {
        let mut out = Vec::new();
        let body = vec![b'a', 0xff, 0xfe, b'\n', b'.', b'x'];
        write_dotted_body(&mut out, &body).await.unwrap();
        assert_eq!(out, [&[b'a', 0xff, 0xfe][..], b"\r\n", b"..x\r\n", b".\r\n"].concat());
    }

    #[tokio::test]
    async fn write_dotted_block_with_body_separates_headers_and_body() {
        let mut out = Vec::new();
        write_dotted_block_with_body(
            &mut out,
            vec!["Subject: hi".to_string(), String::new()].into_iter(),
            b"hello",
        )
        .await
        .unwrap();
        assert_eq!(out, b"Subject: hi\r\n\r\nhello\r\n.\r\n");
    }
}
