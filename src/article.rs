//! Article payloads: a case-preserving, insertion-ordered multi-value
//! header map plus a body, and the binary framing used to persist them.
//!
//! Storage has to round-trip arbitrary incoming headers byte-for-byte, so
//! headers are kept as an ordered list of `(name, values)` pairs rather than
//! a fixed per-field struct (DESIGN.md, Open Question (e)).

use crate::error::{Result, ServerError};

/// An ordered, case-preserving multi-value header map.
#[derive(Debug, Clone, Default)]
pub struct Headers(Vec<(String, Vec<String>)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value under `name`, preserving `name`'s original case and
    /// creating a new entry if this is the first time it's seen.
    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        if let Some((_, values)) = self
            .0
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            values.push(value.into());
        } else {
            self.0.push((name.to_string(), vec![value.into()]));
        }
    }

    /// Replaces all values for `name` with a single value, preserving the
    /// header's position if it already existed or appending it otherwise.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        if let Some((_, values)) = self
            .0
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            *values = vec![value.into()];
        } else {
            self.0.push((name.to_string(), vec![value.into()]));
        }
    }

    /// Removes every value stored under `name`.
    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// The first value stored under `name`, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(|s| s.as_str())
    }

    pub fn get_all(&self, name: &str) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.iter().map(|s| s.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(n, vs)| vs.iter().map(move |v| (n.as_str(), v.as_str())))
    }

    /// Parse a raw `name: value` header block, handling RFC 5322 folded
    /// continuation lines (lines beginning with whitespace extend the
    /// previous header's value). Byte-transparent beyond line splitting;
    /// values are not otherwise interpreted.
    pub fn parse(raw: &str) -> Headers {
        let mut headers = Headers::new();
        let mut current: Option<(String, String)> = None;

        for line in raw.split("\r\n").flat_map(|l| l.split('\n')) {
            if line.is_empty() {
                continue;
            }
            if (line.starts_with(' ') || line.starts_with('\t')) && current.is_some() {
                let (_, value) = current.as_mut().unwrap();
                value.push(' ');
                value.push_str(line.trim());
                continue;
            }
            if let Some((name, value)) = current.take() {
                headers.push(&name, value);
            }
            if let Some(colon) = line.find(':') {
                let name = line[..colon].trim().to_string();
                let value = line[colon + 1..].trim().to_string();
                current = Some((name, value));
            }
            // Lines with no colon and no leading whitespace are malformed;
            // they're dropped rather than aborting the whole post.
        }
        if let Some((name, value)) = current {
            headers.push(&name, value);
        }
        headers
    }

    /// Render back to wire format, `name: value\r\n` per value, in
    /// insertion order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in self.iter() {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out
    }
}

/// A stored article: headers, raw body bytes, and the list of groups it was
/// cross-posted to.
#[derive(Debug, Clone, Default)]
pub struct Article {
    pub headers: Headers,
    pub body: Vec<u8>,
    pub refer: Vec<String>,
}

/// Separator constant preceding every framed payload in a data segment,
/// guarding against reading a torn/partial frame as valid.
pub const FRAME_SEPARATOR: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];

impl Article {
    /// Self-describing binary encoding: length-prefixed fields in a fixed
    /// order (headers, body, refer), so a header-only decode can stop
    /// early. Hand-rolled rather than routed through a general
    /// serialization crate (DESIGN.md, Open Question (f)).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_u32(&mut buf, self.headers.0.len() as u32);
        for (name, values) in &self.headers.0 {
            encode_str(&mut buf, name);
            encode_u32(&mut buf, values.len() as u32);
            for v in values {
                encode_str(&mut buf, v);
            }
        }
        encode_u32(&mut buf, self.body.len() as u32);
        buf.extend_from_slice(&self.body);
        encode_u32(&mut buf, self.refer.len() as u32);
        for g in &self.refer {
            encode_str(&mut buf, g);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Article> {
        let mut pos = 0usize;
        let header_count = decode_u32(buf, &mut pos)?;
        let mut headers = Headers::new();
        for _ in 0..header_count {
            let name = decode_str(buf, &mut pos)?;
            let value_count = decode_u32(buf, &mut pos)?;
            for _ in 0..value_count {
                let value = decode_str(buf, &mut pos)?;
                headers.push(&name, value);
            }
        }
        let body_len = decode_u32(buf, &mut pos)? as usize;
        let body = take(buf, &mut pos, body_len)?.to_vec();
        let refer_count = decode_u32(buf, &mut pos)?;
        let mut refer = Vec::with_capacity(refer_count as usize);
        for _ in 0..refer_count {
            refer.push(decode_str(buf, &mut pos)?);
        }
        Ok(Article {
            headers,
            body,
            refer,
        })
    }

    /// Decode only the headers section, stopping before the body. Used for
    /// HEAD/STAT/OVER, which never need the body bytes off disk.
    pub fn decode_headers_only(buf: &[u8]) -> Result<Headers> {
        let mut pos = 0usize;
        let header_count = decode_u32(buf, &mut pos)?;
        let mut headers = Headers::new();
        for _ in 0..header_count {
            let name = decode_str(buf, &mut pos)?;
            let value_count = decode_u32(buf, &mut pos)?;
            for _ in 0..value_count {
                let value = decode_str(buf, &mut pos)?;
                headers.push(&name, value);
            }
        }
        Ok(headers)
    }
}

fn encode_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn encode_str(buf: &mut Vec<u8>, s: &str) {
    encode_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|&e| e <= buf.len())
        .ok_or(ServerError::InvalidArticleNumber)?;
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}

fn decode_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let slice = take(buf, pos, 4)?;
    Ok(u32::from_be_bytes(slice.try_into().unwrap()))
}

fn decode_str(buf: &[u8], pos: &mut usize) -> Result<String> {
    let len = decode_u32(buf, pos)? as usize;
    let slice = take(buf, pos, len)?;
    Ok(String::from_utf8_lossy(slice).into_owned())
}
