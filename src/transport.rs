// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2026 Bartek Kus
// Feature: MCP_STDIO_TRANSPORT

use anyhow::{Context, Result, anyhow};
use std::io::{BufRead, Read, Write};

/// How a message was framed on the wire. Replies mirror the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One JSON document per line (the MCP stdio default).
    Line,
    /// `Content-Length: <n>\r\n\r\n<n bytes>`.
    ContentLength,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: String,
    pub framing: Framing,
}

/// Reads a single stdio message. Returns `Ok(None)` on EOF.
///
/// A first non-blank line that starts with `{` is taken as a line-delimited
/// JSON payload; anything else opens a header block.
pub fn read_message<R: BufRead + Read>(r: &mut R) -> Result<Option<Message>> {
    let mut first_line = String::new();

    loop {
        first_line.clear();
        let n = r.read_line(&mut first_line)?;
        if n == 0 {
            return Ok(None);
        }
        if !first_line.trim().is_empty() {
            break;
        }
    }

    let trimmed = first_line.trim_end_matches(['\r', '\n']);

    if trimmed.trim_start().starts_with('{') {
        return Ok(Some(Message {
            payload: trimmed.trim().to_string(),
            framing: Framing::Line,
        }));
    }

    let mut content_length: Option<usize> = None;
    parse_header_line(trimmed, &mut content_length)?;

    loop {
        let mut line = String::new();
        let n = r.read_line(&mut line)?;
        if n == 0 {
            return Err(anyhow!("EOF while reading MCP headers"));
        }

        let l = line.trim_end_matches(['\r', '\n']);
        if l.is_empty() {
            break;
        }

        parse_header_line(l, &mut content_length)?;
    }

    let len = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;

    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)
        .context("EOF while reading MCP message body")?;

    let payload = String::from_utf8(buf).context("MCP message body is not UTF-8")?;
    Ok(Some(Message {
        payload,
        framing: Framing::ContentLength,
    }))
}

fn parse_header_line(line: &str, content_length: &mut Option<usize>) -> Result<()> {
    // Other headers (Content-Type) are accepted and ignored.
    let lower = line.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("content-length:") {
        let v = rest.trim();
        match v.parse::<usize>() {
            Ok(n) => *content_length = Some(n),
            Err(_) => return Err(anyhow!("Invalid Content-Length value: {}", v)),
        }
    }
    Ok(())
}

pub fn write_message<W: Write>(w: &mut W, payload: &[u8], framing: Framing) -> Result<()> {
    match framing {
        Framing::Line => {
            w.write_all(payload)?;
            w.write_all(b"\n")?;
        }
        Framing::ContentLength => {
            write!(w, "Content-Length: {}\r\n\r\n", payload.len())?;
            w.write_all(payload)?;
        }
    }
    w.flush()?;
    Ok(())
}
