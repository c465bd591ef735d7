//! pkt-line framing (Git smart HTTP wire format, `Documentation/technical/protocol-common.txt`).

use std::io::{self, Read};

use crate::error::{Error, Result};

pub const FLUSH: &[u8] = b"0000";
const MAX_LINE_LEN: usize = 65516;

/// encode `data` as a single pkt-line (4 hex length bytes + payload)
pub fn encode(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return FLUSH.to_vec();
    }
    let len = data.len() + 4;
    let mut out = format!("{len:04x}").into_bytes();
    out.extend_from_slice(data);
    out
}

/// one decoded pkt-line: either a flush-pkt (`None`) or a payload
pub type Line = Option<Vec<u8>>;

/// read a single pkt-line from `r`. Returns `Ok(None)` on flush-pkt and
/// `Ok(Err_eof)` is never produced; EOF before a length header is an `Io` error.
pub fn read(r: &mut impl Read) -> Result<Line> {
    let mut len_buf = [0u8; 4];
    read_exact_or_err(r, &mut len_buf)?;
    let len_str = std::str::from_utf8(&len_buf)
        .map_err(|_| Error::PackFormat("pkt-line length is not ascii".into()))?;
    let len = usize::from_str_radix(len_str, 16)
        .map_err(|_| Error::PackFormat(format!("invalid pkt-line length {len_str:?}")))?;
    if len == 0 {
        return Ok(None);
    }
    if len < 4 {
        return Err(Error::PackFormat(format!("pkt-line length {len} < 4")));
    }
    let body_len = len - 4;
    if body_len > MAX_LINE_LEN {
        return Err(Error::PackFormat(format!(
            "pkt-line length {len} exceeds maximum"
        )));
    }
    let mut body = vec![0u8; body_len];
    read_exact_or_err(r, &mut body)?;
    Ok(Some(body))
}

fn read_exact_or_err(r: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    match r.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(Error::PackFormat("unexpected end of pkt-line stream".into()))
        }
        Err(e) => Err(Error::Transport(e.to_string())),
    }
}

/// read all pkt-lines up to and including the terminating flush-pkt
pub fn read_all(r: &mut impl Read) -> Result<Vec<Vec<u8>>> {
    let mut lines = Vec::new();
    while let Some(line) = read(r)? {
        lines.push(line);
    }
    Ok(lines)
}
