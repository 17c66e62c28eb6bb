//! Shared u16-length-prefixed byte/string encoding, used by `argument`,
//! `codepoint`, and `record` for every string and decimal payload on the
//! wire (see §3/§6: `u16 length; u8[length] payload`, no padding).

use crate::error::{Error, Result};

pub fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    if bytes.len() > u16::MAX as usize {
        return Err(Error::Config(format!(
            "payload of {} bytes exceeds u16 length prefix",
            bytes.len()
        )));
    }
    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

pub fn read_bytes(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    if buf.len() < 2 {
        return Err(Error::Truncated);
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < 2 + len {
        return Err(Error::Truncated);
    }
    Ok((buf[2..2 + len].to_vec(), 2 + len))
}

pub fn read_string(buf: &[u8]) -> Result<(String, usize)> {
    let (bytes, used) = read_bytes(buf)?;
    let s = String::from_utf8(bytes).map_err(|_| Error::Truncated)?;
    Ok((s, used))
}
