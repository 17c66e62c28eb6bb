//! Codepoints: interned descriptions of static call sites and log format
//! strings. Append-only, immutable once assigned an index.

use crate::error::{Error, Result};
use crate::wire::{read_string, write_len_prefixed};

const TAG_LOGLINE: u8 = 1;
const TAG_PYFUNC: u8 = 2;
const TAG_CFUNC: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Codepoint {
    Logline { format: String },
    PyFunc { filename: String, name: String, lineno: u32 },
    CFunc { module: String, name: String },
}

impl Codepoint {
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Codepoint::Logline { format } => {
                out.push(TAG_LOGLINE);
                write_len_prefixed(out, format.as_bytes())?;
            }
            Codepoint::PyFunc { filename, name, lineno } => {
                out.push(TAG_PYFUNC);
                write_len_prefixed(out, filename.as_bytes())?;
                write_len_prefixed(out, name.as_bytes())?;
                out.extend_from_slice(&lineno.to_le_bytes());
            }
            Codepoint::CFunc { module, name } => {
                out.push(TAG_CFUNC);
                write_len_prefixed(out, module.as_bytes())?;
                write_len_prefixed(out, name.as_bytes())?;
            }
        }
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Codepoint> {
        let tag = *buf.first().ok_or(Error::Truncated)?;
        let rest = &buf[1..];
        match tag {
            TAG_LOGLINE => {
                let (format, _) = read_string(rest)?;
                Ok(Codepoint::Logline { format })
            }
            TAG_PYFUNC => {
                let (filename, used1) = read_string(rest)?;
                let (name, used2) = read_string(&rest[used1..])?;
                if rest.len() < used1 + used2 + 4 {
                    return Err(Error::Truncated);
                }
                let lineno_bytes = &rest[used1 + used2..used1 + used2 + 4];
                let lineno = u32::from_le_bytes(lineno_bytes.try_into().map_err(|_| Error::Truncated)?);
                Ok(Codepoint::PyFunc { filename, name, lineno })
            }
            TAG_CFUNC => {
                let (module, used1) = read_string(rest)?;
                let (name, _) = read_string(&rest[used1..])?;
                Ok(Codepoint::CFunc { module, name })
            }
            _ => Err(Error::Truncated),
        }
    }
}

/// The key used by `htable::HTable` to intern codepoints. Distinct from
/// `Codepoint` itself so that `PyFunc`/`CFunc` lookups by (filename, name,
/// lineno) or (module, name) are cheap equality/hash checks without cloning
/// a full `Codepoint` for every probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CodepointKey {
    Logline(String),
    PyFunc { filename: String, name: String, lineno: u32 },
    CFunc { module: String, name: String },
}

impl From<&Codepoint> for CodepointKey {
    fn from(cp: &Codepoint) -> Self {
        match cp {
            Codepoint::Logline { format } => CodepointKey::Logline(format.clone()),
            Codepoint::PyFunc { filename, name, lineno } => CodepointKey::PyFunc {
                filename: filename.clone(),
                name: name.clone(),
                lineno: *lineno,
            },
            Codepoint::CFunc { module, name } => CodepointKey::CFunc {
                module: module.clone(),
                name: name.clone(),
            },
        }
    }
}
