//! `Argument`: a compact tagged value, designed so common values are one
//! byte total. See §3 of the spec for the tag table.

use crate::error::{Error, Result};
use crate::wire::{read_bytes, read_string, write_len_prefixed};

const TAG_NONE: u8 = 0x00;
const TAG_UNDUMPABLE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_FALSE: u8 = 0x03;
const TAG_INT: u8 = 0x04;
const TAG_BIGINT: u8 = 0x05;
const TAG_FLOAT: u8 = 0x06;
const TAG_STRING: u8 = 0x07;

/// First immediate-integer tag, encoding the value `-20`.
pub const IMMINT_BASE: u8 = 0x32;
/// Inclusive range of values encodable as a zero-payload immediate.
pub const IMMINT_LOW: i64 = -20;
pub const IMMINT_HIGH: i64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    None,
    Undumpable,
    Bool(bool),
    Int(i64),
    BigInt(String),
    Float(String),
    Str(Vec<u8>),
}

impl Argument {
    fn immediate_tag(v: i64) -> Option<u8> {
        if (IMMINT_LOW..=IMMINT_HIGH).contains(&v) {
            Some(IMMINT_BASE + (v - IMMINT_LOW) as u8)
        } else {
            None
        }
    }

    /// Appends the wire encoding of `self` to `out`. Fails if a string or
    /// decimal payload exceeds the u16 length prefix.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Argument::None => out.push(TAG_NONE),
            Argument::Undumpable => out.push(TAG_UNDUMPABLE),
            Argument::Bool(true) => out.push(TAG_TRUE),
            Argument::Bool(false) => out.push(TAG_FALSE),
            Argument::Int(v) => {
                if let Some(tag) = Self::immediate_tag(*v) {
                    out.push(tag);
                } else {
                    out.push(TAG_INT);
                    write_len_prefixed(out, v.to_string().as_bytes())?;
                }
            }
            Argument::BigInt(s) => {
                out.push(TAG_BIGINT);
                write_len_prefixed(out, s.as_bytes())?;
            }
            Argument::Float(s) => {
                out.push(TAG_FLOAT);
                write_len_prefixed(out, s.as_bytes())?;
            }
            Argument::Str(bytes) => {
                out.push(TAG_STRING);
                write_len_prefixed(out, bytes)?;
            }
        }
        Ok(())
    }

    /// Decodes one `Argument` from the front of `buf`, returning the value
    /// and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Argument, usize)> {
        let tag = *buf.first().ok_or(Error::Truncated)?;
        match tag {
            TAG_NONE => Ok((Argument::None, 1)),
            TAG_UNDUMPABLE => Ok((Argument::Undumpable, 1)),
            TAG_TRUE => Ok((Argument::Bool(true), 1)),
            TAG_FALSE => Ok((Argument::Bool(false), 1)),
            TAG_INT => {
                let (s, used) = read_string(&buf[1..])?;
                let v: i64 = s.parse().map_err(|_| Error::Truncated)?;
                Ok((Argument::Int(v), 1 + used))
            }
            TAG_BIGINT => {
                let (s, used) = read_string(&buf[1..])?;
                Ok((Argument::BigInt(s), 1 + used))
            }
            TAG_FLOAT => {
                let (s, used) = read_string(&buf[1..])?;
                Ok((Argument::Float(s), 1 + used))
            }
            TAG_STRING => {
                let (bytes, used) = read_bytes(&buf[1..])?;
                Ok((Argument::Str(bytes), 1 + used))
            }
            t if (IMMINT_BASE..IMMINT_BASE + 51).contains(&t) => {
                let v = IMMINT_LOW + (t - IMMINT_BASE) as i64;
                Ok((Argument::Int(v), 1))
            }
            _ => Err(Error::Truncated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(a: Argument) {
        let mut buf = Vec::new();
        a.encode(&mut buf).unwrap();
        let (decoded, used) = Argument::decode(&buf).unwrap();
        assert_eq!(decoded, a);
        assert_eq!(used, buf.len());
    }

    #[test]
    fn roundtrips_every_variant() {
        roundtrip(Argument::None);
        roundtrip(Argument::Undumpable);
        roundtrip(Argument::Bool(true));
        roundtrip(Argument::Bool(false));
        roundtrip(Argument::Int(12345));
        roundtrip(Argument::BigInt("123456789012345678901234567890".into()));
        roundtrip(Argument::Float("3.14159".into()));
        roundtrip(Argument::Str(b"hi".to_vec()));
    }

    #[test]
    fn all_51_immediates_are_one_byte() {
        for v in IMMINT_LOW..=IMMINT_HIGH {
            let mut buf = Vec::new();
            Argument::Int(v).encode(&mut buf).unwrap();
            assert_eq!(buf.len(), 1, "value {v} should encode to one byte");
            roundtrip(Argument::Int(v));
        }
    }

    #[test]
    fn boundary_just_outside_immediate_range_uses_payload() {
        let mut buf_low = Vec::new();
        Argument::Int(IMMINT_LOW - 1).encode(&mut buf_low).unwrap();
        assert!(buf_low.len() > 1);
        let mut buf_high = Vec::new();
        Argument::Int(IMMINT_HIGH + 1).encode(&mut buf_high).unwrap();
        assert!(buf_high.len() > 1);
    }

    #[test]
    fn max_u16_string_length_is_permitted() {
        let bytes = vec![b'x'; u16::MAX as usize];
        let mut out = Vec::new();
        out.push(0x07u8);
        write_len_prefixed(&mut out, &bytes).unwrap();
        let (decoded, _) = Argument::decode(&out).unwrap();
        assert_eq!(decoded, Argument::Str(bytes));
    }

    #[test]
    fn oversized_string_is_rejected() {
        let bytes = vec![b'x'; u16::MAX as usize + 1];
        let mut out = Vec::new();
        assert!(write_len_prefixed(&mut out, &bytes).is_err());
    }
}
