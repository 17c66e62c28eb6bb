//! `TraceRecord`: a single hot-path event, keyed by type, with a shared
//! header (`depth`, `timestamp_ns`, `cpindex`) and a type-specific body.

use crate::argument::Argument;
use crate::error::{Error, Result};
use crate::wire::{read_string, write_len_prefixed};

const TYPE_PYFUNC_CALL: u8 = 1;
const TYPE_PYFUNC_RET: u8 = 2;
const TYPE_PYFUNC_RAISE: u8 = 3;
const TYPE_CFUNC_CALL: u8 = 4;
const TYPE_CFUNC_RET: u8 = 5;
const TYPE_CFUNC_RAISE: u8 = 6;
const TYPE_LOG_RECORD: u8 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    PyFuncCall { args: Vec<Argument> },
    PyFuncRet { retval: Argument },
    /// Exception type is omitted for cost, per §9's resolved open question:
    /// the writer and reader agree on a zero-byte body.
    PyFuncRaise,
    CFuncCall,
    CFuncRet,
    CFuncRaise,
    LogRecord { args: Vec<String> },
}

impl RecordBody {
    fn type_tag(&self) -> u8 {
        match self {
            RecordBody::PyFuncCall { .. } => TYPE_PYFUNC_CALL,
            RecordBody::PyFuncRet { .. } => TYPE_PYFUNC_RET,
            RecordBody::PyFuncRaise => TYPE_PYFUNC_RAISE,
            RecordBody::CFuncCall => TYPE_CFUNC_CALL,
            RecordBody::CFuncRet => TYPE_CFUNC_RET,
            RecordBody::CFuncRaise => TYPE_CFUNC_RAISE,
            RecordBody::LogRecord { .. } => TYPE_LOG_RECORD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    pub depth: u16,
    pub timestamp_ns: u64,
    pub cpindex: u16,
    pub body: RecordBody,
}

impl TraceRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(32);
        out.push(self.body.type_tag());
        out.extend_from_slice(&self.depth.to_le_bytes());
        out.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        out.extend_from_slice(&self.cpindex.to_le_bytes());
        match &self.body {
            RecordBody::PyFuncCall { args } => {
                if args.len() > u16::MAX as usize {
                    return Err(Error::Config("too many call arguments".into()));
                }
                out.extend_from_slice(&(args.len() as u16).to_le_bytes());
                for a in args {
                    a.encode(&mut out)?;
                }
            }
            RecordBody::PyFuncRet { retval } => retval.encode(&mut out)?,
            RecordBody::PyFuncRaise | RecordBody::CFuncCall | RecordBody::CFuncRet | RecordBody::CFuncRaise => {}
            RecordBody::LogRecord { args } => {
                if args.len() > u16::MAX as usize {
                    return Err(Error::Config("too many log arguments".into()));
                }
                out.extend_from_slice(&(args.len() as u16).to_le_bytes());
                for a in args {
                    write_len_prefixed(&mut out, a.as_bytes())?;
                }
            }
        }
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<TraceRecord> {
        if buf.len() < 13 {
            return Err(Error::Truncated);
        }
        let type_tag = buf[0];
        let depth = u16::from_le_bytes([buf[1], buf[2]]);
        let timestamp_ns = u64::from_le_bytes(buf[3..11].try_into().unwrap());
        let cpindex = u16::from_le_bytes([buf[11], buf[12]]);
        let rest = &buf[13..];
        let body = match type_tag {
            TYPE_PYFUNC_CALL => {
                let (args, _) = decode_arg_list(rest)?;
                RecordBody::PyFuncCall { args }
            }
            TYPE_PYFUNC_RET => {
                let (retval, _) = Argument::decode(rest)?;
                RecordBody::PyFuncRet { retval }
            }
            TYPE_PYFUNC_RAISE => RecordBody::PyFuncRaise,
            TYPE_CFUNC_CALL => RecordBody::CFuncCall,
            TYPE_CFUNC_RET => RecordBody::CFuncRet,
            TYPE_CFUNC_RAISE => RecordBody::CFuncRaise,
            TYPE_LOG_RECORD => {
                let (args, _) = decode_str_list(rest)?;
                RecordBody::LogRecord { args }
            }
            _ => return Err(Error::Truncated),
        };
        Ok(TraceRecord { depth, timestamp_ns, cpindex, body })
    }
}

fn decode_arg_list(buf: &[u8]) -> Result<(Vec<Argument>, usize)> {
    if buf.len() < 2 {
        return Err(Error::Truncated);
    }
    let count = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let mut offset = 2;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let (arg, used) = Argument::decode(&buf[offset..])?;
        offset += used;
        args.push(arg);
    }
    Ok((args, offset))
}

fn decode_str_list(buf: &[u8]) -> Result<(Vec<String>, usize)> {
    if buf.len() < 2 {
        return Err(Error::Truncated);
    }
    let count = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let mut offset = 2;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let (s, used) = read_string(&buf[offset..])?;
        offset += used;
        out.push(s);
    }
    Ok((out, offset))
}
