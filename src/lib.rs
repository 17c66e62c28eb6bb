//! Always-on execution tracer: hot-path event capture into a crash-safe,
//! rotating binary trace store.
//!
//! The hot-path producer lives in [`tracer`]; storage primitives are split
//! across [`fmap`] (sliding mmap writer), [`htable`] (codepoint interner),
//! [`rotrec`] (bounded record file) and [`rotdir`] (ring directory owning
//! many prefixes). [`reader`] is the post-hoc consumer.

pub mod argument;
pub mod codepoint;
pub mod config;
pub mod error;
pub mod fmap;
pub mod htable;
pub mod metrics;
pub mod reader;
pub mod record;
pub mod rotdir;
pub mod rotrec;
pub mod tracer;
mod wire;

pub use argument::Argument;
pub use codepoint::{Codepoint, CodepointKey};
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use reader::Reader;
pub use record::{RecordBody, TraceRecord};
pub use tracer::{begin_session, IgnoreMask, Session, Tracer};
