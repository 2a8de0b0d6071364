//! The maxvid video container: a premultiplied, run-length delta encoded
//! frame format, with converters from QuickTime Animation movies and
//! animated PNGs.

pub mod adler;
pub mod apng;
pub mod c4;
pub mod convert;
pub mod encode;
pub mod error;
pub mod format;
pub mod fourcc;
pub mod mov;
pub mod opcode;
pub mod pixels;
pub mod png;
pub mod premultiply;
pub mod qtrle;
pub mod reader;
mod sample_table;
pub mod version;
pub mod writer;
