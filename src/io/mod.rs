//! Input-side I/O: explicit compression codecs and the delimited row format.

pub mod compression;
pub mod delimited;
