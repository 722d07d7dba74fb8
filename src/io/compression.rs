//! Pluggable compression support for input files.
//!
//! The compression of an input file is always chosen by the caller through
//! [`Compression`]; nothing here sniffs extensions or magic bytes. Each kind
//! resolves to a [`CompressionCodec`] implementation that wraps readers (for
//! loading) and writers (for producing fixtures and re-packing inputs).
//!
//! ## Built-in Codecs
//!
//! When enabled via feature flags, the following codecs are available:
//! - **Gzip** via the `flate2` crate (feature: `compression-gzip`)
//! - **Zstd** via the `zstd` crate (feature: `compression-zstd`)
//!
//! Selecting a kind whose feature is disabled is reported by
//! [`Compression::is_available`] and rejected during config validation.
//!
//! ## Random access
//! Compressed streams cannot be entered at an arbitrary byte offset, so only
//! [`Compression::None`] inputs may be split into byte-range chunks. Compressed
//! inputs go through the direct loader.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

/// Pluggable compression codec trait.
///
/// Implementations must be `Send + Sync`; the built-ins are zero-sized statics
/// shared by every worker.
pub trait CompressionCodec: Send + Sync {
    /// Human-readable codec name (e.g., "gzip", "zstd").
    fn name(&self) -> &str;

    /// Wrap a reader with decompression.
    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>>;

    /// Wrap a writer with compression.
    ///
    /// The returned writer finishes the compressed frame when dropped.
    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> std::io::Result<Box<dyn Write>>;
}

/// Whole-file compression of an input, selected explicitly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    #[value(alias = "uncompressed")]
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// The codec for this kind, or `None` for plain input or a codec compiled out.
    #[must_use]
    pub fn codec(self) -> Option<&'static dyn CompressionCodec> {
        match self {
            Self::None => None,
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => Some(&GzipCodec),
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => Some(&ZstdCodec),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Whether this build can actually read inputs of this kind.
    #[must_use]
    pub fn is_available(self) -> bool {
        self == Self::None || self.codec().is_some()
    }

    /// Wrap `reader` according to this kind. Plain input is buffered only.
    ///
    /// # Errors
    /// Returns [`IngestError::Config`] if the codec is compiled out, or an I/O
    /// error if the codec cannot initialise its stream.
    pub fn wrap_reader(self, reader: Box<dyn Read>) -> Result<Box<dyn Read>> {
        match (self, self.codec()) {
            (Self::None, _) => Ok(Box::new(BufReader::new(reader))),
            (_, Some(codec)) => Ok(codec.wrap_reader_dyn(Box::new(BufReader::new(reader)))?),
            (kind, None) => Err(IngestError::config(format!(
                "compression '{kind}' is not compiled into this build"
            ))),
        }
    }

    /// Wrap `writer` according to this kind. Plain output is buffered only.
    ///
    /// # Errors
    /// Same conditions as [`Compression::wrap_reader`].
    pub fn wrap_writer(self, writer: Box<dyn Write>) -> Result<Box<dyn Write>> {
        match (self, self.codec()) {
            (Self::None, _) => Ok(Box::new(BufWriter::new(writer))),
            (_, Some(codec)) => Ok(codec.wrap_writer_dyn(writer)?),
            (kind, None) => Err(IngestError::config(format!(
                "compression '{kind}' is not compiled into this build"
            ))),
        }
    }

    /// Open `path` and return a reader that yields decompressed bytes.
    ///
    /// # Errors
    /// Returns [`IngestError::Setup`] if the file cannot be opened.
    pub fn open(self, path: &Path) -> Result<Box<dyn Read>> {
        let file = File::open(path)
            .map_err(|e| IngestError::setup(format!("open {}: {e}", path.display())))?;
        self.wrap_reader(Box::new(file))
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.write_str(match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        })
    }
}

impl FromStr for Compression {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "zstd" | "zst" => Ok(Self::Zstd),
            other => Err(IngestError::config(format!("unknown compression '{other}'"))),
        }
    }
}

// ============================================================================
// Built-in Codec Implementations
// ============================================================================

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        use flate2::read::MultiGzDecoder;
        Ok(Box::new(MultiGzDecoder::new(reader)))
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> std::io::Result<Box<dyn Write>> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        Ok(Box::new(GzEncoder::new(writer, Compression::default())))
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read>)
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn Write>) -> std::io::Result<Box<dyn Write>> {
        zstd::stream::write::Encoder::new(writer, 3)
            .map(|e| Box::new(e.auto_finish()) as Box<dyn Write>)
    }
}
