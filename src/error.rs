// error.rs — pipeline errors and warnings.
//
// Every fatal condition during construction or execution is a
// `PipelineError`. Each variant carries enough context (stage index and
// kernel name, argument name, file path, or device operation) to point at
// the offending manifest entry without re-running under a debugger.
//
// The variants are declared in a fixed order; `ErrorKind` mirrors that order
// and its 1-based ordinal is the process exit code used by the binary.
//
// Non-fatal findings (suspicious reads, type-hint disagreements, clamped
// channel counts) are `Warning`s. They are logged through `tracing::warn!`
// and collected, never returned as `Err`.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::format::{ChannelFormat, TypeDescriptor};
use crate::size::InvalidSize;

/// Fatal pipeline error.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("device out of memory during {operation}: {detail}")]
    OutOfMemory { operation: String, detail: String },

    #[error("file not found: {}", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {origin}: {message}")]
    DocumentParseFailed { origin: String, message: String },

    #[error("stages must be a non-empty array of tables: {detail}")]
    InvalidStagesArray { detail: String },

    #[error("args must be a non-empty table: {detail}")]
    InvalidArgsTable { detail: String },

    #[error("hardcoded args array must be a string array with {expected} entries")]
    InvalidHardcodedArgsArray { expected: usize },

    #[error("argument {index} has invalid name {name:?} (empty or already taken)")]
    InvalidArgName { index: usize, name: String },

    #[error("stage {stage} has no kernel name")]
    MissingStageName { stage: usize },

    #[error("stage {stage} args must be a non-empty array of strings: {detail}")]
    InvalidStageArgsArray { stage: usize, detail: String },

    #[error("stage {stage} uses argument {name:?} which has no entry in the args table")]
    MissingArgEntry { stage: usize, name: String },

    #[error("argument {arg:?} has invalid channel_type {value:?}")]
    InvalidChannelType { arg: String, value: String },

    #[error("argument {arg:?} has invalid type {value:?}")]
    InvalidArgType { arg: String, value: String },

    #[error("{owner} refers to {reference:?} which has not been staged yet")]
    RefArgNotYetStaged { owner: String, reference: String },

    #[error("{owner} has an invalid range: {detail}")]
    InvalidRangeMode { owner: String, detail: String },

    #[error("{owner} has an invalid size: {source}")]
    InvalidSize {
        owner: String,
        #[source]
        source: InvalidSize,
    },

    #[error("kernel build failed in {unit}:\n{log}")]
    KernelBuildFailed { unit: String, log: String },

    #[error("stage {stage} ({kernel}) signature mismatch: {detail}")]
    KernelSignatureMismatch { stage: usize, kernel: String, detail: String },

    #[error("stage {stage} ({kernel}) could not bind argument {arg:?} to slot {slot}: {source}")]
    BindFailed {
        stage: usize,
        kernel: String,
        slot: usize,
        arg: String,
        #[source]
        source: DeviceError,
    },

    #[error("image {}: {message}", path.display())]
    Raster { path: PathBuf, message: String },

    #[error(transparent)]
    Device(DeviceError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Discriminant of [`PipelineError`], in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    OutOfMemory = 1,
    FileNotFound,
    DocumentParseFailed,
    InvalidStagesArray,
    InvalidArgsTable,
    InvalidHardcodedArgsArray,
    InvalidArgName,
    MissingStageName,
    InvalidStageArgsArray,
    MissingArgEntry,
    InvalidChannelType,
    InvalidArgType,
    RefArgNotYetStaged,
    InvalidRangeMode,
    InvalidSize,
    KernelBuildFailed,
    KernelSignatureMismatch,
    BindFailed,
    Raster,
    Device,
}

impl ErrorKind {
    /// 1-based ordinal, used as the process exit code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            PipelineError::FileNotFound { .. } => ErrorKind::FileNotFound,
            PipelineError::DocumentParseFailed { .. } => ErrorKind::DocumentParseFailed,
            PipelineError::InvalidStagesArray { .. } => ErrorKind::InvalidStagesArray,
            PipelineError::InvalidArgsTable { .. } => ErrorKind::InvalidArgsTable,
            PipelineError::InvalidHardcodedArgsArray { .. } => ErrorKind::InvalidHardcodedArgsArray,
            PipelineError::InvalidArgName { .. } => ErrorKind::InvalidArgName,
            PipelineError::MissingStageName { .. } => ErrorKind::MissingStageName,
            PipelineError::InvalidStageArgsArray { .. } => ErrorKind::InvalidStageArgsArray,
            PipelineError::MissingArgEntry { .. } => ErrorKind::MissingArgEntry,
            PipelineError::InvalidChannelType { .. } => ErrorKind::InvalidChannelType,
            PipelineError::InvalidArgType { .. } => ErrorKind::InvalidArgType,
            PipelineError::RefArgNotYetStaged { .. } => ErrorKind::RefArgNotYetStaged,
            PipelineError::InvalidRangeMode { .. } => ErrorKind::InvalidRangeMode,
            PipelineError::InvalidSize { .. } => ErrorKind::InvalidSize,
            PipelineError::KernelBuildFailed { .. } => ErrorKind::KernelBuildFailed,
            PipelineError::KernelSignatureMismatch { .. } => ErrorKind::KernelSignatureMismatch,
            PipelineError::BindFailed { .. } => ErrorKind::BindFailed,
            PipelineError::Raster { .. } => ErrorKind::Raster,
            PipelineError::Device(_) => ErrorKind::Device,
        }
    }

    /// Map an I/O failure on `path` to `FileNotFound`.
    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::FileNotFound { path: path.into(), source }
    }
}

/// Device errors are reported as-is, except that exhausted device memory gets
/// its own top-level kind.
impl From<DeviceError> for PipelineError {
    fn from(e: DeviceError) -> Self {
        match e.kind {
            DeviceErrorKind::OutOfMemory => PipelineError::OutOfMemory {
                operation: e.operation,
                detail: e.detail,
            },
            _ => PipelineError::Device(e),
        }
    }
}

// ============================================================
// Device errors
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorKind {
    OutOfMemory,
    /// The device rejected the request (bad descriptor, limits, bindings).
    Validation,
    /// The request has no realisation on this device.
    Unsupported,
    Other,
}

/// Failure reported by a compute backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed ({kind:?}): {detail}")]
pub struct DeviceError {
    pub operation: String,
    pub kind: DeviceErrorKind,
    pub detail: String,
}

impl DeviceError {
    pub fn new(operation: impl Into<String>, kind: DeviceErrorKind, detail: impl Into<String>) -> Self {
        DeviceError { operation: operation.into(), kind, detail: detail.into() }
    }

    pub fn unsupported(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(operation, DeviceErrorKind::Unsupported, detail)
    }

    pub fn validation(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(operation, DeviceErrorKind::Validation, detail)
    }
}

// ============================================================
// Warnings
// ============================================================

/// Where a [`TypeDescriptor`] compared against an argument came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HintSource {
    /// Reflected from the parameter's declared device type.
    Declared,
    /// Parsed from the parameter identifier's suffix.
    Identifier,
}

/// A stage parameter, for warning context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamSite {
    pub stage: usize,
    pub kernel: String,
    pub param: String,
    pub arg: String,
}

impl fmt::Display for ParamSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage {} ({}) parameter {:?} bound to {:?}",
            self.stage, self.kernel, self.param, self.arg
        )
    }
}

/// Non-fatal construction finding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Warning {
    /// A read-only parameter reads an argument nothing has written yet.
    ReadBeforeWrite { site: ParamSite },
    /// The parameter expects a different element type than the argument holds.
    TypeHintMismatch {
        site: ParamSite,
        source: HintSource,
        expected: TypeDescriptor,
        found: ChannelFormat,
    },
    /// The parameter expects more channels than the argument provides.
    ChannelShortfall { site: ParamSite, expected: u8, found: u8 },
    /// A manifest channel count was outside the type's legal range.
    ChannelCountClamped { arg: String, requested: i64, used: u8 },
    /// A parameter hinted as a fresh output is bound to an argument an
    /// earlier stage already wrote.
    OutputReused { site: ParamSite },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::ReadBeforeWrite { site } => {
                write!(f, "{site}: read before any stage wrote it")
            }
            Warning::TypeHintMismatch { site, source, expected, found } => {
                let from = match source {
                    HintSource::Declared => "declared type",
                    HintSource::Identifier => "type hint",
                };
                write!(f, "{site}: {from} expects {expected}, argument holds {found}")
            }
            Warning::ChannelShortfall { site, expected, found } => {
                write!(f, "{site}: expects {expected} channels, argument has {found}")
            }
            Warning::ChannelCountClamped { arg, requested, used } => {
                write!(f, "argument {arg:?}: channel_count {requested} clamped to {used}")
            }
            Warning::OutputReused { site } => {
                write!(f, "{site}: fresh output already written by an earlier stage")
            }
        }
    }
}
