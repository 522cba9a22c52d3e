//! Setup-phase errors.
//!
//! Every variant names the stage that failed (`rlimit`, `loader`, `resolver`
//! or `attach`) and keeps the underlying cause as its source, so the full
//! chain is printed when the controller exits.

use std::{io, path::PathBuf};

use crate::symbols::ResolveError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error("rlimit: failed to raise RLIMIT_MEMLOCK")]
    Rlimit(#[source] io::Error),

    #[error("loader: failed to read bytecode object {}", path.display())]
    ReadBytecode {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("loader: malformed bytecode object")]
    MalformedBytecode(#[source] BoxError),

    #[error("loader: kernel rejected bytecode object")]
    ObjectLoad(#[source] BoxError),

    #[error("loader: program `{program}` not found in bytecode object")]
    ProgramNotFound { program: &'static str },

    #[error("loader: program `{program}` is not a uprobe")]
    WrongProgramType {
        program: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("loader: kernel verifier rejected program `{program}`")]
    Verification {
        program: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("resolver: symbol resolution failed")]
    Resolve(#[from] ResolveError),

    #[error("resolver: offset {offset:#x} overflows symbol `{symbol}` at {symbol_offset:#x}")]
    OffsetOverflow {
        symbol: String,
        symbol_offset: u64,
        offset: u64,
    },

    #[error("attach: pid {0} is out of range")]
    InvalidPid(u32),

    #[error("attach: process {pid} does not exist")]
    ProcessNotFound {
        pid: u32,
        #[source]
        source: BoxError,
    },

    #[error("attach: kernel refused uprobe at {point}")]
    Attach {
        point: String,
        #[source]
        source: BoxError,
    },

    #[error("signal: failed to wait for a termination signal")]
    Signal(#[source] io::Error),

    #[error("a probe is already installed by this controller")]
    AlreadyInstalled,

    #[error("no probe is active")]
    NotActive,
}
