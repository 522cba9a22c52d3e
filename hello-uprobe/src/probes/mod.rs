use std::{fmt, fs, path::PathBuf};

use hello_uprobe_common::{UPROBE_PROGRAM, URETPROBE_PROGRAM};
use log::{info, warn};

use crate::{
    error::{BoxError, SetupError},
    settings::Settings,
    symbols::Executable,
};

pub mod kernel;

/// Which program of the bytecode object gets attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeKind {
    /// Fires on function entry.
    #[default]
    Entry,
    /// Fires on function return.
    Return,
}

impl ProbeKind {
    pub fn program_name(self) -> &'static str {
        match self {
            ProbeKind::Entry => UPROBE_PROGRAM,
            ProbeKind::Return => URETPROBE_PROGRAM,
        }
    }
}

/// Everything needed to install one probe.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    /// Precompiled eBPF object, read when the probe is installed.
    pub bytecode_path: PathBuf,
    pub kind: ProbeKind,
    /// Restricts the probe to one process. `None` attaches globally.
    pub pid: Option<u32>,
    pub symbol: String,
    /// Added to the symbol's offset.
    pub offset: u64,
    pub target_binary: PathBuf,
}

impl ProbeRequest {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            bytecode_path: settings.bytecode_path.clone(),
            kind: if settings.retprobe {
                ProbeKind::Return
            } else {
                ProbeKind::Entry
            },
            pid: (settings.pid != 0).then_some(settings.pid),
            symbol: settings.symbol.clone(),
            offset: settings.offset,
            target_binary: settings.target_binary.clone(),
        }
    }

    pub fn read_bytecode(&self) -> Result<Vec<u8>, SetupError> {
        fs::read(&self.bytecode_path).map_err(|source| SetupError::ReadBytecode {
            path: self.bytecode_path.clone(),
            source,
        })
    }
}

/// A fully resolved attachment location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachPoint {
    /// Canonical path of the target binary.
    pub binary: PathBuf,
    pub symbol: String,
    /// File offset of the symbol's entry point.
    pub symbol_offset: u64,
    pub manual_offset: u64,
    /// `symbol_offset + manual_offset`, the offset handed to the kernel.
    pub offset: u64,
    pub pid: Option<u32>,
}

impl AttachPoint {
    pub fn resolve(
        executable: &Executable,
        symbol: &str,
        manual_offset: u64,
        pid: Option<u32>,
    ) -> Result<Self, SetupError> {
        let resolved = executable.resolve(symbol)?;
        let offset = resolved
            .file_offset
            .checked_add(manual_offset)
            .ok_or_else(|| SetupError::OffsetOverflow {
                symbol: symbol.to_string(),
                symbol_offset: resolved.file_offset,
                offset: manual_offset,
            })?;

        Ok(Self {
            binary: executable.path().to_path_buf(),
            symbol: symbol.to_string(),
            symbol_offset: resolved.file_offset,
            manual_offset,
            offset,
            pid,
        })
    }
}

impl fmt::Display for AttachPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}+{:#x} (file offset {:#x}, ",
            self.binary.display(),
            self.symbol,
            self.manual_offset,
            self.offset
        )?;
        match self.pid {
            Some(pid) => write!(f, "pid {})", pid),
            None => write!(f, "all processes)"),
        }
    }
}

/// Loads bytecode objects into the kernel.
pub trait ProbeBackend {
    type Program: LoadedProgram;

    /// Parse `bytecode`, load it and verify the program selected by `kind`.
    fn load(&mut self, bytecode: &[u8], kind: ProbeKind) -> Result<Self::Program, SetupError>;
}

/// A verified program resident in the kernel. Dropping it unloads it.
pub trait LoadedProgram {
    type Link;

    fn attach(&mut self, point: &AttachPoint) -> Result<Self::Link, SetupError>;

    fn detach(&mut self, link: Self::Link) -> Result<(), BoxError>;
}

/// A live uprobe, owned by the controller.
pub struct ActiveProbe<P: LoadedProgram> {
    point: AttachPoint,
    link: Option<P::Link>,
    // Declared last so the program outlives the link when dropped.
    program: P,
}

impl<P: LoadedProgram> ActiveProbe<P> {
    pub fn point(&self) -> &AttachPoint {
        &self.point
    }

    /// Close the kernel link and unload the program.
    pub fn detach(mut self) -> Result<(), BoxError> {
        match self.link.take() {
            Some(link) => self.program.detach(link),
            None => Ok(()),
        }
    }
}

impl<P: LoadedProgram> Drop for ActiveProbe<P> {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            warn!("Probe at {} dropped while attached; detaching", self.point);
            if let Err(e) = self.program.detach(link) {
                warn!("Failed to detach probe at {}: {}", self.point, e);
            }
        }
    }
}

/// Read and load the bytecode, resolve the attach point and attach.
///
/// Nothing created here survives a failure: the loaded program is dropped
/// (and unloaded) before the error is returned.
pub fn install<B: ProbeBackend>(
    backend: &mut B,
    request: &ProbeRequest,
) -> Result<ActiveProbe<B::Program>, SetupError> {
    let bytecode = request.read_bytecode()?;
    info!("Loading program {}", request.kind.program_name());
    let mut program = backend.load(&bytecode, request.kind)?;

    let executable = Executable::open(&request.target_binary)?;
    let point = AttachPoint::resolve(&executable, &request.symbol, request.offset, request.pid)?;

    info!("Attaching {} to {}", request.kind.program_name(), point);
    let link = program.attach(&point)?;

    Ok(ActiveProbe {
        point,
        link: Some(link),
        program,
    })
}

/// Resolve the attach point for `request` without touching the kernel.
pub fn resolve_attach_point(request: &ProbeRequest) -> Result<AttachPoint, SetupError> {
    let executable = Executable::open(&request.target_binary)?;
    AttachPoint::resolve(&executable, &request.symbol, request.offset, request.pid)
}
