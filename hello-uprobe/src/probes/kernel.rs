//! Kernel-backed probes, through aya.

use aya::{
    Ebpf, EbpfError,
    programs::{ProgramError, UProbe, uprobe::UProbeLinkId},
};
use aya_log::EbpfLogger;
use log::{debug, warn};

use crate::{
    error::{BoxError, SetupError},
    probes::{AttachPoint, LoadedProgram, ProbeBackend, ProbeKind},
};

#[derive(Debug, Default)]
pub struct KernelBackend;

/// A bytecode object loaded into the kernel, with one verified uprobe program.
pub struct KernelProgram {
    // Dropping `Ebpf` closes every program and map fd it owns.
    bpf: Ebpf,
    name: &'static str,
}

impl ProbeBackend for KernelBackend {
    type Program = KernelProgram;

    fn load(&mut self, bytecode: &[u8], kind: ProbeKind) -> Result<KernelProgram, SetupError> {
        let mut bpf = Ebpf::load(bytecode).map_err(|e| match e {
            EbpfError::ParseError(_) | EbpfError::BtfError(_) => SetupError::MalformedBytecode(Box::new(e)),
            e => SetupError::ObjectLoad(Box::new(e)),
        })?;
        if let Err(e) = EbpfLogger::init(&mut bpf) {
            warn!("Failed to initialize eBPF logger: {}", e);
        }

        let name = kind.program_name();
        let program: &mut UProbe = bpf
            .program_mut(name)
            .ok_or(SetupError::ProgramNotFound { program: name })?
            .try_into()
            .map_err(|e: ProgramError| SetupError::WrongProgramType {
                program: name,
                source: Box::new(e),
            })?;

        // ProgramError::LoadError carries the verifier log in its message.
        program.load().map_err(|e| SetupError::Verification {
            program: name,
            source: Box::new(e),
        })?;
        debug!("Program {} verified and loaded", name);

        Ok(KernelProgram { bpf, name })
    }
}

impl KernelProgram {
    fn uprobe(&mut self) -> Result<&mut UProbe, SetupError> {
        let name = self.name;
        self.bpf
            .program_mut(name)
            .ok_or(SetupError::ProgramNotFound { program: name })?
            .try_into()
            .map_err(|e: ProgramError| SetupError::WrongProgramType {
                program: name,
                source: Box::new(e),
            })
    }
}

impl LoadedProgram for KernelProgram {
    type Link = UProbeLinkId;

    fn attach(&mut self, point: &AttachPoint) -> Result<UProbeLinkId, SetupError> {
        let pid = point
            .pid
            .map(|pid| {
                let raw = libc::pid_t::try_from(pid).map_err(|_| SetupError::InvalidPid(pid))?;
                procfs::process::Process::new(raw).map_err(|e| SetupError::ProcessNotFound {
                    pid,
                    source: Box::new(e),
                })?;
                Ok::<_, SetupError>(raw)
            })
            .transpose()?;

        // The offset is already a file offset, so no symbol is passed.
        self.uprobe()?
            .attach(None, point.offset, &point.binary, pid)
            .map_err(|e| SetupError::Attach {
                point: point.to_string(),
                source: Box::new(e),
            })
    }

    fn detach(&mut self, link: UProbeLinkId) -> Result<(), BoxError> {
        self.uprobe()?.detach(link)?;
        Ok(())
    }
}
