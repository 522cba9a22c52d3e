pub mod error;
pub mod lifecycle;
pub mod probes;
pub mod settings;
pub mod symbols;

use log::info;

use crate::{
    error::SetupError,
    lifecycle::{Controller, wait_for_termination},
    probes::{ProbeRequest, kernel::KernelBackend},
};

/// Raise the memlock limit, install the probe described by `request` and
/// keep it attached until SIGINT or SIGTERM.
pub async fn run(request: ProbeRequest) -> Result<(), SetupError> {
    bump_memlock_rlimit()?;

    let mut controller = Controller::new(KernelBackend);
    let point = controller.install(&request)?;

    // If we got here, then the probe was installed.
    info!("Success! Probe attached to {}", point);
    info!("Waiting for Ctrl-C or SIGTERM...");

    controller.run_until(wait_for_termination()).await
}

/// eBPF programs and maps live in locked kernel memory, accounted against
/// `RLIMIT_MEMLOCK`. Older kernels cap it low enough to make loading fail.
pub fn bump_memlock_rlimit() -> Result<(), SetupError> {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        return Err(SetupError::Rlimit(std::io::Error::last_os_error()));
    }
    Ok(())
}
