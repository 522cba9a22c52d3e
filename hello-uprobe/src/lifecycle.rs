//! Probe lifecycle: `Installing -> Active -> Detaching -> Terminated`.
//!
//! A probe is only torn down on paths that run destructors. If the
//! controller is killed with SIGKILL, reclaiming the link and the program is
//! left to the kernel.

use std::{future::Future, io};

use log::{info, warn};
use tokio::signal::unix::{SignalKind, signal};

use crate::{
    error::SetupError,
    probes::{ActiveProbe, AttachPoint, ProbeBackend, ProbeRequest, install},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Installing,
    Active,
    Detaching,
    Terminated,
}

/// Owns at most one probe, from installation to teardown.
pub struct Controller<B: ProbeBackend> {
    backend: B,
    state: Lifecycle,
    probe: Option<ActiveProbe<B::Program>>,
}

impl<B: ProbeBackend> Controller<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: Lifecycle::Installing,
            probe: None,
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn attach_point(&self) -> Option<&AttachPoint> {
        self.probe.as_ref().map(ActiveProbe::point)
    }

    /// Install the probe described by `request` and move to `Active`.
    /// On failure the controller stays in `Installing` with nothing loaded.
    pub fn install(&mut self, request: &ProbeRequest) -> Result<&AttachPoint, SetupError> {
        if self.state != Lifecycle::Installing {
            return Err(SetupError::AlreadyInstalled);
        }

        let probe = self.probe.insert(install(&mut self.backend, request)?);
        self.state = Lifecycle::Active;
        Ok(probe.point())
    }

    /// Block until `shutdown` resolves, then tear the probe down.
    ///
    /// The probe is torn down even if `shutdown` fails; the failure is still
    /// returned.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), SetupError>
    where
        F: Future<Output = io::Result<&'static str>>,
    {
        if self.state != Lifecycle::Active {
            return Err(SetupError::NotActive);
        }

        let result = match shutdown.await {
            Ok(signal) => {
                info!("Received {}, exiting...", signal);
                Ok(())
            }
            Err(e) => Err(SetupError::Signal(e)),
        };

        self.teardown();
        result
    }

    /// Detach the probe. Errors are logged, not retried.
    pub fn teardown(&mut self) {
        self.state = Lifecycle::Detaching;
        if let Some(probe) = self.probe.take() {
            let point = probe.point().to_string();
            match probe.detach() {
                Ok(()) => info!("Detached probe at {}", point),
                Err(e) => warn!("Failed to detach probe at {}: {}", point, e),
            }
        }
        self.state = Lifecycle::Terminated;
    }
}

/// Resolves on SIGINT or SIGTERM, with the name of the signal.
pub async fn wait_for_termination() -> io::Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}
