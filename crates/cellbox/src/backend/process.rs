//! Process-level isolation backend.
//!
//! Spawns one interpreter runner process per session, resolved from the
//! template catalog. The child's stdin/stdout pair is the execution channel;
//! its stderr is drained into the host log. Teardown applies an escalating
//! kill policy (SIGTERM, then SIGKILL), each step bounded by a fixed timeout.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::{BackendHandle, IsolationBackend, SandboxInstance};
use crate::channel::ChannelIo;
use crate::config::{SessionConfig, TemplateCatalog};
use crate::error::ProvisionError;

/// Grace period after a graceful termination signal before force-killing.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on waiting for the forced kill to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Backend that runs interpreters as local child processes.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    catalog: TemplateCatalog,
}

impl ProcessBackend {
    /// Create a backend over the given template catalog.
    pub fn new(catalog: TemplateCatalog) -> Self {
        Self { catalog }
    }

    /// The catalog this backend resolves templates from.
    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }
}

#[async_trait]
impl IsolationBackend for ProcessBackend {
    async fn start(
        &self,
        config: &SessionConfig,
    ) -> Result<Box<dyn SandboxInstance>, ProvisionError> {
        let template = self
            .catalog
            .resolve(&config.template)
            .ok_or_else(|| ProvisionError::ImageNotFound(config.template.clone()))?;

        info!(
            "spawning interpreter for template '{}': {} {:?}",
            config.template, template.command, template.args
        );

        let mut cmd = Command::new(&template.command);
        cmd.args(&template.args)
            .envs(&template.env)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &template.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ProvisionError::Spawn {
                    command: template.command.clone(),
                    message: e.to_string(),
                }
            }
            std::io::ErrorKind::OutOfMemory | std::io::ErrorKind::WouldBlock => {
                ProvisionError::ResourceExhausted(e.to_string())
            }
            _ => ProvisionError::Io(e),
        })?;

        let pid = child.id().ok_or_else(|| ProvisionError::Spawn {
            command: template.command.clone(),
            message: "process exited before a pid was assigned".to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ProvisionError::Io(std::io::Error::other("child stdin not captured"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ProvisionError::Io(std::io::Error::other("child stdout not captured"))
        })?;

        // Interpreter diagnostics go to the host log, not the channel.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("interpreter[{pid}] stderr: {line}");
                }
            });
        }

        info!("interpreter spawned with pid {pid}");

        Ok(Box::new(ProcessInstance {
            handle: BackendHandle::Process { pid },
            child,
            io: Some(ChannelIo {
                reader: Box::new(stdout),
                writer: Box::new(stdin),
            }),
            stopped: false,
        }))
    }
}

/// One running interpreter child process.
struct ProcessInstance {
    handle: BackendHandle,
    child: Child,
    io: Option<ChannelIo>,
    stopped: bool,
}

impl ProcessInstance {
    fn pid(&self) -> u32 {
        match self.handle {
            BackendHandle::Process { pid } => pid,
            _ => unreachable!("process instance always carries a process handle"),
        }
    }

    #[cfg(unix)]
    fn signal(&self, sig: libc::c_int) -> std::io::Result<()> {
        let rc = unsafe { libc::kill(self.pid() as libc::pid_t, sig) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[async_trait]
impl SandboxInstance for ProcessInstance {
    fn handle(&self) -> &BackendHandle {
        &self.handle
    }

    fn take_io(&mut self) -> Option<ChannelIo> {
        self.io.take()
    }

    fn healthcheck(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!("interpreter {} exited: {status}", self.pid());
                false
            }
            Err(e) => {
                warn!("healthcheck failed for pid {}: {e}", self.pid());
                false
            }
        }
    }

    async fn interrupt(&mut self) -> std::io::Result<()> {
        if self.stopped {
            return Ok(());
        }
        debug!("interrupting interpreter {}", self.pid());
        #[cfg(unix)]
        {
            self.signal(libc::SIGINT)
        }
        #[cfg(not(unix))]
        {
            Ok(())
        }
    }

    async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let pid = self.pid();

        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("interpreter {pid} already exited: {status}");
            return;
        }

        // Graceful first.
        #[cfg(unix)]
        if let Err(e) = self.signal(libc::SIGTERM) {
            debug!("SIGTERM to {pid} failed: {e}");
        }
        if tokio::time::timeout(TERM_GRACE, self.child.wait())
            .await
            .is_ok()
        {
            debug!("interpreter {pid} exited after SIGTERM");
            return;
        }

        // Forced. kill() sends SIGKILL and reaps; bound the wait so teardown
        // can never hang on an unresponsive environment.
        warn!("interpreter {pid} ignored SIGTERM, force-killing");
        match tokio::time::timeout(KILL_WAIT, self.child.kill()).await {
            Ok(Ok(())) => debug!("interpreter {pid} force-killed"),
            Ok(Err(e)) => warn!("force-kill of {pid} failed: {e}"),
            Err(_) => warn!("timed out waiting for {pid} to die"),
        }
    }
}

impl Drop for ProcessInstance {
    fn drop(&mut self) {
        // kill_on_drop(true) on the Command guarantees the child does not
        // outlive the instance even when stop() was never awaited.
        if !self.stopped {
            debug!("dropping live interpreter {}, kernel will reap it", self.pid());
        }
    }
}
