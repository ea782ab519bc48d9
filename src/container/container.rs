//! The supervisor side of a launch, and operations against containers
//! supervised by other processes.

use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::{self, Pid};

use crate::config::{Config, Process};
use crate::container::state::{ContainerStatus, State};
use crate::hooks;
use crate::process;
use crate::process::channel::SyncSocket;
use crate::process::launcher;
use crate::process::message::SyncMessage;
use crate::status::StatusStore;
use crate::user_ns;
use crate::utils;

/// A container being created and supervised by this process. Holding it
/// makes this process the single writer of the status record.
pub struct Container {
    state: State,
    config: Config,
    bundle: PathBuf,
    status_store: Box<dyn StatusStore>,
}

impl Container {
    /// Loads the bundle configuration and persists the initial record in
    /// `creating` state. Configuration errors surface before any record is
    /// written.
    pub fn create(status_store: Box<dyn StatusStore>, id: &str, bundle: &Path) -> Result<Self> {
        let bundle = fs::canonicalize(bundle)
            .with_context(|| format!("failed to resolve bundle path {:?}", bundle))?;
        let config = Config::load(&bundle)?;

        let state = State::new(id, &bundle, owner_name(), config.annotations.clone());
        status_store.write(&state)?;

        Ok(Self {
            state,
            config,
            bundle,
            status_store,
        })
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    /// Creates and starts the container, blocks until the payload exits,
    /// and returns its exit code.
    pub fn run(&mut self) -> Result<i32> {
        let (pid, mut socket) = match launcher::launch(&self.config, &self.bundle) {
            Ok(spawned) => spawned,
            Err(err) => {
                self.state.advance(ContainerStatus::Stopped)?;
                self.status_store.write(&self.state)?;
                return Err(err);
            }
        };

        self.state.pid = pid.as_raw();
        self.state.advance(ContainerStatus::Created)?;
        self.status_store.write(&self.state)?;

        if let Err(err) = self.supervise_handshake(pid, &mut socket) {
            // the child observes the closed socket and dies on its own
            drop(socket);
            hooks::run_hooks_logging_errors(&self.config.hooks.poststop);
            return Err(err);
        }

        self.state.advance(ContainerStatus::Running)?;
        self.status_store.write(&self.state)?;

        hooks::run_hooks(&self.config.hooks.poststart).context("poststart hooks failed")?;

        let exit_code = wait_container_process(pid)?;

        self.state.advance(ContainerStatus::Stopped)?;
        self.status_store.write(&self.state)?;

        hooks::run_hooks_logging_errors(&self.config.hooks.poststop);

        Ok(exit_code)
    }

    /// Supervisor half of the synchronization protocol.
    fn supervise_handshake(&self, pid: Pid, socket: &mut SyncSocket) -> Result<()> {
        socket.expect(SyncMessage::RequestConfigureUserNamespace)?;

        if self.config.has_user_namespace() {
            user_ns::configure_id_mappings(
                pid,
                &self.config.uid_mappings,
                &self.config.gid_mappings,
            )?;
        }
        self.configure_cgroup()?;

        socket.send(SyncMessage::UserNamespaceConfigured)?;

        if !self.config.hooks.prestart.is_empty() {
            hooks::run_hooks(&self.config.hooks.prestart).context("prestart hooks failed")?;
            socket.send(SyncMessage::PrestartHooksExecuted)?;
        }

        if !self.config.hooks.create_runtime.is_empty() {
            hooks::run_hooks(&self.config.hooks.create_runtime)
                .context("create_runtime hooks failed")?;
            socket.send(SyncMessage::CreateRuntimeHooksExecuted)?;
        }

        if !self.config.hooks.create_container.is_empty() {
            socket.expect(SyncMessage::CreateContainerHooksExecuted)?;
        }

        // the child closes its end just before exec'ing the payload
        socket.wait_closed()
    }

    fn configure_cgroup(&self) -> Result<()> {
        // TODO: cgroup configuration
        Ok(())
    }
}

/// Waits for the payload, reporting a signal death the way a shell would.
fn wait_container_process(pid: Pid) -> Result<i32> {
    match process::waitpid_retrying(pid)? {
        WaitStatus::Exited(_, code) => Ok(code),
        WaitStatus::Signaled(_, signal, _) => Ok(128 + signal as i32),
        status => bail!("unexpected wait status {:?}", status),
    }
}

fn owner_name() -> String {
    let uid = unistd::geteuid();
    match unistd::User::from_uid(uid) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

/// A container known only through its status record, supervised elsewhere.
pub struct ContainerRef {
    status_store: Box<dyn StatusStore>,
    id: String,
}

impl ContainerRef {
    pub fn new(status_store: Box<dyn StatusStore>, id: &str) -> Self {
        Self {
            status_store,
            id: id.to_string(),
        }
    }

    pub fn status(&self) -> Result<State> {
        self.status_store.read(&self.id)
    }

    /// Delivers a signal to the container init process. The status record
    /// is left untouched; its owning supervisor observes the death.
    pub fn kill(&self, signal: Signal) -> Result<()> {
        let state = self.status()?;
        if !state.effective_status().can_kill() {
            bail!(
                "container {} is {} and cannot be killed",
                self.id,
                state.effective_status()
            );
        }

        signal::kill(Pid::from_raw(state.pid), signal)
            .with_context(|| format!("failed to send {} to pid {}", signal, state.pid))
    }

    /// Enters the container's namespaces with nsenter and executes the
    /// process there. Replaces the current process image on success.
    pub fn exec(&self, process: &Process) -> Result<Infallible> {
        let state = self.status()?;
        if !state.effective_status().can_exec() {
            bail!(
                "container {} is {} and cannot be entered",
                self.id,
                state.effective_status()
            );
        }

        let mut argv = vec![
            "nsenter".to_string(),
            "--target".to_string(),
            state.pid.to_string(),
            "--user".to_string(),
            "--mount".to_string(),
            "--pid".to_string(),
            format!("--wdns={}", process.cwd.display()),
            "--preserve-credentials".to_string(),
            "--".to_string(),
        ];
        argv.extend(process.args.iter().cloned());

        let argv = utils::to_cstring_vec(&argv)?;
        unistd::execvp(&argv[0], &argv).context("failed to execvp nsenter")?;
        unreachable!("execvp returned without an error");
    }
}
