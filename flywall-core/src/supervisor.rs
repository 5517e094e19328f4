//! Supervisor (§4.G): owns the reconciler and the canonical config lifecycle
//! across boot, `SIGHUP` reload, and zero-downtime upgrade, driven by one
//! `tokio::select!` loop — the same shape as the teacher daemon's
//! `signal_channel`/`loop_daemon`, generalized from VPN worker lifecycle to
//! reconcile lifecycle.

use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::control::{Command, ControlRequest, Response};
use crate::error::Error;
use crate::logging::LogReloadHandle;
use crate::model::CanonicalConfig;
use crate::reconcile::Reconciler;
use crate::state::StateDir;

const UPGRADE_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// States driving the `tokio::select!` loop (§3 Lifecycle). `Steady` is the
/// only rest state with live kernel state matching `current`; every other
/// variant names work in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Boot,
    ApplyingInitial,
    Steady,
    Reloading,
    Upgrading,
    Failed,
}

/// Lock-free read-copy of supervisor state (§5), swapped atomically on every
/// state transition so `status` never blocks on or races the reconcile task.
#[derive(Clone)]
pub struct Published {
    pub state: SupervisorState,
    pub current: Option<CanonicalConfig>,
}

enum SignalMessage {
    Reload,
    Shutdown,
}

async fn signal_channel() -> Result<mpsc::Receiver<SignalMessage>, Error> {
    let (sender, receiver) = mpsc::channel(32);
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(_) = sigint.recv() => {
                    tracing::debug!("received SIGINT");
                    if sender.send(SignalMessage::Shutdown).await.is_err() {
                        break;
                    }
                }
                Some(_) = sigterm.recv() => {
                    tracing::debug!("received SIGTERM");
                    if sender.send(SignalMessage::Shutdown).await.is_err() {
                        break;
                    }
                }
                Some(_) = sighup.recv() => {
                    tracing::debug!("received SIGHUP");
                    if sender.send(SignalMessage::Reload).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    Ok(receiver)
}

/// Owns the one `Reconciler` and drives it through boot, reload, and
/// upgrade. There is exactly one of these per process, and exactly one task
/// ever calls `reload`/`upgrade` — the single-writer model §5 relies on.
pub struct Supervisor {
    reconciler: Reconciler,
    state_dir: StateDir,
    config_path: Utf8PathBuf,
    published: Arc<ArcSwap<Published>>,
    log_reload: Option<LogReloadHandle>,
    log_path: Option<Utf8PathBuf>,
}

impl Supervisor {
    pub fn new(
        reconciler: Reconciler,
        state_dir: StateDir,
        config_path: Utf8PathBuf,
        log_reload: Option<LogReloadHandle>,
        log_path: Option<Utf8PathBuf>,
    ) -> Self {
        let published = Arc::new(ArcSwap::new(Arc::new(Published {
            state: SupervisorState::Boot,
            current: None,
        })));
        Self {
            reconciler,
            state_dir,
            config_path,
            published,
            log_reload,
            log_path,
        }
    }

    /// A cheap clone of the read-copy publication handle, for wiring into
    /// a `status` handler that lives outside this struct.
    pub fn published(&self) -> Arc<ArcSwap<Published>> {
        self.published.clone()
    }

    fn publish(&self, state: SupervisorState) {
        let current = self.reconciler.current().cloned();
        self.published.store(Arc::new(Published { state, current }));
    }

    /// §4.G boot: load, validate, and apply the initial configuration. A
    /// failure here is fatal — there is no prior `current` to fall back to.
    pub async fn boot(&mut self) -> Result<(), Error> {
        self.publish(SupervisorState::ApplyingInitial);
        let config_path = self.config_path.clone();
        let result = match crate::load_and_validate(&config_path).await {
            Ok(config) => self.reconciler.apply(config).await.map(|_| ()),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                self.publish(SupervisorState::Steady);
                Ok(())
            }
            Err(err) => {
                self.publish(SupervisorState::Failed);
                Err(err)
            }
        }
    }

    /// Seeds the reconciler's `current` from an upgrade handoff snapshot
    /// (§4.G) instead of applying from scratch, so a freshly exec'd process
    /// starts from "this is already running" rather than re-diffing against
    /// empty state.
    pub fn seed_from_handoff(&mut self, snapshot: CanonicalConfig) {
        self.reconciler.seed_current(snapshot);
        self.publish(SupervisorState::Steady);
    }

    /// §4.G reload: re-runs the full load/validate pipeline and hands the
    /// result to the reconciler. A pipeline or kernel-apply failure leaves
    /// `current` untouched and is reported back, never fatal — except
    /// `RollbackFailure`, the one error that means kernel state is no longer
    /// trustworthy, which is fatal (§4.F step 5, §8 invariant 2).
    async fn reload(&mut self) -> Response {
        self.publish(SupervisorState::Reloading);
        let result = match crate::load_and_validate(&self.config_path).await {
            Ok(config) => self.reconciler.apply(config).await.map(|_| ()),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                self.publish(SupervisorState::Steady);
                Response::Ok
            }
            Err(Error::RollbackFailure(message)) => {
                self.publish(SupervisorState::Failed);
                Response::Error { exit_code: 3, message }
            }
            Err(err) => {
                self.publish(SupervisorState::Steady);
                Response::Error {
                    exit_code: err.exit_code(),
                    message: err.to_string(),
                }
            }
        }
    }

    fn status(&self) -> Response {
        let published = self.published.load();
        let (schema_version, zones, interfaces) = match &published.current {
            Some(config) => (
                Some(config.get().schema_version.to_string()),
                config.get().zones.len(),
                config.get().interfaces.len(),
            ),
            None => (None, 0, 0),
        };
        Response::Status {
            state: format!("{:?}", published.state),
            schema_version,
            zones,
            interfaces,
        }
    }

    async fn verify_checksum(&self, binary_path: &Utf8Path, expected_sha256: &str) -> Result<(), Error> {
        let bytes = tokio::fs::read(binary_path).await?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = format!("{:x}", hasher.finalize());
        if !digest.eq_ignore_ascii_case(expected_sha256) {
            return Err(Error::UpgradeChecksumMismatch);
        }
        Ok(())
    }

    /// §4.G upgrade: verify the new binary's checksum, write a handoff
    /// snapshot, spawn it with a readiness pipe inherited across `exec`, and
    /// wait for it to signal it has loaded, validated, and reconciled
    /// against the handoff state. The old process keeps running until that
    /// signal (or the timeout) arrives, so a new binary that never comes up
    /// leaves the firewall exactly as it was.
    async fn upgrade(&mut self, binary_path: &Utf8Path, expected_sha256: &str) -> (Response, bool) {
        self.publish(SupervisorState::Upgrading);

        if let Err(err) = self.verify_checksum(binary_path, expected_sha256).await {
            self.publish(SupervisorState::Steady);
            return (
                Response::Error {
                    exit_code: err.exit_code(),
                    message: err.to_string(),
                },
                false,
            );
        }

        match self.handoff(binary_path).await {
            Ok(()) => {
                tracing::info!("upgrade handoff complete, new process is live");
                (Response::Ok, true)
            }
            Err(err) => {
                self.publish(SupervisorState::Steady);
                (
                    Response::Error {
                        exit_code: err.exit_code(),
                        message: err.to_string(),
                    },
                    false,
                )
            }
        }
    }

    async fn handoff(&self, binary_path: &Utf8Path) -> Result<(), Error> {
        let current = self
            .reconciler
            .current()
            .ok_or_else(|| Error::UpgradeHandoffError("no applied configuration to hand off".to_string()))?;

        let handoff_path = self.state_dir.root().join("handoff.snapshot");
        crate::state::write_snapshot_at(&handoff_path, current)
            .await
            .map_err(Error::State)?;

        let (parent_ready, child_ready) =
            StdUnixStream::pair().map_err(|e| Error::UpgradeHandoffError(e.to_string()))?;

        // Clear FD_CLOEXEC so the inherited fd survives the child's `exec`,
        // the same trick the teacher uses to hand a socket pair to its
        // worker process.
        let child_fd = child_ready.as_raw_fd();
        unsafe {
            let flags = libc::fcntl(child_fd, libc::F_GETFD);
            libc::fcntl(child_fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
        }

        let child = TokioCommand::new(binary_path.as_std_path())
            .env("FLYWALL_HANDOFF_PATH", handoff_path.display().to_string())
            .env("FLYWALL_READY_FD", child_ready.into_raw_fd().to_string())
            .env("FLYWALL_CONFIG_PATH", self.config_path.as_str())
            .spawn()
            .map_err(|e| Error::UpgradeHandoffError(format!("spawning new binary failed: {e}")))?;
        // The child keeps its own copy of the readiness fd across exec; we
        // don't supervise it further, so the handle can be dropped here.
        drop(child);

        let mut parent_ready = tokio::net::UnixStream::from_std(parent_ready).map_err(Error::IO)?;
        let mut byte = [0u8; 1];
        match timeout(UPGRADE_READY_TIMEOUT, parent_ready.read_exact(&mut byte)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(Error::UpgradeHandoffError(e.to_string())),
            Err(_) => Err(Error::UpgradeTimeout),
        }
    }

    /// §4.G main loop: multiplexes signals and control-socket requests.
    /// `Validate` requests don't touch the reconciler, so they run
    /// concurrently in a `JoinSet`; `Reload`/`Upgrade`/`Status` run inline
    /// since they need exclusive access to `self.reconciler` (§5
    /// single-writer model). SIGTERM/SIGINT drain outstanding validations
    /// before returning — no in-flight apply is ever interrupted, since the
    /// select loop only ever runs one reload/upgrade at a time.
    pub async fn run(mut self, mut request_rx: mpsc::Receiver<ControlRequest>) -> Result<(), Error> {
        let mut signal_receiver = signal_channel().await?;
        let cancel = CancellationToken::new();
        let mut validations: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                Some(signal) = signal_receiver.recv() => match signal {
                    SignalMessage::Shutdown => {
                        tracing::info!("shutting down");
                        cancel.cancel();
                        validations.shutdown().await;
                        break;
                    }
                    SignalMessage::Reload => {
                        tracing::info!("SIGHUP received: reloading configuration");
                        self.reload().await;
                        self.reopen_log_file();
                    }
                },

                Some(request) = request_rx.recv() => {
                    match request.command {
                        Command::Validate { path } => {
                            let cancel = cancel.clone();
                            validations.spawn(async move {
                                let response = cancel
                                    .run_until_cancelled(validate_config(path))
                                    .await
                                    .unwrap_or(Response::Error {
                                        exit_code: 1,
                                        message: "supervisor is shutting down".to_string(),
                                    });
                                let _ = request.respond_to.send(response);
                            });
                        }
                        Command::Reload => {
                            let response = self.reload().await;
                            let _ = request.respond_to.send(response);
                        }
                        Command::Status => {
                            let _ = request.respond_to.send(self.status());
                        }
                        Command::Upgrade { path, sha256 } => {
                            let (response, should_exit) = self.upgrade(&path, &sha256).await;
                            let _ = request.respond_to.send(response);
                            if should_exit {
                                validations.shutdown().await;
                                return Ok(());
                            }
                        }
                    }
                },

                else => break,
            }
        }

        Ok(())
    }

    fn reopen_log_file(&self) {
        let (Some(handle), Some(path)) = (&self.log_reload, &self.log_path) else {
            tracing::debug!("no log file configured, skipping log reopen on SIGHUP");
            return;
        };
        match crate::logging::make_file_fmt_layer(path.as_str()) {
            Ok(layer) => {
                if let Err(err) = handle.reload(layer) {
                    tracing::error!(error = ?err, "failed to reopen log file after SIGHUP");
                }
            }
            Err(err) => tracing::error!(error = ?err, "failed to open log file after SIGHUP"),
        }
    }
}

async fn validate_config(path: Utf8PathBuf) -> Response {
    match crate::load_and_validate(&path).await {
        Ok(_) => Response::Ok,
        Err(err) => Response::Error {
            exit_code: err.exit_code(),
            message: err.to_string(),
        },
    }
}

/// The receiving side of the upgrade handoff (§4.G): read by a freshly
/// exec'd process before it runs its own boot. `None` for an ordinary
/// `flywall start`, since the env vars are only set by [`Supervisor::handoff`].
pub struct PendingHandoff {
    snapshot_path: std::path::PathBuf,
    ready_fd: RawFd,
}

impl PendingHandoff {
    pub fn from_env() -> Result<Option<Self>, Error> {
        let (Ok(snapshot_path), Ok(fd_str)) =
            (std::env::var("FLYWALL_HANDOFF_PATH"), std::env::var("FLYWALL_READY_FD"))
        else {
            return Ok(None);
        };
        let ready_fd: RawFd = fd_str
            .parse()
            .map_err(|_| Error::UpgradeHandoffError(format!("invalid FLYWALL_READY_FD value `{fd_str}`")))?;
        Ok(Some(Self {
            snapshot_path: std::path::PathBuf::from(snapshot_path),
            ready_fd,
        }))
    }

    pub async fn load_snapshot(&self) -> Result<CanonicalConfig, Error> {
        crate::state::read_snapshot_at(&self.snapshot_path).await.map_err(Error::State)
    }

    /// Writes the one readiness byte the old process is blocked reading,
    /// telling it that it is now safe to exit.
    pub fn signal_ready(self) {
        use std::io::Write;
        let mut file = unsafe { std::fs::File::from_raw_fd(self.ready_fd) };
        if let Err(err) = file.write_all(&[1u8]) {
            tracing::error!(error = ?err, "failed to signal upgrade readiness to the old process");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{InterfaceName, ZoneName};
    use crate::model::config::{Config, SchemaVersion};
    use crate::model::interface::Interface;
    use crate::model::zone::Zone;
    use crate::reconcile::kernel_ops::mocks::{MockKernelOps, MockTcOps};
    use crate::reconcile::netlink_ops::mocks::MockNetlinkOps;

    fn sample_config() -> CanonicalConfig {
        let config = Config {
            schema_version: SchemaVersion("1.2".to_string()),
            ip_forwarding: true,
            mss_clamping: false,
            enable_flow_offload: false,
            state_dir: "/var/lib/flywall".to_string(),
            zones: vec![Zone::new("lan")],
            interfaces: vec![Interface {
                name: InterfaceName::new("eth1"),
                zone: Some(ZoneName::new("lan")),
                ipv4: vec!["192.168.1.1/24".to_string()],
                ipv6: Vec::new(),
                dhcp: false,
                disabled: false,
                mtu: None,
            }],
            policies: Vec::new(),
            nats: Vec::new(),
            qos_policies: Vec::new(),
            dhcp: Vec::new(),
            dns: None,
            mdns: None,
            ebpf: None,
            web: None,
            api: Vec::new(),
            syslog: None,
        };
        crate::validate::validate(config).unwrap()
    }

    fn write_config(dir: &std::path::Path) -> Utf8PathBuf {
        let path = dir.join("flywall.hcl");
        std::fs::write(
            &path,
            r#"
                schema_version = "1.2"
                ip_forwarding  = true
                state_dir      = "/var/lib/flywall"

                zone "lan" {}

                interface "eth1" {
                  zone = "lan"
                  ipv4 = ["192.168.1.1/24"]
                }
            "#,
        )
        .unwrap();
        Utf8PathBuf::from_path_buf(path).unwrap()
    }

    async fn supervisor(state_dir: &std::path::Path, config_path: Utf8PathBuf) -> Supervisor {
        let state = StateDir::new(state_dir);
        state.ensure().await.unwrap();
        let reconciler = Reconciler::new(
            Box::new(MockKernelOps::default()),
            Box::new(MockTcOps::default()),
            Box::new(MockNetlinkOps::default()),
            state,
        );
        Supervisor::new(reconciler, StateDir::new(state_dir), config_path, None, None)
    }

    #[tokio::test]
    async fn boot_applies_the_initial_config_and_publishes_steady() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(dir.path());
        let mut sup = supervisor(dir.path(), config_path).await;

        sup.boot().await.unwrap();
        let published = sup.published();
        assert_eq!(published.load().state, SupervisorState::Steady);
        assert!(published.load().current.is_some());
    }

    #[tokio::test]
    async fn boot_failure_on_unparseable_config_publishes_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("flywall.hcl");
        std::fs::write(&config_path, "not valid hcl {{{").unwrap();
        let mut sup = supervisor(dir.path(), Utf8PathBuf::from_path_buf(config_path).unwrap()).await;

        let err = sup.boot().await.unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
        assert_eq!(sup.published().load().state, SupervisorState::Failed);
    }

    #[tokio::test]
    async fn reload_reapplies_the_config_file_and_stays_steady() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(dir.path());
        let mut sup = supervisor(dir.path(), config_path).await;
        sup.boot().await.unwrap();

        let response = sup.reload().await;
        assert!(matches!(response, Response::Ok));
        assert_eq!(sup.published().load().state, SupervisorState::Steady);
    }

    #[tokio::test]
    async fn reload_reports_a_missing_config_file_without_losing_current() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(dir.path());
        let mut sup = supervisor(dir.path(), config_path.clone()).await;
        sup.boot().await.unwrap();
        let before = sup.published().load().current.clone();

        std::fs::remove_file(&config_path).unwrap();
        let response = sup.reload().await;
        assert!(matches!(response, Response::Error { .. }));
        assert_eq!(sup.published().load().current, before);
        assert_eq!(sup.published().load().state, SupervisorState::Steady);
    }

    #[tokio::test]
    async fn status_reports_zone_and_interface_counts_after_boot() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(dir.path());
        let mut sup = supervisor(dir.path(), config_path).await;
        sup.boot().await.unwrap();

        match sup.status() {
            Response::Status { zones, interfaces, schema_version, .. } => {
                assert_eq!(zones, 1);
                assert_eq!(interfaces, 1);
                assert_eq!(schema_version.as_deref(), Some("1.2"));
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn checksum_mismatch_rejects_upgrade_without_touching_state() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(dir.path());
        let mut sup = supervisor(dir.path(), config_path).await;
        sup.boot().await.unwrap();

        let fake_binary = dir.path().join("new-flywall");
        std::fs::write(&fake_binary, b"not the real binary").unwrap();
        let binary_path = Utf8PathBuf::from_path_buf(fake_binary).unwrap();

        let wrong_checksum = "0".repeat(64);
        let (response, should_exit) = sup.upgrade(&binary_path, &wrong_checksum).await;
        assert!(!should_exit);
        assert!(matches!(response, Response::Error { .. }));
        assert_eq!(sup.published().load().state, SupervisorState::Steady);
    }

    #[test]
    fn pending_handoff_is_none_without_env_vars() {
        unsafe {
            std::env::remove_var("FLYWALL_HANDOFF_PATH");
            std::env::remove_var("FLYWALL_READY_FD");
        }
        assert!(PendingHandoff::from_env().unwrap().is_none());
    }
}
