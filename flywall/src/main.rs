//! `flywall` binary (§6 CLI surface): wires the reconciliation engine in
//! `flywall-core` to a process — boot, control socket, and the thin client
//! commands that talk to an already-running daemon over it.

mod cli;

use std::process;

use camino::Utf8PathBuf;
use tokio::sync::mpsc;

use flywall_core::control::{self, Command as ControlCommand, Response};
use flywall_core::reconcile::kernel_ops::{RealKernelOps, RealTcOps};
use flywall_core::reconcile::netlink_ops::RealNetlinkOps;
use flywall_core::reconcile::Reconciler;
use flywall_core::state::StateDir;
use flywall_core::supervisor::{PendingHandoff, Supervisor};

use cli::{CtlCommand, SocketArgs, StartArgs, ValidateArgs};

/// Bound on in-flight control requests before new ones see `Busy` (§5).
const CONTROL_QUEUE_DEPTH: usize = 32;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() {
    let cli = cli::parse();
    let code = match cli.command {
        cli::Command::Start(args) => start(args).await,
        cli::Command::Validate(args) => validate(args).await,
        cli::Command::Reload(args) => {
            client_request(&args, ControlCommand::Reload, |_| exitcode::OK).await
        }
        cli::Command::Status(args) => client_request(&args, ControlCommand::Status, print_status).await,
        cli::Command::Ctl {
            command: CtlCommand::Upgrade { binary, checksum, socket },
        } => {
            let command = ControlCommand::Upgrade { path: binary, sha256: checksum };
            client_request(&socket, command, |_| exitcode::OK).await
        }
    };
    process::exit(code);
}

async fn validate(args: ValidateArgs) -> exitcode::ExitCode {
    flywall_core::logging::setup_stdout();
    match flywall_core::load_and_validate(&args.config_path).await {
        Ok(config) => {
            println!(
                "configuration valid: {} zone(s), {} interface(s), schema {}",
                config.get().zones.len(),
                config.get().interfaces.len(),
                config.get().schema_version
            );
            exitcode::OK
        }
        Err(err) => {
            eprintln!("{err}");
            err.exit_code()
        }
    }
}

/// Connects to a running daemon's control socket, sends one `command`, and
/// renders the response with `on_success`. Shared by `reload`/`status`/
/// `ctl upgrade`, which differ only in what they send and print (§4.H).
async fn client_request(
    args: &SocketArgs,
    command: ControlCommand,
    on_success: impl FnOnce(&Response) -> exitcode::ExitCode,
) -> exitcode::ExitCode {
    let socket_path = StateDir::new(args.state_dir.as_std_path()).control_socket();
    match control::send_request(&socket_path, &command).await {
        Ok(response @ Response::Ok) | Ok(response @ Response::Status { .. }) => on_success(&response),
        Ok(Response::Error { exit_code, message }) => {
            eprintln!("{message}");
            exit_code
        }
        Ok(Response::Busy) => {
            eprintln!("reconciler is busy, try again");
            exitcode::TEMPFAIL
        }
        Err(err) => {
            eprintln!("failed to reach flywall control socket at {socket_path:?}: {err}");
            exitcode::UNAVAILABLE
        }
    }
}

fn print_status(response: &Response) -> exitcode::ExitCode {
    if let Response::Status { state, schema_version, zones, interfaces } = response {
        println!("state:      {state}");
        println!("schema:     {}", schema_version.as_deref().unwrap_or("(none applied)"));
        println!("zones:      {zones}");
        println!("interfaces: {interfaces}");
    }
    exitcode::OK
}

async fn start(args: StartArgs) -> exitcode::ExitCode {
    let log_reload_handle = match setup_logging(&args.log_file) {
        Ok(handle) => handle,
        Err(code) => return code,
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting flywall");

    let state_dir = StateDir::new(args.state_dir.as_std_path());
    if let Err(err) = state_dir.ensure().await {
        tracing::error!(error = ?err, "unable to create state directory");
        return exitcode::IOERR;
    }

    let pid = process::id();
    if let Err(err) = state_dir.write_pid(pid).await {
        tracing::error!(error = ?err, "unable to write pid file");
        return exitcode::IOERR;
    }

    let reconciler = Reconciler::new(
        Box::new(RealKernelOps),
        Box::new(RealTcOps),
        Box::new(RealNetlinkOps),
        StateDir::new(args.state_dir.as_std_path()),
    );

    let mut supervisor = Supervisor::new(
        reconciler,
        StateDir::new(args.state_dir.as_std_path()),
        args.config_path.clone(),
        log_reload_handle,
        args.log_file.clone(),
    );

    let boot_result = match PendingHandoff::from_env() {
        Ok(Some(handoff)) => match handoff.load_snapshot().await {
            Ok(snapshot) => {
                supervisor.seed_from_handoff(snapshot);
                handoff.signal_ready();
                tracing::info!("resumed from upgrade handoff, now steady");
                Ok(())
            }
            Err(err) => Err(err),
        },
        Ok(None) => supervisor.boot().await,
        Err(err) => Err(err),
    };

    if let Err(err) = boot_result {
        tracing::error!(error = ?err, "initial apply failed");
        let _ = state_dir.remove_pid().await;
        return err.exit_code();
    }

    let (request_tx, request_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
    let socket_path: std::path::PathBuf = state_dir.control_socket();
    let serve_handle = tokio::spawn(async move {
        if let Err(err) = control::serve(&socket_path, request_tx).await {
            tracing::error!(error = ?err, "control socket server exited");
        }
    });

    let result = supervisor.run(request_rx).await;
    serve_handle.abort();

    let _ = state_dir.remove_pid().await;
    let _ = tokio::fs::remove_file(state_dir.control_socket()).await;

    match result {
        Ok(()) => exitcode::OK,
        Err(err) => {
            tracing::error!(error = ?err, "supervisor exited with an error");
            err.exit_code()
        }
    }
}

fn setup_logging(
    log_file: &Option<Utf8PathBuf>,
) -> Result<Option<flywall_core::logging::LogReloadHandle>, exitcode::ExitCode> {
    match log_file {
        Some(path) => {
            let layer = flywall_core::logging::make_file_fmt_layer(path.as_str()).map_err(|err| {
                eprintln!("failed to open log file {path}: {err}");
                exitcode::IOERR
            })?;
            Ok(Some(flywall_core::logging::setup_log_file(layer)))
        }
        None => {
            flywall_core::logging::setup_stdout();
            Ok(None)
        }
    }
}
