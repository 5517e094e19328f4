use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

const DEFAULT_CONFIG_PATH: &str = "/etc/flywall/flywall.hcl";
const DEFAULT_STATE_DIR: &str = "/var/lib/flywall";

pub const ENV_VAR_CONFIG_PATH: &str = "FLYWALL_CONFIG_PATH";
pub const ENV_VAR_STATE_DIR: &str = "FLYWALL_STATE_DIR";

/// Zone-based firewall and router control plane.
#[derive(Clone, Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Load the configuration, apply it, and serve the control socket (§4.G boot).
    Start(StartArgs),
    /// Run the load/migrate/validate pipeline without applying anything (§4.B-D).
    Validate(ValidateArgs),
    /// Ask the running daemon to reload its configuration (§4.H, SIGHUP equivalent).
    Reload(SocketArgs),
    /// Ask the running daemon for its current state (§4.H).
    Status(SocketArgs),
    /// Administrative control-socket operations that need more than one argument.
    Ctl {
        #[command(subcommand)]
        command: CtlCommand,
    },
}

#[derive(Clone, Debug, Subcommand)]
pub enum CtlCommand {
    /// Request a zero-downtime self-upgrade handshake (§4.G).
    Upgrade {
        /// Path to the new `flywall` binary, already staged on disk.
        binary: Utf8PathBuf,
        /// Expected SHA-256 of `binary`; verified before any exec is attempted.
        #[arg(long)]
        checksum: String,
        #[command(flatten)]
        socket: SocketArgs,
    },
}

#[derive(Clone, Debug, Args)]
pub struct StartArgs {
    /// Root configuration file.
    #[arg(short, long, env = ENV_VAR_CONFIG_PATH, default_value = DEFAULT_CONFIG_PATH)]
    pub config_path: Utf8PathBuf,

    /// Directory for the pid file, snapshot, nft backup, and control socket (§6).
    #[arg(long, env = ENV_VAR_STATE_DIR, default_value = DEFAULT_STATE_DIR)]
    pub state_dir: Utf8PathBuf,

    /// Log to this file instead of stdout; reopened on `SIGHUP` for log rotation.
    #[arg(long)]
    pub log_file: Option<Utf8PathBuf>,
}

#[derive(Clone, Debug, Args)]
pub struct ValidateArgs {
    #[arg(short, long, env = ENV_VAR_CONFIG_PATH, default_value = DEFAULT_CONFIG_PATH)]
    pub config_path: Utf8PathBuf,
}

#[derive(Clone, Debug, Args)]
pub struct SocketArgs {
    /// Control socket of a running daemon.
    #[arg(long, env = ENV_VAR_STATE_DIR, default_value = DEFAULT_STATE_DIR)]
    pub state_dir: Utf8PathBuf,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_with_defaults() {
        let cli = Cli::try_parse_from(["flywall", "start"]).unwrap();
        match cli.command {
            Command::Start(args) => {
                assert_eq!(args.config_path, Utf8PathBuf::from(DEFAULT_CONFIG_PATH));
                assert_eq!(args.state_dir, Utf8PathBuf::from(DEFAULT_STATE_DIR));
            }
            other => panic!("expected Start, got {other:?}"),
        }
    }

    #[test]
    fn parses_validate_with_explicit_path() {
        let cli = Cli::try_parse_from(["flywall", "validate", "-c", "/tmp/flywall.hcl"]).unwrap();
        match cli.command {
            Command::Validate(args) => assert_eq!(args.config_path, Utf8PathBuf::from("/tmp/flywall.hcl")),
            other => panic!("expected Validate, got {other:?}"),
        }
    }

    #[test]
    fn parses_ctl_upgrade() {
        let cli = Cli::try_parse_from(["flywall", "ctl", "upgrade", "/usr/sbin/flywall_new", "--checksum", "abcd"]).unwrap();
        match cli.command {
            Command::Ctl {
                command: CtlCommand::Upgrade { binary, checksum, .. },
            } => {
                assert_eq!(binary, Utf8PathBuf::from("/usr/sbin/flywall_new"));
                assert_eq!(checksum, "abcd");
            }
            other => panic!("expected Ctl Upgrade, got {other:?}"),
        }
    }
}
