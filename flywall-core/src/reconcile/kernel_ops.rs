//! Subprocess boundary to `nft` and `tc` (§4.F: nft batches are kernel-
//! atomic via `nft -f -`; tc invocations are not, so they go one at a time
//! through [`TcOps`] and are journaled by the caller).

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::Error;
use crate::shell::{Logs, ShellCommandExt};

#[async_trait]
pub trait KernelOps: Send + Sync {
    /// Feeds `script` to `nft -f -` as one transaction. All-or-nothing at
    /// the kernel level — a bad rule anywhere aborts the whole batch.
    async fn apply_nft(&self, script: &str) -> Result<(), Error>;

    /// `nft -s list ruleset`, the snapshot written to `nft.backup` before
    /// every apply (§4.F step 1).
    async fn read_ruleset(&self) -> Result<String, Error>;
}

#[async_trait]
pub trait TcOps: Send + Sync {
    /// Runs one `tc <args>` invocation. Failure is reported per-invocation
    /// so the caller can roll back everything already applied.
    async fn run(&self, args: &[String]) -> Result<(), Error>;
}

pub struct RealKernelOps;

#[async_trait]
impl KernelOps for RealKernelOps {
    async fn apply_nft(&self, script: &str) -> Result<(), Error> {
        let mut child = Command::new("nft")
            .args(["-f", "-"])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(crate::shell::Error::IO)?;

        let mut stdin = child.stdin.take().expect("piped stdin");
        stdin
            .write_all(script.as_bytes())
            .await
            .map_err(crate::shell::Error::IO)?;
        drop(stdin);

        let output = child.wait_with_output().await.map_err(crate::shell::Error::IO)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(Error::KernelApply {
                subsystem: "nft".to_string(),
                message: stderr,
            });
        }
        Ok(())
    }

    async fn read_ruleset(&self) -> Result<String, Error> {
        Ok(Command::new("nft")
            .args(["-s", "list", "ruleset"])
            .run_stdout(Logs::Print)
            .await
            .map_err(Error::Shell)?)
    }
}

pub struct RealTcOps;

#[async_trait]
impl TcOps for RealTcOps {
    async fn run(&self, args: &[String]) -> Result<(), Error> {
        Command::new("tc")
            .args(args)
            .run(Logs::Print)
            .await
            .map_err(|_| Error::KernelApply {
                subsystem: "tc".to_string(),
                message: format!("tc {} failed", args.join(" ")),
            })
    }
}
