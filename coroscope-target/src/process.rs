//! プロセス制御機能

use crate::registers::{RegisterSnapshot, RegisterSource, Registers};
use crate::Result;
use nix::sys::wait::{waitpid, WaitStatus};
use tracing::{debug, warn};

/// アタッチ中のプロセス
///
/// アタッチ中はプロセスが停止しており、ドロップ時にデタッチして実行を再開させます。
pub struct Process {
    pid: nix::unistd::Pid,
}

impl Process {
    /// 既存のプロセスにアタッチし、停止するまで待機する
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = nix::unistd::Pid::from_raw(pid);
        nix::sys::ptrace::attach(pid)
            .map_err(|e| anyhow::anyhow!("Failed to attach to process {}: {}", pid, e))?;

        // ここで作成しておけば、待機に失敗した場合もデタッチされる
        let process = Self { pid };
        match waitpid(pid, None)? {
            WaitStatus::Stopped(_, signal) => {
                debug!("attached to {} (stopped by {:?})", pid, signal);
                Ok(process)
            }
            status => Err(anyhow::anyhow!(
                "Unexpected wait status after attach: {:?}",
                status
            )),
        }
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// プロセスのレジスタ
    pub fn registers(&self) -> Registers {
        Registers::new(self.pid())
    }
}

impl RegisterSource for Process {
    fn snapshot(&self) -> Result<RegisterSnapshot> {
        self.registers().snapshot()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if let Err(e) = nix::sys::ptrace::detach(self.pid, None) {
            warn!("Failed to detach from {}: {}", self.pid, e);
        }
    }
}
