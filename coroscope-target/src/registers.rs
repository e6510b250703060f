//! レジスタアクセス機能

use crate::Result;
use nix::unistd::Pid;

/// x86-64の汎用レジスタのスナップショット
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub rax: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
}

impl RegisterSnapshot {
    /// プログラムカウンタ（RIP）
    pub fn pc(&self) -> u64 {
        self.rip
    }

    /// DWARFのレジスタ番号でレジスタ値を取得する
    ///
    /// x86-64 System V ABIの番号付け（0 rax, 1 rdx, 2 rcx, 3 rbx, 4 rsi, 5 rdi,
    /// 6 rbp, 7 rsp, 8-15 r8-r15, 16 rip）に従います。
    pub fn dwarf_register(&self, reg: u16) -> Result<u64> {
        let value = match reg {
            0 => self.rax,
            1 => self.rdx,
            2 => self.rcx,
            3 => self.rbx,
            4 => self.rsi,
            5 => self.rdi,
            6 => self.rbp,
            7 => self.rsp,
            8 => self.r8,
            9 => self.r9,
            10 => self.r10,
            11 => self.r11,
            12 => self.r12,
            13 => self.r13,
            14 => self.r14,
            15 => self.r15,
            16 => self.rip,
            _ => return Err(anyhow::anyhow!("Unsupported DWARF register number: {}", reg)),
        };
        Ok(value)
    }

    /// `user_regs_struct` の並び（r15, r14, ..., rip, ...）の値から作成する
    ///
    /// コアダンプのNT_PRSTATUSに含まれるレジスタ配列と同じ並びです。
    pub fn from_user_regs_words(words: &[u64]) -> Option<Self> {
        if words.len() < 17 {
            return None;
        }
        Some(Self {
            r15: words[0],
            r14: words[1],
            r13: words[2],
            r12: words[3],
            rbp: words[4],
            rbx: words[5],
            r11: words[6],
            r10: words[7],
            r9: words[8],
            r8: words[9],
            rax: words[10],
            rcx: words[11],
            rdx: words[12],
            rsi: words[13],
            rdi: words[14],
            // words[15] は orig_rax
            rip: words[16],
            rsp: words.get(19).copied().unwrap_or(0),
        })
    }
}

impl From<&nix::libc::user_regs_struct> for RegisterSnapshot {
    fn from(regs: &nix::libc::user_regs_struct) -> Self {
        Self {
            rax: regs.rax,
            rdx: regs.rdx,
            rcx: regs.rcx,
            rbx: regs.rbx,
            rsi: regs.rsi,
            rdi: regs.rdi,
            rbp: regs.rbp,
            rsp: regs.rsp,
            r8: regs.r8,
            r9: regs.r9,
            r10: regs.r10,
            r11: regs.r11,
            r12: regs.r12,
            r13: regs.r13,
            r14: regs.r14,
            r15: regs.r15,
            rip: regs.rip,
        }
    }
}

/// レジスタの取得元
///
/// 実行中のプロセスとコアダンプの両方で同じように扱えるようにします。
pub trait RegisterSource {
    /// 現在のスレッドのレジスタを取得する
    fn snapshot(&self) -> Result<RegisterSnapshot>;
}

/// 実行中プロセスのレジスタ
pub struct Registers {
    pid: Pid,
}

impl Registers {
    /// レジスタアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// レジスタを読み取る
    pub fn read(&self) -> Result<nix::libc::user_regs_struct> {
        let regs = nix::sys::ptrace::getregs(self.pid)
            .map_err(|e| anyhow::anyhow!("Failed to read registers of {}: {}", self.pid, e))?;
        Ok(regs)
    }
}

impl RegisterSource for Registers {
    fn snapshot(&self) -> Result<RegisterSnapshot> {
        Ok(RegisterSnapshot::from(&self.read()?))
    }
}
