//! メモリアクセス機能

use crate::Result;
use coroscope_dwarf::{MemoryAccessError, MemoryReader};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{BufRead, BufReader, Read as _, Seek, SeekFrom};
use std::path::Path;
use tracing::trace;

/// メモリマッピング情報（/proc/pid/mapsの1行）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    /// ファイル内のオフセット
    pub offset: u64,
    /// マップされたファイルのパス（無名マッピングはNone）
    pub path: Option<String>,
}

impl MemoryMapping {
    /// /proc/pid/maps の1行を解析する
    ///
    /// フォーマット: "address perms offset dev inode pathname"
    /// 例: "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so"
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let (start, end) = parts.next()?.split_once('-')?;
        let perms = parts.next()?;
        let offset = parts.next()?;
        let _dev = parts.next()?;
        let _inode = parts.next()?;
        let path = parts.collect::<Vec<_>>().join(" ");

        let mut perms = perms.chars();
        Some(Self {
            start: u64::from_str_radix(start, 16).ok()?,
            end: u64::from_str_radix(end, 16).ok()?,
            readable: perms.next() == Some('r'),
            writable: perms.next() == Some('w'),
            executable: perms.next() == Some('x'),
            offset: u64::from_str_radix(offset, 16).ok()?,
            path: if path.is_empty() { None } else { Some(path) },
        })
    }
}

/// 実行中プロセスのメモリ（読み取り専用）
pub struct Memory {
    pid: Pid,
    pointer_width: u64,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32, pointer_width: u64) -> Self {
        Self {
            pid: Pid::from_raw(pid),
            pointer_width,
        }
    }

    /// /proc/pid/mem のパスを取得する
    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// /proc/pid/memを使用してターゲットプロセスのメモリを読み取ります。
    /// /proc/pid/memが使用できない場合、PTRACE_PEEKDATAにフォールバックします。
    pub fn read_bytes(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        match self.read_via_proc_mem(addr, size) {
            Ok(data) => Ok(data),
            Err(proc_err) => {
                trace!("/proc read at 0x{:x} failed ({}), trying ptrace", addr, proc_err);
                self.read_via_ptrace(addr, size).map_err(|ptrace_err| {
                    MemoryAccessError::new(addr, size, format!("{}; {}", proc_err, ptrace_err)).into()
                })
            }
        }
    }

    /// /proc/pid/mem経由でメモリを読み取る（内部実装）
    fn read_via_proc_mem(&self, addr: u64, size: usize) -> std::io::Result<Vec<u8>> {
        let mut file = File::open(self.mem_path())?;
        file.seek(SeekFrom::Start(addr))?;

        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// PTRACE_PEEKDATAを使用してメモリからデータを読み取る
    ///
    /// 小さなデータ読み取り（1-8バイト）に適しています。
    fn read_via_ptrace(&self, addr: u64, size: usize) -> nix::Result<Vec<u8>> {
        let word_size = std::mem::size_of::<nix::libc::c_long>();
        let mut data = Vec::with_capacity(size + word_size);

        for offset in (0..size).step_by(word_size) {
            let word_addr = (addr + offset as u64) as nix::sys::ptrace::AddressType;
            let word = nix::sys::ptrace::read(self.pid, word_addr)?;
            data.extend_from_slice(&word.to_ne_bytes());
        }

        data.truncate(size);
        Ok(data)
    }

    /// /proc/pid/maps を解析してメモリマッピング情報を取得する
    pub fn mappings(&self) -> Result<Vec<MemoryMapping>> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let file = File::open(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", maps_path, e))?;

        let mut mappings = Vec::new();
        for line in BufReader::new(file).lines() {
            if let Some(mapping) = MemoryMapping::parse(&line?) {
                mappings.push(mapping);
            }
        }
        Ok(mappings)
    }

    /// 実行ファイルのロードバイアスを取得する
    ///
    /// PIE（Position Independent Executable）の場合、実行時にランダムなアドレスにロードされます。
    /// 実行ファイルをマップした最初の領域の開始アドレスからファイルオフセットを引いた値を返します。
    pub fn load_bias(&self, binary: &Path) -> Result<u64> {
        let mappings = self.mappings()?;
        load_bias_from_mappings(&mappings, binary).ok_or_else(|| {
            anyhow::anyhow!("Could not find {} in memory mappings", binary.display())
        })
    }
}

/// マッピング一覧から実行ファイルのロードバイアスを求める
pub fn load_bias_from_mappings(mappings: &[MemoryMapping], binary: &Path) -> Option<u64> {
    let canonical = binary.canonicalize().ok();
    let file_name = binary.file_name()?;

    let matches = |path: &str| {
        let path = Path::new(path);
        match &canonical {
            Some(canonical) if path == canonical.as_path() => true,
            _ => path.file_name() == Some(file_name),
        }
    };

    mappings
        .iter()
        .filter(|m| m.path.as_deref().is_some_and(matches))
        .find_map(|m| m.start.checked_sub(m.offset))
}

impl MemoryReader for Memory {
    fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        self.read_bytes(addr, size)
    }

    fn pointer_width(&self) -> u64 {
        self.pointer_width
    }
}
