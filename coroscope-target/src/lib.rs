//! Coroscope ターゲットアクセス
//!
//! このクレートは、調査対象のメモリとレジスタを読み取るための低レベル機能を提供します。
//! 実行中のプロセス（ptrace、/proc/pid/mem）とELFコアダンプの両方に対応します。
//! どちらも読み取り専用で、ターゲットの状態は変更しません。

pub mod coredump;
pub mod memory;
pub mod process;
pub mod registers;

pub use coredump::CoreDump;
pub use memory::{MemoryMapping, Memory};
pub use process::Process;
pub use registers::{RegisterSnapshot, RegisterSource, Registers};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
