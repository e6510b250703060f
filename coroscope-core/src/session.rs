//! デバッグセッション

use crate::command::Command;
use crate::context::CommandContext;
use crate::handlers::{async_backtrace, show_coro_frame};
use crate::symbols::BinarySymbols;
use crate::Result;
use coroscope_coro::{strategy_for, CoroAbi, LayoutStrategy, SymbolResolver};
use coroscope_dwarf::MemoryReader;
use coroscope_target::{CoreDump, Memory, Process, RegisterSource};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// 調査対象
pub enum Target {
    /// アタッチ中のプロセス
    Live { process: Process, memory: Memory },
    /// コアダンプ
    Core(CoreDump),
}

/// コマンド実行後の動作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// デバッグセッション
///
/// 実行ファイルのシンボル情報と調査対象を束ね、コマンドを実行します。
pub struct Session {
    symbols: BinarySymbols,
    target: Target,
    layout: Box<dyn LayoutStrategy>,
}

impl Session {
    /// 既存のプロセスにアタッチする
    pub fn attach<P: AsRef<Path>>(binary: P, pid: i32, abi: CoroAbi) -> Result<Self> {
        let binary = binary.as_ref();
        let symbols = BinarySymbols::load(binary)?;

        let process = Process::attach(pid)?;
        let memory = Memory::new(pid, symbols.loader().pointer_width());
        let load_bias = if symbols.loader().is_pie() {
            memory.load_bias(binary).unwrap_or_else(|e| {
                warn!("Assuming load bias 0: {}", e);
                0
            })
        } else {
            0
        };
        debug!("attached to {} (load bias 0x{:x})", pid, load_bias);

        Ok(Self {
            symbols: symbols.with_load_bias(load_bias),
            target: Target::Live { process, memory },
            layout: strategy_for(abi),
        })
    }

    /// コアダンプを開く
    pub fn open_core<P: AsRef<Path>, C: AsRef<Path>>(binary: P, core: C, abi: CoroAbi) -> Result<Self> {
        let binary = binary.as_ref();
        let symbols = BinarySymbols::load(binary)?;

        let core = CoreDump::open(core)?;
        let load_bias = if symbols.loader().is_pie() {
            core.load_bias(binary).unwrap_or_else(|| {
                warn!("{} is not in the core file mappings, assuming load bias 0", binary.display());
                0
            })
        } else {
            0
        };
        debug!("opened core file (load bias 0x{:x})", load_bias);

        Ok(Self {
            symbols: symbols.with_load_bias(load_bias),
            target: Target::Core(core),
            layout: strategy_for(abi),
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn abi(&self) -> CoroAbi {
        self.layout.abi()
    }

    fn registers(&self) -> &dyn RegisterSource {
        match &self.target {
            Target::Live { process, .. } => process,
            Target::Core(core) => core,
        }
    }

    /// コマンドを1行実行する
    pub fn execute(&self, line: &str, out: &mut dyn Write) -> Result<Flow> {
        let Some(command) = Command::parse(line)? else {
            return Ok(Flow::Continue);
        };

        match command {
            Command::AsyncBacktrace(args) => async_backtrace(self, &args, out)?,
            Command::ShowCoroFrame(args) => show_coro_frame(self, &args, out)?,
            Command::Help => print_help(out)?,
            Command::Quit => return Ok(Flow::Quit),
            Command::Unknown(name) => {
                writeln!(out, "Unknown command: {}", name)?;
                writeln!(out, "Type 'help' for available commands.")?;
            }
        }
        Ok(Flow::Continue)
    }
}

impl CommandContext for Session {
    fn memory(&self) -> &dyn MemoryReader {
        match &self.target {
            Target::Live { memory, .. } => memory,
            Target::Core(core) => core,
        }
    }

    fn symbols(&self) -> &dyn SymbolResolver {
        &self.symbols
    }

    fn layout(&self) -> &dyn LayoutStrategy {
        self.layout.as_ref()
    }

    fn current_coro_frame(&self) -> Result<u64> {
        let registers = self.registers().snapshot()?;
        self.symbols.coro_frame_address(&registers, self.memory())
    }
}

/// ヘルプを表示する
pub fn print_help(out: &mut dyn Write) -> Result<()> {
    writeln!(out, "Available commands:")?;
    writeln!(out)?;
    writeln!(out, "  async-bt [<pointer to task>]")?;
    writeln!(out, "      Print the chain of suspended coroutines starting at a frame.")?;
    writeln!(out, "      Without an argument, starts from __coro_frame of the current function.")?;
    writeln!(out, "  show-coro-frame <address of coroutine frame>")?;
    writeln!(out, "      Print every field of a coroutine frame.")?;
    writeln!(out, "  help           - Show this help message")?;
    writeln!(out, "  quit/exit/q    - Exit")?;
    writeln!(out)?;
    writeln!(out, "Addresses are hexadecimal with 0x, otherwise decimal.")?;
    Ok(())
}
