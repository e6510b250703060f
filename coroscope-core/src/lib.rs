//! Coroscope のコア機能
//!
//! このクレートは、非同期バックトレースのコマンドを提供します。
//! 実行ファイルのデバッグ情報と調査対象（プロセスまたはコアダンプ）を統合し、
//! `async-bt` と `show-coro-frame` を実行します。

pub mod command;
pub mod context;
pub mod errors;
pub mod handlers;
pub mod inspector;
pub mod parse;
pub mod session;
pub mod symbols;

pub use command::Command;
pub use context::CommandContext;
pub use errors::CoroError;
pub use handlers::{async_backtrace, show_coro_frame};
pub use inspector::FrameInspector;
pub use session::{print_help, Flow, Session, Target};
pub use symbols::BinarySymbols;

// 他のクレートから使用するために再エクスポート
pub use coroscope_coro::{CoroAbi, WalkError};
pub use coroscope_dwarf::MemoryAccessError;

/// コマンドの結果型
pub type Result<T> = anyhow::Result<T>;
