//! Coroscope スタックレスコルーチンの継続チェーン解析
//!
//! このクレートは、中断中のスタックレスコルーチンのフレームを辿り、
//! 論理的な呼び出しチェーン（非同期バックトレース）を再構築する機能を提供します。
//! フレームレイアウトの戦略、継続チェーンの走査、シンボル解決のインターフェース、
//! バックトレース行の整形などを行います。

pub mod chain;
pub mod error;
pub mod frame;
pub mod layout;
pub mod present;
pub mod record;
pub mod resolver;
pub mod walker;

pub use chain::Chain;
pub use error::WalkError;
pub use frame::CoroutineFrame;
pub use layout::{
    strategy_for, CoroAbi, FieldNames, FixedOffsetLayout, LayoutStrategy, LayoutViolation,
    PromiseLinkLayout, UnknownAbi,
};
pub use present::present;
pub use record::FrameRecord;
pub use resolver::{layout_type_for, CodeScope, ResolvedCode, SymbolResolver};
pub use walker::ChainWalker;

/// コルーチン解析の結果型
pub type Result<T> = anyhow::Result<T>;
