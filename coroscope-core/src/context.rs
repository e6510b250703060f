//! コマンドから見たターゲット

use crate::Result;
use coroscope_coro::{LayoutStrategy, SymbolResolver};
use coroscope_dwarf::MemoryReader;

/// コマンドの実行コンテキスト
///
/// 実行中プロセス・コアダンプ・テスト用の偽ターゲットを同じように扱えるようにします。
pub trait CommandContext {
    fn memory(&self) -> &dyn MemoryReader;

    fn symbols(&self) -> &dyn SymbolResolver;

    fn layout(&self) -> &dyn LayoutStrategy;

    /// 現在の関数の `__coro_frame` 変数のアドレスを求める
    ///
    /// 引数なしの `async-bt` の開始フレームとして使います。
    fn current_coro_frame(&self) -> Result<u64>;
}
