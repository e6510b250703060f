//! コマンドのエラーとメッセージ

/// `async-bt` の使い方
pub const USAGE_ASYNC_BT: &str = "usage: async-bt <pointer to task>";

/// `show-coro-frame` の使い方
pub const USAGE_SHOW_CORO_FRAME: &str = "usage: show-coro-frame <address of coroutine frame>";

/// コマンドのエラー
///
/// 走査中のエラー（[`coroscope_coro::WalkError`]）やメモリアクセスエラー
/// （[`coroscope_dwarf::MemoryAccessError`]）はそれぞれの型のまま伝播します。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoroError {
    /// 引数の数や形式が正しくない
    #[error("{message}")]
    Input { message: String },

    /// 引数がなく、現在のコンテキストから開始フレームを推定できない
    #[error("Can't find __coro_frame in current context.\nPlease use `async-bt` in stackless coroutine context.")]
    ContextInference,

    /// フレームの resume 関数がどの関数にも属さない
    #[error("block 0x{addr:x} is none.")]
    BlockNone { addr: u64 },

    /// 関数に対応するフレーム型がデバッグ情報にない
    #[error("No coroutine frame type for {function}")]
    FrameTypeNotFound { function: String },
}

impl CoroError {
    pub fn input(message: impl Into<String>) -> Self {
        CoroError::Input {
            message: message.into(),
        }
    }

    /// コマンド内でメッセージを表示して終わるエラーかどうか
    ///
    /// それ以外のエラーは呼び出し元（REPL）まで伝播します。
    pub fn is_reported_inline(&self) -> bool {
        matches!(
            self,
            CoroError::Input { .. } | CoroError::ContextInference | CoroError::BlockNone { .. }
        )
    }
}
