//! チェーン走査のエラー

use crate::layout::{CoroAbi, LayoutViolation};

/// 継続チェーンの走査中に発生するエラー
#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    /// resume アドレスがどの関数にも属さない
    ///
    /// 辿っているアドレスがコルーチンフレームではないことを示します。
    #[error("0x{addr:x} is not a stackless coroutine resume function")]
    UnresolvedSymbol { addr: u64 },

    /// フレーム型がレイアウト戦略の前提と一致しない
    #[error("coroutine frame 0x{frame:x} does not follow the {abi} layout: {violation}")]
    LayoutMismatch {
        frame: u64,
        abi: CoroAbi,
        violation: LayoutViolation,
    },
}
