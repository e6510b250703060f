//! 解決済みのフレーム

use crate::frame::CoroutineFrame;
use crate::resolver::{CodeScope, SymbolResolver};
use crate::Result;
use coroscope_dwarf::{LineInfo, MemoryReader};

/// 非同期バックトレースの1フレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    /// resume 関数のアドレス
    pub resume_address: u64,
    /// resume 関数のスコープ
    pub scope: CodeScope,
    /// resume 関数のソース行
    pub line: Option<LineInfo>,
    pub frame_addr: u64,
    pub promise_addr: u64,
    pub continuation_addr: u64,
}

impl FrameRecord {
    /// フレームの resume 関数を読み取り、関数とソース行に解決する
    pub fn resolve(
        frame: &CoroutineFrame,
        memory: &dyn MemoryReader,
        symbols: &dyn SymbolResolver,
    ) -> Result<Self> {
        let resume_address = frame.resume_address(memory)?;
        let resolved = symbols.resolve(resume_address)?;

        Ok(Self {
            resume_address,
            scope: resolved.scope,
            line: resolved.line,
            frame_addr: frame.frame_addr(),
            promise_addr: frame.promise_addr(),
            continuation_addr: frame.continuation_addr(),
        })
    }

    /// 現在の表示モードに従った関数名
    pub fn function_name(&self) -> String {
        self.scope.display_name()
    }

    pub fn source_file(&self) -> Option<&str> {
        self.line.as_ref().map(|line| line.file.as_str())
    }

    pub fn source_line(&self) -> Option<u32> {
        self.line.as_ref().map(|line| line.line)
    }
}
