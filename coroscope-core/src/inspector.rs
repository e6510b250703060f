//! コルーチンフレームの内容表示

use crate::errors::CoroError;
use crate::Result;
use coroscope_coro::{layout_type_for, SymbolResolver};
use coroscope_dwarf::{MemoryReader, ValueFormatter};
use tracing::debug;

/// コルーチンフレームをフレーム型として整形する
pub struct FrameInspector<'a> {
    memory: &'a dyn MemoryReader,
    symbols: &'a dyn SymbolResolver,
}

impl<'a> FrameInspector<'a> {
    pub fn new(memory: &'a dyn MemoryReader, symbols: &'a dyn SymbolResolver) -> Self {
        Self { memory, symbols }
    }

    /// `frame_address` にあるフレームを全フィールド展開して整形する
    ///
    /// resume 関数がどの関数にも属さない場合は [`CoroError::BlockNone`] を返し、
    /// フレーム型の検索は行いません。
    pub fn inspect(&self, frame_address: u64) -> Result<String> {
        let resume_address = self.memory.read_pointer(frame_address)?;
        let Some(scope) = self.symbols.scope_at(resume_address)? else {
            return Err(CoroError::BlockNone {
                addr: frame_address,
            }
            .into());
        };

        let frame_type = layout_type_for(self.symbols, &scope)?.ok_or_else(|| {
            CoroError::FrameTypeNotFound {
                function: scope.display_name(),
            }
        })?;
        debug!(
            "frame 0x{:x} is {} ({} bytes)",
            frame_address,
            frame_type.name(),
            frame_type.size()
        );

        let symbolize = |addr: u64| self.symbols.symbolize(addr);
        ValueFormatter::new(self.memory)
            .with_symbolizer(&symbolize)
            .format(frame_address, &frame_type)
    }
}
