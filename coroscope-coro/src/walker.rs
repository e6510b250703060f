//! 継続チェーンの走査

use crate::chain::Chain;
use crate::error::WalkError;
use crate::frame::CoroutineFrame;
use crate::layout::LayoutStrategy;
use crate::record::FrameRecord;
use crate::resolver::{layout_type_for, CodeScope, SymbolResolver};
use crate::Result;
use coroscope_dwarf::MemoryReader;
use tracing::debug;

/// 継続チェーンの走査器
///
/// 状態を持たないので、同じ走査器で何度でも走査できます。
pub struct ChainWalker<'a> {
    memory: &'a dyn MemoryReader,
    symbols: &'a dyn SymbolResolver,
    layout: &'a dyn LayoutStrategy,
}

impl<'a> ChainWalker<'a> {
    pub fn new(
        memory: &'a dyn MemoryReader,
        symbols: &'a dyn SymbolResolver,
        layout: &'a dyn LayoutStrategy,
    ) -> Self {
        Self {
            memory,
            symbols,
            layout,
        }
    }

    /// `start` のフレームから継続が null になるまで辿る
    ///
    /// 途中のフレームが解決できなければ、それまでの結果は捨ててエラーを返します。
    /// 循環の検出は行いません。
    pub fn walk(&self, start: u64) -> Result<Chain> {
        let pointer_width = self.memory.pointer_width();
        let mut chain = Chain::new();
        let mut addr = start;

        while addr != 0 {
            let frame = self.layout.frame_at(addr, pointer_width);
            let record = FrameRecord::resolve(&frame, self.memory, self.symbols)?;
            self.check_layout(&frame, &record.scope)?;

            debug!(
                "#{} frame 0x{:x} resumes at 0x{:x}",
                chain.depth(),
                addr,
                record.resume_address
            );
            chain.push(record);
            addr = self.layout.next_frame_address(&frame, self.memory)?;
        }

        debug!("chain from 0x{:x}: {} frames", start, chain.depth());
        Ok(chain)
    }

    /// フレーム型が分かる場合、レイアウトの前提を確認する
    fn check_layout(&self, frame: &CoroutineFrame, scope: &CodeScope) -> Result<()> {
        let Some(frame_type) = layout_type_for(self.symbols, scope)? else {
            debug!(
                "no frame type for {}, assuming the {} layout",
                scope.display_name(),
                self.layout.abi()
            );
            return Ok(());
        };

        self.layout
            .verify(&frame_type, frame.pointer_width())
            .map_err(|violation| {
                WalkError::LayoutMismatch {
                    frame: frame.frame_addr(),
                    abi: self.layout.abi(),
                    violation,
                }
                .into()
            })
    }
}
