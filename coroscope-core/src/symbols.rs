//! 実行ファイルのデバッグ情報によるシンボル解決

use crate::Result;
use coroscope_coro::{CodeScope, SymbolResolver};
use coroscope_dwarf::{
    DwarfLoader, FrameTypeIndex, FunctionFinder, FunctionScope, LineInfo, LineInfoProvider,
    MemoryReader, SymbolTable, TypeInfo, TypeInfoExtractor, VariableLocator,
};
use coroscope_target::RegisterSnapshot;
use std::path::Path;
use tracing::{debug, trace};

/// コルーチンのフレーム変数の名前
pub const CORO_FRAME_VARIABLE: &str = "__coro_frame";

/// 実行ファイルのシンボル情報
///
/// 実行時のアドレスを受け取り、ロードバイアスを引いてからDWARFを引きます。
pub struct BinarySymbols {
    loader: DwarfLoader,
    lines: LineInfoProvider,
    table: SymbolTable,
    frame_types: FrameTypeIndex,
    load_bias: u64,
}

impl BinarySymbols {
    /// 実行ファイルを読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let loader = DwarfLoader::load(path)?;
        let lines = LineInfoProvider::new(&loader)?;
        let table = SymbolTable::new(&loader)?;
        let frame_types = FrameTypeIndex::build(loader.dwarf())?;
        debug!(
            "loaded {}: {} function symbols, {} coroutine frame types",
            loader.path().display(),
            table.len(),
            frame_types.len()
        );

        Ok(Self {
            loader,
            lines,
            table,
            frame_types,
            load_bias: 0,
        })
    }

    /// PIEのロードバイアスを設定する
    pub fn with_load_bias(mut self, load_bias: u64) -> Self {
        self.load_bias = load_bias;
        self
    }

    pub fn load_bias(&self) -> u64 {
        self.load_bias
    }

    pub fn loader(&self) -> &DwarfLoader {
        &self.loader
    }

    /// 実行時のアドレスをDWARF上のアドレスに変換する
    fn unbias(&self, pc: u64) -> Option<u64> {
        pc.checked_sub(self.load_bias)
    }

    /// 実行時のPCを含む関数DIE
    pub fn function_scope(&self, pc: u64) -> Result<Option<FunctionScope>> {
        let Some(pc) = self.unbias(pc) else {
            return Ok(None);
        };
        FunctionFinder::new(self.loader.dwarf()).scope_at_pc(pc)
    }

    /// 停止中のスレッドの `__coro_frame` 変数のアドレスを求める
    pub fn coro_frame_address(
        &self,
        registers: &RegisterSnapshot,
        memory: &dyn MemoryReader,
    ) -> Result<u64> {
        let pc = registers.pc();
        let scope = self
            .function_scope(pc)?
            .ok_or_else(|| anyhow::anyhow!("No function at pc 0x{:x}", pc))?;
        let unbiased_pc = pc - self.load_bias;

        let read_register = |reg: u16| registers.dwarf_register(reg);
        VariableLocator::new(self.loader.dwarf())
            .variable_address(
                &scope,
                unbiased_pc,
                CORO_FRAME_VARIABLE,
                &read_register,
                memory,
                self.load_bias,
            )?
            .ok_or_else(|| {
                anyhow::anyhow!("No {} in {}", CORO_FRAME_VARIABLE, scope.display_name())
            })
    }

    /// 実行時のアドレス範囲に直したスコープ
    fn runtime_scope(&self, mut scope: CodeScope) -> CodeScope {
        scope.low_pc = scope.low_pc.wrapping_add(self.load_bias);
        scope.high_pc = scope.high_pc.wrapping_add(self.load_bias);
        scope
    }
}

impl SymbolResolver for BinarySymbols {
    fn scope_at(&self, pc: u64) -> Result<Option<CodeScope>> {
        if let Some(scope) = self.function_scope(pc)? {
            return Ok(Some(self.runtime_scope(CodeScope::from(&scope))));
        }

        // DWARFにない関数はシンボルテーブルで探す
        let Some(unbiased) = self.unbias(pc) else {
            return Ok(None);
        };
        let scope = self.table.reverse_resolve(unbiased).map(CodeScope::from);
        if let Some(scope) = &scope {
            trace!("0x{:x} resolved by symbol table to {:?}", pc, scope.linkage_name);
        }
        Ok(scope.map(|scope| self.runtime_scope(scope)))
    }

    fn line_at(&self, pc: u64) -> Result<Option<LineInfo>> {
        match self.unbias(pc) {
            Some(pc) => self.lines.lookup(pc),
            None => Ok(None),
        }
    }

    fn frame_layout_type(&self, function_key: &str) -> Result<Option<TypeInfo>> {
        let type_ref = self.frame_types.lookup(function_key);
        let Some(type_ref) = type_ref else {
            debug!("no {}.coro_frame_ty in debug info", function_key);
            return Ok(None);
        };

        let type_info = TypeInfoExtractor::new(self.loader.dwarf()).extract(type_ref)?;
        Ok(Some(type_info))
    }

    fn symbolize(&self, addr: u64) -> Option<String> {
        self.table.describe(self.unbias(addr)?)
    }
}
