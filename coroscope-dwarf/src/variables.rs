//! 変数ロケーション評価
//!
//! 関数スコープ内の変数を名前で探し、実行時のアドレスを求めます。

use crate::loader::DwarfReader;
use crate::loc_eval::{approximate_cfa, Loc, LocationEvaluator};
use crate::memory::MemoryReader;
use crate::utils::{attr_string, unit_at, FunctionScope};
use crate::Result;
use tracing::{debug, trace};

/// レジスタ値を取得するコールバック（DWARFレジスタ番号）
pub type RegisterFn<'a> = &'a dyn Fn(u16) -> Result<u64>;

/// 変数ロケーター
pub struct VariableLocator<'a> {
    dwarf: &'a gimli::Dwarf<DwarfReader>,
}

impl<'a> VariableLocator<'a> {
    /// 変数ロケーターを作成する
    pub fn new(dwarf: &'a gimli::Dwarf<DwarfReader>) -> Self {
        Self { dwarf }
    }

    /// 関数スコープ内の変数のアドレスを求める
    ///
    /// `pc` を含むレキシカルブロックも探索し、最も内側の宣言を使います。
    ///
    /// # Arguments
    /// * `scope` - `pc` を含む関数スコープ
    /// * `pc` - DWARF上のアドレス（ロードバイアス適用前）
    /// * `name` - 変数名
    /// * `registers` - 実行時のレジスタ値
    /// * `memory` - ターゲットメモリ
    /// * `load_bias` - PIEのロードバイアス
    ///
    /// # Returns
    /// 変数が見つからない場合はNone。変数がメモリ上にない場合はエラー
    pub fn variable_address(
        &self,
        scope: &FunctionScope,
        pc: u64,
        name: &str,
        registers: RegisterFn<'_>,
        memory: &dyn MemoryReader,
        load_bias: u64,
    ) -> Result<Option<u64>> {
        let unit = unit_at(self.dwarf, scope.unit)?;
        let function = unit.entry(scope.entry)?;

        let Some(variable_offset) = self.find_variable(&unit, scope.entry, pc, name)? else {
            debug!("variable {} not found in {}", name, scope.display_name());
            return Ok(None);
        };
        let variable = unit.entry(variable_offset)?;

        let Some(location) = self.location_expression(&unit, &variable, pc)? else {
            return Err(anyhow::anyhow!("{} has no location at pc 0x{:x}", name, pc));
        };

        let cfa = approximate_cfa(registers).ok();
        let frame_base = match function.attr_value(gimli::DW_AT_frame_base)? {
            Some(gimli::AttributeValue::Exprloc(expr)) => {
                let mut evaluator = LocationEvaluator::new(expr, unit.encoding());
                if let Some(cfa) = cfa {
                    evaluator = evaluator.with_cfa(cfa);
                }
                let loc = evaluator.evaluate(registers, |addr, size| memory.read(addr, size))?;
                match loc {
                    Loc::Reg { reg } => Some(registers(reg)?),
                    Loc::Addr { addr, .. } => Some(addr),
                    Loc::Value(value) => Some(value),
                    other => return Err(anyhow::anyhow!("Unsupported frame base: {:?}", other)),
                }
            }
            _ => None,
        };
        trace!("frame base of {}: {:?}", scope.display_name(), frame_base);

        let mut evaluator = LocationEvaluator::new(location, unit.encoding()).with_load_bias(load_bias);
        if let Some(frame_base) = frame_base {
            evaluator = evaluator.with_frame_base(frame_base);
        }
        if let Some(cfa) = cfa {
            evaluator = evaluator.with_cfa(cfa);
        }

        match evaluator.evaluate(registers, |addr, size| memory.read(addr, size))? {
            Loc::Addr { addr, .. } => Ok(Some(addr)),
            other => Err(anyhow::anyhow!("{} is not in memory: {:?}", name, other)),
        }
    }

    /// 関数DIE以下から変数DIEを探す
    fn find_variable(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        function: gimli::UnitOffset<usize>,
        pc: u64,
        name: &str,
    ) -> Result<Option<gimli::UnitOffset<usize>>> {
        let mut tree = unit.entries_tree(Some(function))?;
        let root = tree.root()?;
        let mut found = None;
        self.search_children(unit, root, pc, name, &mut found)?;
        Ok(found)
    }

    fn search_children(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        node: gimli::EntriesTreeNode<DwarfReader>,
        pc: u64,
        name: &str,
        found: &mut Option<gimli::UnitOffset<usize>>,
    ) -> Result<()> {
        let mut children = node.children();
        while let Some(child) = children.next()? {
            let tag = child.entry().tag();
            match tag {
                gimli::DW_TAG_variable | gimli::DW_TAG_formal_parameter => {
                    let entry = child.entry();
                    if attr_string(self.dwarf, unit, entry, gimli::DW_AT_name)?.as_deref() == Some(name) {
                        *found = Some(entry.offset());
                    }
                }
                gimli::DW_TAG_lexical_block => {
                    if self.block_covers(unit, child.entry(), pc)? {
                        self.search_children(unit, child, pc, name, found)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// レキシカルブロックがPCを含むか（範囲のないブロックは常に含む）
    fn block_covers(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        entry: &gimli::DebuggingInformationEntry<DwarfReader>,
        pc: u64,
    ) -> Result<bool> {
        let mut ranges = self.dwarf.die_ranges(unit, entry)?;
        let mut any = false;
        while let Some(range) = ranges.next()? {
            any = true;
            if pc >= range.begin && pc < range.end {
                return Ok(true);
            }
        }
        Ok(!any)
    }

    /// 変数のロケーション式を取得する（ロケーションリストはPCで選択する）
    fn location_expression(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        entry: &gimli::DebuggingInformationEntry<DwarfReader>,
        pc: u64,
    ) -> Result<Option<gimli::Expression<DwarfReader>>> {
        let Some(attr) = entry.attr_value(gimli::DW_AT_location)? else {
            return Ok(None);
        };
        if let gimli::AttributeValue::Exprloc(expr) = attr {
            return Ok(Some(expr));
        }

        let Some(mut locations) = self.dwarf.attr_locations(unit, attr)? else {
            return Ok(None);
        };
        while let Some(location) = locations.next()? {
            if pc >= location.range.begin && pc < location.range.end {
                return Ok(Some(location.data));
            }
        }
        Ok(None)
    }
}
