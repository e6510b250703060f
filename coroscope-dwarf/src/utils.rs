//! DWARF解析のユーティリティ関数

use crate::demangle::display_name;
use crate::loader::DwarfReader;
use crate::Result;
use tracing::trace;

/// specification/abstract_originを辿る最大回数
const MAX_ORIGIN_HOPS: usize = 4;

/// PCを含む関数のスコープ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionScope {
    /// ソース上の関数名（DW_AT_name）
    pub name: Option<String>,
    /// リンケージ名（DW_AT_linkage_name）
    pub linkage_name: Option<String>,
    /// PCを含むアドレス範囲の開始
    pub low_pc: u64,
    /// PCを含むアドレス範囲の終端（含まない）
    pub high_pc: u64,
    /// 関数DIEが属するユニットの.debug_infoオフセット
    pub unit: gimli::DebugInfoOffset<usize>,
    /// 関数DIEのユニット内オフセット
    pub entry: gimli::UnitOffset<usize>,
}

impl FunctionScope {
    /// 現在の表示モードに従った関数名
    ///
    /// リンケージ名があればそれを表示モードに従って整形し、
    /// なければソース上の名前をそのまま使います。
    pub fn display_name(&self) -> String {
        match (&self.linkage_name, &self.name) {
            (Some(linkage), _) => display_name(linkage),
            (None, Some(name)) => name.clone(),
            (None, None) => "??".to_string(),
        }
    }

    pub fn contains(&self, pc: u64) -> bool {
        pc >= self.low_pc && pc < self.high_pc
    }
}

/// 関数DIE検索ユーティリティ
pub struct FunctionFinder<'a> {
    dwarf: &'a gimli::Dwarf<DwarfReader>,
}

impl<'a> FunctionFinder<'a> {
    pub fn new(dwarf: &'a gimli::Dwarf<DwarfReader>) -> Self {
        Self { dwarf }
    }

    /// PCを含む関数のスコープを検索
    ///
    /// # Arguments
    /// * `pc` - DWARF上のアドレス（ロードバイアス適用前）
    ///
    /// # Returns
    /// 関数スコープ、見つからない場合はNone
    pub fn scope_at_pc(&self, pc: u64) -> Result<Option<FunctionScope>> {
        let mut units = self.dwarf.units();
        while let Some(header) = units.next()? {
            let unit = self.dwarf.unit(header)?;
            if let Some(scope) = self.scope_in_unit(&unit, pc)? {
                trace!("pc 0x{:x} is in {:?}", pc, scope.linkage_name.as_ref().or(scope.name.as_ref()));
                return Ok(Some(scope));
            }
        }
        Ok(None)
    }

    /// ユニット内でPCを含む関数DIEを探す
    fn scope_in_unit(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        pc: u64,
    ) -> Result<Option<FunctionScope>> {
        let Some(unit_offset) = unit.header.offset().as_debug_info_offset() else {
            return Ok(None);
        };

        // 見つかった関数の子孫にPCを含む関数があればそちらを優先する
        let mut depth: isize = 0;
        let mut found: Option<(isize, FunctionScope)> = None;
        let mut entries = unit.entries();
        while let Some((delta, entry)) = entries.next_dfs()? {
            depth += delta;
            if matches!(&found, Some((found_depth, _)) if depth <= *found_depth) {
                break;
            }
            if entry.tag() != gimli::DW_TAG_subprogram {
                continue;
            }

            let Some((low_pc, high_pc)) = self.range_containing(unit, entry, pc)? else {
                continue;
            };

            let (name, linkage_name) = self.function_names(unit, entry)?;
            found = Some((
                depth,
                FunctionScope {
                    name,
                    linkage_name,
                    low_pc,
                    high_pc,
                    unit: unit_offset,
                    entry: entry.offset(),
                },
            ));
        }
        Ok(found.map(|(_, scope)| scope))
    }

    /// DIEのアドレス範囲のうちPCを含むものを返す
    fn range_containing(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        entry: &gimli::DebuggingInformationEntry<DwarfReader>,
        pc: u64,
    ) -> Result<Option<(u64, u64)>> {
        let mut ranges = self.dwarf.die_ranges(unit, entry)?;
        while let Some(range) = ranges.next()? {
            if pc >= range.begin && pc < range.end {
                return Ok(Some((range.begin, range.end)));
            }
        }
        Ok(None)
    }

    /// 関数名とリンケージ名を取得する
    ///
    /// 定義DIEに名前がない場合は宣言DIEや抽象インスタンスを辿ります。
    fn function_names(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        entry: &gimli::DebuggingInformationEntry<DwarfReader>,
    ) -> Result<(Option<String>, Option<String>)> {
        let mut name = attr_string(self.dwarf, unit, entry, gimli::DW_AT_name)?;
        let mut linkage_name = linkage_name_of(self.dwarf, unit, entry)?;
        let mut origin = origin_of(entry)?;

        for _ in 0..MAX_ORIGIN_HOPS {
            if name.is_some() && linkage_name.is_some() {
                break;
            }
            let Some(offset) = origin else { break };
            let origin_entry = unit.entry(offset)?;
            if name.is_none() {
                name = attr_string(self.dwarf, unit, &origin_entry, gimli::DW_AT_name)?;
            }
            if linkage_name.is_none() {
                linkage_name = linkage_name_of(self.dwarf, unit, &origin_entry)?;
            }
            origin = origin_of(&origin_entry)?;
        }

        Ok((name, linkage_name))
    }
}

/// .debug_infoオフセットからユニットを読み込む
pub fn unit_at(
    dwarf: &gimli::Dwarf<DwarfReader>,
    offset: gimli::DebugInfoOffset<usize>,
) -> Result<gimli::Unit<DwarfReader>> {
    let header = dwarf.debug_info.header_from_offset(offset)?;
    Ok(dwarf.unit(header)?)
}

/// 文字列属性を取得する（.debug_str等への参照も解決する）
pub fn attr_string(
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    entry: &gimli::DebuggingInformationEntry<DwarfReader>,
    name: gimli::DwAt,
) -> Result<Option<String>> {
    match entry.attr_value(name)? {
        Some(value) => {
            let s = dwarf.attr_string(unit, value)?;
            Ok(Some(s.to_string_lossy().into_owned()))
        }
        None => Ok(None),
    }
}

/// リンケージ名を取得する（古いコンパイラのDW_AT_MIPS_linkage_nameにも対応）
fn linkage_name_of(
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    entry: &gimli::DebuggingInformationEntry<DwarfReader>,
) -> Result<Option<String>> {
    if let Some(name) = attr_string(dwarf, unit, entry, gimli::DW_AT_linkage_name)? {
        return Ok(Some(name));
    }
    attr_string(dwarf, unit, entry, gimli::DW_AT_MIPS_linkage_name)
}

/// 宣言DIEまたは抽象インスタンスへの参照
fn origin_of(
    entry: &gimli::DebuggingInformationEntry<DwarfReader>,
) -> Result<Option<gimli::UnitOffset<usize>>> {
    for attr in [gimli::DW_AT_specification, gimli::DW_AT_abstract_origin] {
        if let Some(gimli::AttributeValue::UnitRef(offset)) = entry.attr_value(attr)? {
            return Ok(Some(offset));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demangle::{DemangleStyle, DemangleStyleGuard};

    fn scope(name: Option<&str>, linkage_name: Option<&str>) -> FunctionScope {
        FunctionScope {
            name: name.map(str::to_string),
            linkage_name: linkage_name.map(str::to_string),
            low_pc: 0x1000,
            high_pc: 0x1100,
            unit: gimli::DebugInfoOffset(0),
            entry: gimli::UnitOffset(0),
        }
    }

    #[test]
    fn test_display_name_prefers_linkage_name() {
        let scope = scope(Some("foo"), Some("_Z3foov"));
        assert_eq!(scope.display_name(), "foo()");

        let _guard = DemangleStyleGuard::set(DemangleStyle::None);
        assert_eq!(scope.display_name(), "_Z3foov");
    }

    /// outer [0x1000, 0x1100) の中に inner [0x1040, 0x1060) を持つDWARF
    fn nested_subprograms() -> gimli::Dwarf<DwarfReader> {
        use gimli::write::{Address, AttributeValue, DwarfUnit, EndianVec, Sections};

        let encoding = gimli::Encoding {
            format: gimli::Format::Dwarf32,
            version: 4,
            address_size: 8,
        };
        let mut dwarf = DwarfUnit::new(encoding);
        let root = dwarf.unit.root();
        let mut subprogram = |parent, name: &str, low: u64, len: u64| {
            let id = dwarf.unit.add(parent, gimli::DW_TAG_subprogram);
            let entry = dwarf.unit.get_mut(id);
            entry.set(gimli::DW_AT_name, AttributeValue::String(name.as_bytes().to_vec()));
            entry.set(gimli::DW_AT_low_pc, AttributeValue::Address(Address::Constant(low)));
            entry.set(gimli::DW_AT_high_pc, AttributeValue::Udata(len));
            id
        };
        let outer = subprogram(root, "outer", 0x1000, 0x100);
        subprogram(outer, "inner", 0x1040, 0x20);
        subprogram(root, "after", 0x2000, 0x10);

        let mut sections = Sections::new(EndianVec::new(gimli::LittleEndian));
        dwarf.write(&mut sections).unwrap();

        let mut data = std::collections::HashMap::new();
        sections
            .for_each(|id, section| -> std::result::Result<(), gimli::Error> {
                let bytes: &'static [u8] = Box::leak(section.slice().to_vec().into_boxed_slice());
                data.insert(id, bytes);
                Ok(())
            })
            .unwrap();
        gimli::Dwarf::load(|id| -> std::result::Result<DwarfReader, gimli::Error> {
            let bytes = data.get(&id).copied().unwrap_or(&[]);
            Ok(gimli::EndianSlice::new(bytes, gimli::RunTimeEndian::Little))
        })
        .unwrap()
    }

    #[test]
    fn test_scope_at_pc_prefers_innermost_subprogram() {
        let dwarf = nested_subprograms();
        let finder = FunctionFinder::new(&dwarf);
        let name_at = |pc| finder.scope_at_pc(pc).unwrap().and_then(|scope| scope.name);

        assert_eq!(name_at(0x1050).as_deref(), Some("inner"));
        assert_eq!(name_at(0x1010).as_deref(), Some("outer"));
        assert_eq!(name_at(0x1080).as_deref(), Some("outer"));
        assert_eq!(name_at(0x2008).as_deref(), Some("after"));
        assert_eq!(name_at(0x3000), None);

        let inner = finder.scope_at_pc(0x1050).unwrap().unwrap();
        assert_eq!((inner.low_pc, inner.high_pc), (0x1040, 0x1060));
    }

    #[test]
    fn test_display_name_without_linkage_name() {
        assert_eq!(scope(Some("main"), None).display_name(), "main");
        assert_eq!(scope(None, None).display_name(), "??");
    }

    #[test]
    fn test_contains_is_half_open() {
        let scope = scope(Some("main"), None);
        assert!(scope.contains(0x1000));
        assert!(scope.contains(0x10ff));
        assert!(!scope.contains(0x1100));
    }
}
