//! コルーチンフレーム型の索引
//!
//! clangは各コルーチンのフレームを `<リンケージ名>.coro_frame_ty` という
//! 名前の構造体としてDWARFに出力します。この索引はリンケージ名から
//! フレーム型のDIEを引けるようにします。

use crate::loader::DwarfReader;
use crate::utils::attr_string;
use crate::Result;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// LLVMがコルーチン関数を分割した時に付ける接尾辞
const CLONE_SUFFIXES: [&str; 3] = [".resume", ".destroy", ".cleanup"];

/// 型DIEへの参照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRef {
    /// 型DIEが属するユニットの.debug_infoオフセット
    pub unit: gimli::DebugInfoOffset<usize>,
    /// 型DIEのユニット内オフセット
    pub entry: gimli::UnitOffset<usize>,
}

/// コルーチンフレーム型の索引
#[derive(Debug, Default)]
pub struct FrameTypeIndex {
    types: HashMap<String, TypeRef>,
}

impl FrameTypeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// DWARF全体を走査して索引を構築する
    pub fn build(dwarf: &gimli::Dwarf<DwarfReader>) -> Result<Self> {
        let pattern = frame_type_pattern()?;
        let mut index = Self::new();

        let mut units = dwarf.units();
        while let Some(header) = units.next()? {
            let Some(unit_offset) = header.offset().as_debug_info_offset() else {
                continue;
            };
            let unit = dwarf.unit(header)?;

            let mut entries = unit.entries();
            while let Some((_, entry)) = entries.next_dfs()? {
                if entry.tag() != gimli::DW_TAG_structure_type
                    && entry.tag() != gimli::DW_TAG_class_type
                {
                    continue;
                }
                // 宣言だけのDIEにはメンバ情報がない
                if let Some(gimli::AttributeValue::Flag(true)) =
                    entry.attr_value(gimli::DW_AT_declaration)?
                {
                    continue;
                }

                let Some(name) = attr_string(dwarf, &unit, entry, gimli::DW_AT_name)? else {
                    continue;
                };
                if let Some(captures) = pattern.captures(&name) {
                    index.insert(
                        captures[1].to_string(),
                        TypeRef {
                            unit: unit_offset,
                            entry: entry.offset(),
                        },
                    );
                }
            }
        }

        debug!("indexed {} coroutine frame types", index.len());
        Ok(index)
    }

    /// フレーム型を登録する
    ///
    /// 同じ関数の型が複数のユニットにある場合は最初のものを残します。
    pub fn insert(&mut self, linkage_name: String, type_ref: TypeRef) {
        self.types.entry(linkage_name).or_insert(type_ref);
    }

    /// リンケージ名からフレーム型を検索する
    pub fn get(&self, linkage_name: &str) -> Option<TypeRef> {
        self.types.get(linkage_name).copied()
    }

    /// フレーム型を検索する
    ///
    /// 見つからなければ分割関数の接尾辞（`.resume` 等）を除いた名前で引き直します。
    pub fn lookup(&self, function_key: &str) -> Option<TypeRef> {
        self.get(function_key).or_else(|| {
            CLONE_SUFFIXES
                .iter()
                .find_map(|suffix| function_key.strip_suffix(suffix))
                .and_then(|base| self.get(base))
        })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// フレーム型名のパターン
fn frame_type_pattern() -> Result<Regex> {
    Ok(Regex::new(r"^(.+)\.coro_frame_ty$")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_ref(entry: usize) -> TypeRef {
        TypeRef {
            unit: gimli::DebugInfoOffset(0),
            entry: gimli::UnitOffset(entry),
        }
    }

    #[test]
    fn test_pattern_extracts_linkage_name() {
        let pattern = frame_type_pattern().unwrap();
        let captures = pattern.captures("_Z4taskv.coro_frame_ty").unwrap();
        assert_eq!(&captures[1], "_Z4taskv");
        assert!(pattern.captures("_Z4taskv.coro_frame").is_none());
        assert!(pattern.captures(".coro_frame_ty").is_none());
    }

    #[test]
    fn test_first_registration_wins() {
        let mut index = FrameTypeIndex::new();
        index.insert("_Z4taskv".to_string(), type_ref(0x10));
        index.insert("_Z4taskv".to_string(), type_ref(0x20));

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("_Z4taskv"), Some(type_ref(0x10)));
        assert_eq!(index.get("task()"), None);
    }

    #[test]
    fn test_lookup_falls_back_to_unsplit_name() {
        let mut index = FrameTypeIndex::new();
        index.insert("_Z4taskv".to_string(), type_ref(0x10));
        index.insert("_Z5otherv.resume".to_string(), type_ref(0x20));

        assert_eq!(index.lookup("_Z4taskv"), Some(type_ref(0x10)));
        assert_eq!(index.lookup("_Z4taskv.resume"), Some(type_ref(0x10)));
        assert_eq!(index.lookup("_Z4taskv.destroy"), Some(type_ref(0x10)));
        assert_eq!(index.lookup("_Z4taskv.cleanup"), Some(type_ref(0x10)));
        assert_eq!(index.lookup("_Z5otherv.resume"), Some(type_ref(0x20)));
        assert_eq!(index.lookup("_Z4taskv.cold"), None);
        assert_eq!(index.lookup("_Z4taskv.resume.resume"), None);
        assert_eq!(index.lookup("_Z7missingv.resume"), None);
    }
}
