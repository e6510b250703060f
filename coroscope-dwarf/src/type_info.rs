//! DWARF型情報の抽出
//!
//! DWARF DIEから型情報（構造体フィールド、列挙子等）を抽出します。

use crate::frame_types::TypeRef;
use crate::loader::DwarfReader;
use crate::utils::{attr_string, unit_at};
use crate::Result;

/// 構造体・Unionのメンバを展開する最大の深さ
///
/// これより深い構造体は [`TypeInfo::Truncated`] になります。
pub const MAX_TYPE_DEPTH: usize = 20;

/// 展開の打ち切り後に辿るポインタ・typedef・配列の段数
const MAX_REFERENCE_CHAIN: usize = 4;

/// 型情報
#[derive(Debug, Clone, PartialEq)]
pub enum TypeInfo {
    /// 基本型
    Primitive {
        name: String,
        size: u64,
        encoding: Option<gimli::DwAte>,
    },
    /// ポインタ型
    Pointer {
        pointee_type: Option<Box<TypeInfo>>,
        size: u64,
    },
    /// 参照型
    Reference {
        referent_type: Option<Box<TypeInfo>>,
        size: u64,
    },
    /// 配列型
    Array {
        element_type: Option<Box<TypeInfo>>,
        length: Option<u64>,
    },
    /// 構造体型（クラスを含む）
    Struct {
        name: String,
        size: u64,
        fields: Vec<FieldInfo>,
    },
    /// 列挙型
    Enum {
        name: String,
        size: u64,
        enumerators: Vec<Enumerator>,
    },
    /// Union型
    Union {
        name: String,
        size: u64,
        members: Vec<FieldInfo>,
    },
    /// 関数型（関数ポインタの参照先）
    Subroutine,
    /// 展開を打ち切った構造体・Union（メンバは抽出していない）
    Truncated { name: String, size: u64 },
    /// 不明な型
    Unknown,
}

impl TypeInfo {
    /// 型のサイズ（バイト）
    pub fn size(&self) -> u64 {
        match self {
            TypeInfo::Primitive { size, .. }
            | TypeInfo::Pointer { size, .. }
            | TypeInfo::Reference { size, .. }
            | TypeInfo::Struct { size, .. }
            | TypeInfo::Enum { size, .. }
            | TypeInfo::Union { size, .. }
            | TypeInfo::Truncated { size, .. } => *size,
            TypeInfo::Array {
                element_type,
                length,
            } => match (element_type, length) {
                (Some(element), Some(length)) => element.size() * length,
                _ => 0,
            },
            TypeInfo::Subroutine | TypeInfo::Unknown => 0,
        }
    }

    /// 表示用の型名
    pub fn name(&self) -> String {
        match self {
            TypeInfo::Primitive { name, .. }
            | TypeInfo::Struct { name, .. }
            | TypeInfo::Enum { name, .. }
            | TypeInfo::Union { name, .. }
            | TypeInfo::Truncated { name, .. } => name.clone(),
            TypeInfo::Pointer { pointee_type, .. } => match pointee_type.as_deref() {
                Some(TypeInfo::Subroutine) => "void (*)(void)".to_string(),
                Some(pointee) => format!("{} *", pointee.name()),
                None => "void *".to_string(),
            },
            TypeInfo::Reference { referent_type, .. } => match referent_type {
                Some(referent) => format!("{} &", referent.name()),
                None => "void &".to_string(),
            },
            TypeInfo::Array {
                element_type,
                length,
            } => {
                let element = element_type
                    .as_ref()
                    .map(|e| e.name())
                    .unwrap_or_else(|| "<unknown>".to_string());
                match length {
                    Some(length) => format!("{} [{}]", element, length),
                    None => format!("{} []", element),
                }
            }
            TypeInfo::Subroutine => "void (void)".to_string(),
            TypeInfo::Unknown => "<unknown>".to_string(),
        }
    }

    /// 構造体・Unionのメンバ一覧
    pub fn fields(&self) -> &[FieldInfo] {
        match self {
            TypeInfo::Struct { fields, .. } => fields,
            TypeInfo::Union { members, .. } => members,
            _ => &[],
        }
    }

    /// 名前でメンバを検索する
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields().iter().find(|f| f.name == name)
    }
}

/// フィールド情報
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// フィールド名（基底クラスは `<Base>` の形）
    pub name: String,
    /// オフセット（バイト）
    pub offset: u64,
    /// サイズ（バイト）
    pub size: u64,
    /// 型情報
    pub type_info: Option<Box<TypeInfo>>,
    /// 基底クラスの部分オブジェクトかどうか
    pub is_base: bool,
}

/// 列挙子
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumerator {
    pub name: String,
    pub value: i64,
}

/// 型情報抽出器
pub struct TypeInfoExtractor<'a> {
    dwarf: &'a gimli::Dwarf<DwarfReader>,
}

impl<'a> TypeInfoExtractor<'a> {
    /// 新しい型情報抽出器を作成する
    pub fn new(dwarf: &'a gimli::Dwarf<DwarfReader>) -> Self {
        Self { dwarf }
    }

    /// 型参照から型情報を抽出する
    pub fn extract(&self, type_ref: TypeRef) -> Result<TypeInfo> {
        let unit = unit_at(self.dwarf, type_ref.unit)?;
        self.extract_type_info(&unit, type_ref.entry)
    }

    /// 型DIEから型情報を抽出する
    pub fn extract_type_info(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        type_offset: gimli::UnitOffset<usize>,
    ) -> Result<TypeInfo> {
        self.extract_at(unit, type_offset, 0)
    }

    fn extract_at(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        type_offset: gimli::UnitOffset<usize>,
        depth: usize,
    ) -> Result<TypeInfo> {
        if depth > MAX_TYPE_DEPTH + MAX_REFERENCE_CHAIN {
            return Ok(TypeInfo::Unknown);
        }
        let entry = unit.entry(type_offset)?;
        self.extract_from_entry(unit, &entry, depth)
    }

    /// DIEエントリから型情報を抽出する
    fn extract_from_entry(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        entry: &gimli::DebuggingInformationEntry<DwarfReader>,
        depth: usize,
    ) -> Result<TypeInfo> {
        match entry.tag() {
            gimli::DW_TAG_base_type => self.extract_base_type(unit, entry),
            gimli::DW_TAG_pointer_type | gimli::DW_TAG_ptr_to_member_type => {
                let size = self.pointer_size(unit, entry)?;
                let pointee_type = self.extract_referenced(unit, entry, pointee_depth(depth))?;
                Ok(TypeInfo::Pointer { pointee_type, size })
            }
            gimli::DW_TAG_reference_type | gimli::DW_TAG_rvalue_reference_type => {
                let size = self.pointer_size(unit, entry)?;
                let referent_type = self.extract_referenced(unit, entry, pointee_depth(depth))?;
                Ok(TypeInfo::Reference {
                    referent_type,
                    size,
                })
            }
            gimli::DW_TAG_array_type => self.extract_array_type(unit, entry, depth),
            gimli::DW_TAG_structure_type
            | gimli::DW_TAG_class_type
            | gimli::DW_TAG_union_type
                if depth >= MAX_TYPE_DEPTH =>
            {
                let name = self.name_or(unit, entry, "<anonymous>")?;
                let size = byte_size(entry)?.unwrap_or(0);
                Ok(TypeInfo::Truncated { name, size })
            }
            gimli::DW_TAG_structure_type | gimli::DW_TAG_class_type => {
                let name = self.name_or(unit, entry, "<anonymous>")?;
                let size = byte_size(entry)?.unwrap_or(0);
                let fields = self.extract_fields(unit, entry, depth)?;
                Ok(TypeInfo::Struct { name, size, fields })
            }
            gimli::DW_TAG_union_type => {
                let name = self.name_or(unit, entry, "<anonymous>")?;
                let size = byte_size(entry)?.unwrap_or(0);
                let members = self.extract_fields(unit, entry, depth)?;
                Ok(TypeInfo::Union {
                    name,
                    size,
                    members,
                })
            }
            gimli::DW_TAG_enumeration_type => self.extract_enum_type(unit, entry),
            gimli::DW_TAG_subroutine_type => Ok(TypeInfo::Subroutine),
            // 修飾子とtypedefは透過的に扱う
            gimli::DW_TAG_typedef
            | gimli::DW_TAG_const_type
            | gimli::DW_TAG_volatile_type
            | gimli::DW_TAG_restrict_type
            | gimli::DW_TAG_atomic_type => match type_attr(entry)? {
                Some(offset) => self.extract_at(unit, offset, depth),
                None => Ok(void_type()),
            },
            gimli::DW_TAG_unspecified_type => Ok(void_type()),
            _ => Ok(TypeInfo::Unknown),
        }
    }

    /// 基本型を抽出する
    fn extract_base_type(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        entry: &gimli::DebuggingInformationEntry<DwarfReader>,
    ) -> Result<TypeInfo> {
        let name = self.name_or(unit, entry, "<unknown>")?;
        let size = byte_size(entry)?.unwrap_or(0);
        let encoding = match entry.attr_value(gimli::DW_AT_encoding)? {
            Some(gimli::AttributeValue::Encoding(encoding)) => Some(encoding),
            _ => None,
        };

        Ok(TypeInfo::Primitive {
            name,
            size,
            encoding,
        })
    }

    /// DW_AT_typeの参照先を抽出する（voidの場合はNone）
    fn extract_referenced(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        entry: &gimli::DebuggingInformationEntry<DwarfReader>,
        depth: usize,
    ) -> Result<Option<Box<TypeInfo>>> {
        match type_attr(entry)? {
            Some(offset) => Ok(Some(Box::new(self.extract_at(unit, offset, depth)?))),
            None => Ok(None),
        }
    }

    /// 配列型を抽出する
    fn extract_array_type(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        entry: &gimli::DebuggingInformationEntry<DwarfReader>,
        depth: usize,
    ) -> Result<TypeInfo> {
        let element_type = self.extract_referenced(unit, entry, depth + 1)?;

        // 多次元配列は要素数の積として平坦に扱う
        let mut length: Option<u64> = None;
        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let subrange = child.entry();
            if subrange.tag() != gimli::DW_TAG_subrange_type {
                continue;
            }
            let count = match subrange.attr_value(gimli::DW_AT_count)? {
                Some(count) => count.udata_value(),
                None => subrange
                    .attr_value(gimli::DW_AT_upper_bound)?
                    .and_then(|upper| upper.udata_value())
                    .map(|upper| upper + 1),
            };
            length = match (length, count) {
                (None, count) => count,
                (Some(total), Some(count)) => Some(total * count),
                (Some(_), None) => None,
            };
        }

        Ok(TypeInfo::Array {
            element_type,
            length,
        })
    }

    /// 列挙型を抽出する
    fn extract_enum_type(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        entry: &gimli::DebuggingInformationEntry<DwarfReader>,
    ) -> Result<TypeInfo> {
        let name = self.name_or(unit, entry, "<anonymous>")?;
        let size = byte_size(entry)?.unwrap_or(0);

        let mut enumerators = Vec::new();
        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let enumerator = child.entry();
            if enumerator.tag() != gimli::DW_TAG_enumerator {
                continue;
            }
            let Some(name) = attr_string(self.dwarf, unit, enumerator, gimli::DW_AT_name)? else {
                continue;
            };
            let value = match enumerator.attr_value(gimli::DW_AT_const_value)? {
                Some(gimli::AttributeValue::Sdata(v)) => v,
                Some(other) => other.udata_value().map(|v| v as i64).unwrap_or(0),
                None => 0,
            };
            enumerators.push(Enumerator { name, value });
        }

        Ok(TypeInfo::Enum {
            name,
            size,
            enumerators,
        })
    }

    /// メンバと基底クラスを抽出する
    fn extract_fields(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        parent_entry: &gimli::DebuggingInformationEntry<DwarfReader>,
        depth: usize,
    ) -> Result<Vec<FieldInfo>> {
        let mut fields = Vec::new();
        let mut tree = unit.entries_tree(Some(parent_entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let entry = child.entry();
            let is_base = match entry.tag() {
                gimli::DW_TAG_member => false,
                gimli::DW_TAG_inheritance => true,
                _ => continue,
            };
            // staticメンバはオブジェクト内に存在しない
            if !is_base && entry.attr_value(gimli::DW_AT_data_member_location)?.is_none() {
                if let Some(gimli::AttributeValue::Flag(true)) =
                    entry.attr_value(gimli::DW_AT_external)?
                {
                    continue;
                }
            }
            fields.push(self.extract_field(unit, entry, depth, is_base)?);
        }

        Ok(fields)
    }

    /// フィールド情報を抽出する
    fn extract_field(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        entry: &gimli::DebuggingInformationEntry<DwarfReader>,
        depth: usize,
        is_base: bool,
    ) -> Result<FieldInfo> {
        let offset = entry
            .attr_value(gimli::DW_AT_data_member_location)?
            .and_then(|attr| attr.udata_value())
            .unwrap_or(0);
        let type_info = self.extract_referenced(unit, entry, depth + 1)?;
        let size = type_info.as_ref().map(|t| t.size()).unwrap_or(0);

        let name = if is_base {
            let base = type_info.as_ref().map(|t| t.name()).unwrap_or_default();
            format!("<{}>", base)
        } else {
            self.name_or(unit, entry, "<unnamed>")?
        };

        Ok(FieldInfo {
            name,
            offset,
            size,
            type_info,
            is_base,
        })
    }

    fn name_or(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        entry: &gimli::DebuggingInformationEntry<DwarfReader>,
        fallback: &str,
    ) -> Result<String> {
        Ok(attr_string(self.dwarf, unit, entry, gimli::DW_AT_name)?
            .unwrap_or_else(|| fallback.to_string()))
    }

    /// ポインタのサイズ（指定がなければユニットのアドレスサイズ）
    fn pointer_size(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        entry: &gimli::DebuggingInformationEntry<DwarfReader>,
    ) -> Result<u64> {
        Ok(byte_size(entry)?.unwrap_or(unit.encoding().address_size as u64))
    }
}

/// ポインタの参照先を抽出する深さ
///
/// 参照先の構造体はメンバを展開しない。
fn pointee_depth(depth: usize) -> usize {
    (depth + 1).max(MAX_TYPE_DEPTH)
}

fn void_type() -> TypeInfo {
    TypeInfo::Primitive {
        name: "void".to_string(),
        size: 0,
        encoding: None,
    }
}

fn byte_size(entry: &gimli::DebuggingInformationEntry<DwarfReader>) -> Result<Option<u64>> {
    Ok(entry
        .attr_value(gimli::DW_AT_byte_size)?
        .and_then(|attr| attr.udata_value()))
}

fn type_attr(
    entry: &gimli::DebuggingInformationEntry<DwarfReader>,
) -> Result<Option<gimli::UnitOffset<usize>>> {
    match entry.attr_value(gimli::DW_AT_type)? {
        Some(gimli::AttributeValue::UnitRef(offset)) => Ok(Some(offset)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primitive(name: &str, size: u64) -> TypeInfo {
        TypeInfo::Primitive {
            name: name.to_string(),
            size,
            encoding: None,
        }
    }

    #[test]
    fn test_names_of_derived_types() {
        let int = primitive("int", 4);
        let pointer = TypeInfo::Pointer {
            pointee_type: Some(Box::new(int.clone())),
            size: 8,
        };
        assert_eq!(pointer.name(), "int *");

        let fn_pointer = TypeInfo::Pointer {
            pointee_type: Some(Box::new(TypeInfo::Subroutine)),
            size: 8,
        };
        assert_eq!(fn_pointer.name(), "void (*)(void)");

        let array = TypeInfo::Array {
            element_type: Some(Box::new(int)),
            length: Some(3),
        };
        assert_eq!(array.name(), "int [3]");
        assert_eq!(array.size(), 12);
    }

    #[test]
    fn test_field_lookup() {
        let frame = TypeInfo::Struct {
            name: "_Z4taskv.coro_frame_ty".to_string(),
            size: 24,
            fields: vec![
                FieldInfo {
                    name: "__resume_fn".to_string(),
                    offset: 0,
                    size: 8,
                    type_info: None,
                    is_base: false,
                },
                FieldInfo {
                    name: "__promise".to_string(),
                    offset: 16,
                    size: 8,
                    type_info: Some(Box::new(primitive("long", 8))),
                    is_base: false,
                },
            ],
        };

        assert_eq!(frame.field("__promise").map(|f| f.offset), Some(16));
        assert!(frame.field("__destroy_fn").is_none());
        assert!(primitive("int", 4).fields().is_empty());
    }

    #[test]
    fn test_pointee_depth_stops_expansion() {
        assert_eq!(pointee_depth(0), MAX_TYPE_DEPTH);
        assert_eq!(pointee_depth(MAX_TYPE_DEPTH), MAX_TYPE_DEPTH + 1);
    }

    #[test]
    fn test_truncated_keeps_name_and_size() {
        let truncated = TypeInfo::Truncated {
            name: "std::_Rb_tree_node_base".to_string(),
            size: 32,
        };
        assert_eq!(truncated.name(), "std::_Rb_tree_node_base");
        assert_eq!(truncated.size(), 32);
        assert!(truncated.fields().is_empty());
    }
}
