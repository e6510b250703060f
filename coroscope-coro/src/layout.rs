//! コルーチンフレームのレイアウト戦略
//!
//! コンパイラ（ABI）ごとのフレーム配置の違いをここに閉じ込めます。
//! 走査側は [`LayoutStrategy`] だけを通してフレームを扱います。

use crate::frame::CoroutineFrame;
use crate::Result;
use coroscope_dwarf::{FieldInfo, MemoryReader, TypeInfo};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// promise の先頭メンバを辿る最大の深さ
const MAX_PROMISE_NESTING: usize = 16;

/// コルーチンのABI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CoroAbi {
    /// Clang/LLVM の `.coro_frame_ty` 配置
    #[default]
    Clang,
    /// GCC の `_Coro_*` 配置
    Gcc,
    /// promise の先頭メンバが親の promise を指す配置
    PromiseLink,
}

impl CoroAbi {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoroAbi::Clang => "clang",
            CoroAbi::Gcc => "gcc",
            CoroAbi::PromiseLink => "promise-link",
        }
    }
}

impl fmt::Display for CoroAbi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 未知のABI名
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown coroutine ABI `{0}` (expected clang, gcc or promise-link)")]
pub struct UnknownAbi(pub String);

impl FromStr for CoroAbi {
    type Err = UnknownAbi;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clang" | "llvm" => Ok(CoroAbi::Clang),
            "gcc" => Ok(CoroAbi::Gcc),
            "promise-link" | "promise_link" => Ok(CoroAbi::PromiseLink),
            _ => Err(UnknownAbi(s.to_string())),
        }
    }
}

/// フレーム型の先頭3フィールドの名前
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldNames {
    pub resume: &'static str,
    pub destroy: &'static str,
    pub promise: &'static str,
}

impl FieldNames {
    pub const CLANG: FieldNames = FieldNames {
        resume: "__resume_fn",
        destroy: "__destroy_fn",
        promise: "__promise",
    };

    pub const GCC: FieldNames = FieldNames {
        resume: "_Coro_resume_fn",
        destroy: "_Coro_destroy_fn",
        promise: "_Coro_promise",
    };
}

/// フレーム型がレイアウトの前提を満たさない理由
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutViolation {
    #[error("frame type has no `{field}` field")]
    MissingField { field: &'static str },

    #[error("`{field}` is at offset {actual}, expected {expected}")]
    MisplacedField {
        field: String,
        expected: u64,
        actual: u64,
    },

    #[error("promise type `{promise}` has no member at offset 0")]
    NoLeadingMember { promise: String },

    #[error("first promise member `{member}` is {actual} bytes wide, expected a {expected}-byte pointer")]
    ContinuationWidth {
        member: String,
        actual: u64,
        expected: u64,
    },
}

/// フレームレイアウト戦略
pub trait LayoutStrategy {
    fn abi(&self) -> CoroAbi;

    /// `frame_address` にあるフレームのビューを作る
    fn frame_at(&self, frame_address: u64, pointer_width: u64) -> CoroutineFrame {
        CoroutineFrame::new(frame_address, pointer_width)
    }

    /// 次に辿るフレームのアドレス（0 で終端）
    fn next_frame_address(&self, frame: &CoroutineFrame, memory: &dyn MemoryReader) -> Result<u64>;

    /// フレーム型がこの戦略の前提を満たしているか確認する
    ///
    /// resume/destroy/promise が 0/W/2W にあり、promise の先頭メンバが
    /// ちょうどポインタ幅であることを確認します。
    fn verify(
        &self,
        frame_type: &TypeInfo,
        pointer_width: u64,
    ) -> std::result::Result<(), LayoutViolation>;
}

/// ABIに対応する戦略を取得する
pub fn strategy_for(abi: CoroAbi) -> Box<dyn LayoutStrategy> {
    match abi {
        CoroAbi::Clang => Box::new(FixedOffsetLayout::clang()),
        CoroAbi::Gcc => Box::new(FixedOffsetLayout::gcc()),
        CoroAbi::PromiseLink => Box::new(PromiseLinkLayout),
    }
}

/// 継続ポインタが次のフレームを直接指す配置（Clang, GCC）
#[derive(Debug, Clone, Copy)]
pub struct FixedOffsetLayout {
    abi: CoroAbi,
    fields: FieldNames,
}

impl FixedOffsetLayout {
    pub fn clang() -> Self {
        Self {
            abi: CoroAbi::Clang,
            fields: FieldNames::CLANG,
        }
    }

    pub fn gcc() -> Self {
        Self {
            abi: CoroAbi::Gcc,
            fields: FieldNames::GCC,
        }
    }
}

impl LayoutStrategy for FixedOffsetLayout {
    fn abi(&self) -> CoroAbi {
        self.abi
    }

    fn next_frame_address(&self, frame: &CoroutineFrame, memory: &dyn MemoryReader) -> Result<u64> {
        frame.next_continuation_address(memory)
    }

    fn verify(
        &self,
        frame_type: &TypeInfo,
        pointer_width: u64,
    ) -> std::result::Result<(), LayoutViolation> {
        verify_preamble(frame_type, &[self.fields], pointer_width)
    }
}

/// 継続ポインタが親の promise を指す配置
///
/// 親フレームのアドレスは `value - 2W` です。
#[derive(Debug, Clone, Copy)]
pub struct PromiseLinkLayout;

impl LayoutStrategy for PromiseLinkLayout {
    fn abi(&self) -> CoroAbi {
        CoroAbi::PromiseLink
    }

    fn next_frame_address(&self, frame: &CoroutineFrame, memory: &dyn MemoryReader) -> Result<u64> {
        let parent_promise = frame.next_continuation_address(memory)?;
        if parent_promise == 0 {
            return Ok(0);
        }
        let promise_offset = frame.pointer_width() * 2;
        parent_promise.checked_sub(promise_offset).ok_or_else(|| {
            anyhow::anyhow!(
                "Continuation 0x{:x} of frame 0x{:x} cannot be a promise address",
                parent_promise,
                frame.frame_addr()
            )
        })
    }

    fn verify(
        &self,
        frame_type: &TypeInfo,
        pointer_width: u64,
    ) -> std::result::Result<(), LayoutViolation> {
        verify_preamble(frame_type, &[FieldNames::CLANG, FieldNames::GCC], pointer_width)
    }
}

/// 候補の名前セットのうち、frame_type に resume フィールドがある最初のものを使って検査する
fn verify_preamble(
    frame_type: &TypeInfo,
    candidates: &[FieldNames],
    pointer_width: u64,
) -> std::result::Result<(), LayoutViolation> {
    let names = candidates
        .iter()
        .find(|names| frame_type.field(names.resume).is_some())
        .or_else(|| candidates.first())
        .copied()
        .unwrap_or(FieldNames::CLANG);

    expect_field(frame_type, names.resume, 0)?;
    expect_field(frame_type, names.destroy, pointer_width)?;
    let promise = expect_field(frame_type, names.promise, pointer_width * 2)?;

    verify_continuation_slot(promise, pointer_width)
}

fn expect_field<'a>(
    frame_type: &'a TypeInfo,
    name: &'static str,
    expected: u64,
) -> std::result::Result<&'a FieldInfo, LayoutViolation> {
    let field = frame_type
        .field(name)
        .ok_or(LayoutViolation::MissingField { field: name })?;
    if field.offset != expected {
        return Err(LayoutViolation::MisplacedField {
            field: name.to_string(),
            expected,
            actual: field.offset,
        });
    }
    Ok(field)
}

/// promise の offset 0 にあるスカラーがポインタ幅であることを確認する
///
/// 構造体・Union・基底クラスは先頭メンバへ降りていきます。
fn verify_continuation_slot(
    promise: &FieldInfo,
    pointer_width: u64,
) -> std::result::Result<(), LayoutViolation> {
    let mut member = promise;
    for _ in 0..MAX_PROMISE_NESTING {
        let Some(member_type) = member.type_info.as_deref() else {
            debug!("type of `{}` is unknown, continuation slot not checked", member.name);
            return Ok(());
        };

        match member_type {
            TypeInfo::Struct { name, fields, .. } | TypeInfo::Union { name, members: fields, .. } => {
                match fields.iter().find(|f| f.offset == 0) {
                    Some(first) => member = first,
                    None => {
                        return Err(LayoutViolation::NoLeadingMember {
                            promise: name.clone(),
                        })
                    }
                }
            }
            TypeInfo::Unknown | TypeInfo::Subroutine | TypeInfo::Truncated { .. } => {
                debug!("type of `{}` is unknown, continuation slot not checked", member.name);
                return Ok(());
            }
            scalar => {
                let actual = scalar.size();
                if actual != pointer_width {
                    return Err(LayoutViolation::ContinuationWidth {
                        member: member.name.clone(),
                        actual,
                        expected: pointer_width,
                    });
                }
                return Ok(());
            }
        }
    }
    debug!("promise of depth > {} not checked", MAX_PROMISE_NESTING);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, offset: u64, type_info: TypeInfo) -> FieldInfo {
        FieldInfo {
            name: name.to_string(),
            offset,
            size: type_info.size(),
            type_info: Some(Box::new(type_info)),
            is_base: false,
        }
    }

    fn pointer(size: u64) -> TypeInfo {
        TypeInfo::Pointer {
            pointee_type: Some(Box::new(TypeInfo::Subroutine)),
            size,
        }
    }

    fn int(size: u64) -> TypeInfo {
        TypeInfo::Primitive {
            name: "int".to_string(),
            size,
            encoding: None,
        }
    }

    fn frame_type(names: FieldNames, promise: TypeInfo) -> TypeInfo {
        TypeInfo::Struct {
            name: "_Z4taskv.coro_frame_ty".to_string(),
            size: 40,
            fields: vec![
                field(names.resume, 0, pointer(8)),
                field(names.destroy, 8, pointer(8)),
                field(names.promise, 16, promise),
                field("__coro_index", 32, int(1)),
            ],
        }
    }

    /// `std::coroutine_handle<>` を先頭に持つ promise
    fn handle_promise() -> TypeInfo {
        let handle = TypeInfo::Struct {
            name: "std::coroutine_handle<void>".to_string(),
            size: 8,
            fields: vec![field("_M_fr_ptr", 0, pointer(8))],
        };
        TypeInfo::Struct {
            name: "task::promise_type".to_string(),
            size: 16,
            fields: vec![field("continuation", 0, handle), field("value", 8, int(4))],
        }
    }

    #[test]
    fn test_abi_from_str() {
        assert_eq!("clang".parse::<CoroAbi>().unwrap(), CoroAbi::Clang);
        assert_eq!("GCC".parse::<CoroAbi>().unwrap(), CoroAbi::Gcc);
        assert_eq!("promise-link".parse::<CoroAbi>().unwrap(), CoroAbi::PromiseLink);
        assert_eq!(CoroAbi::PromiseLink.to_string(), "promise-link");
        assert!("msvc".parse::<CoroAbi>().is_err());
        assert_eq!(CoroAbi::default(), CoroAbi::Clang);
    }

    #[test]
    fn test_verify_accepts_handle_continuation() {
        let layout = FixedOffsetLayout::clang();
        assert_eq!(layout.verify(&frame_type(FieldNames::CLANG, handle_promise()), 8), Ok(()));
    }

    #[test]
    fn test_verify_uses_abi_field_names() {
        let gcc_frame = frame_type(FieldNames::GCC, handle_promise());
        assert_eq!(FixedOffsetLayout::gcc().verify(&gcc_frame, 8), Ok(()));
        assert_eq!(
            FixedOffsetLayout::clang().verify(&gcc_frame, 8),
            Err(LayoutViolation::MissingField { field: "__resume_fn" })
        );
        assert_eq!(PromiseLinkLayout.verify(&gcc_frame, 8), Ok(()));
    }

    #[test]
    fn test_verify_rejects_narrow_first_member() {
        let promise = TypeInfo::Struct {
            name: "promise".to_string(),
            size: 8,
            fields: vec![field("state", 0, int(4)), field("next", 4, int(4))],
        };
        let err = FixedOffsetLayout::clang()
            .verify(&frame_type(FieldNames::CLANG, promise), 8)
            .unwrap_err();
        assert_eq!(
            err,
            LayoutViolation::ContinuationWidth {
                member: "state".to_string(),
                actual: 4,
                expected: 8,
            }
        );
    }

    #[test]
    fn test_verify_rejects_misplaced_promise() {
        let mut frame = frame_type(FieldNames::CLANG, handle_promise());
        if let TypeInfo::Struct { fields, .. } = &mut frame {
            fields[2].offset = 24;
        }
        assert_eq!(
            FixedOffsetLayout::clang().verify(&frame, 8),
            Err(LayoutViolation::MisplacedField {
                field: "__promise".to_string(),
                expected: 16,
                actual: 24,
            })
        );
    }

    #[test]
    fn test_verify_empty_promise() {
        let promise = TypeInfo::Struct {
            name: "empty_promise".to_string(),
            size: 1,
            fields: Vec::new(),
        };
        assert_eq!(
            FixedOffsetLayout::clang().verify(&frame_type(FieldNames::CLANG, promise), 8),
            Err(LayoutViolation::NoLeadingMember {
                promise: "empty_promise".to_string(),
            })
        );
    }
}
