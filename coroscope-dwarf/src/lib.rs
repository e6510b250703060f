//! Coroscope DWARF デバッグ情報解析
//!
//! このクレートは、ELFファイルとDWARFデバッグ情報の解析機能を提供します。
//! 関数スコープの解決、アドレスからソース行への変換、コルーチンフレーム型の索引、
//! 変数のロケーション評価、型付きの値の整形などを行います。

pub mod demangle;
pub mod frame_types;
pub mod lines;
pub mod loader;
pub mod loc_eval;
pub mod memory;
pub mod symbols;
pub mod type_info;
pub mod utils;
pub mod value_formatter;
pub mod variables;

pub use demangle::{demangle, display_name, DemangleStyle, DemangleStyleGuard};
pub use frame_types::{FrameTypeIndex, TypeRef};
pub use lines::{LineInfo, LineInfoProvider};
pub use loader::{DwarfLoader, DwarfReader};
pub use loc_eval::{Loc, LocPiece, LocPieceLocation, LocationEvaluator};
pub use memory::{MemoryAccessError, MemoryReader};
pub use symbols::{Symbol, SymbolTable};
pub use type_info::{Enumerator, FieldInfo, TypeInfo, TypeInfoExtractor, MAX_TYPE_DEPTH};
pub use utils::{FunctionFinder, FunctionScope};
pub use value_formatter::{FormatOptions, ValueFormatter};
pub use variables::VariableLocator;

/// DWARF解析の結果型
pub type Result<T> = anyhow::Result<T>;
