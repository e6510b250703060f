//! シンボル解決のインターフェース

use crate::error::WalkError;
use crate::Result;
use coroscope_dwarf::{
    display_name, DemangleStyle, DemangleStyleGuard, FunctionScope, LineInfo, Symbol, TypeInfo,
};
use tracing::trace;

/// コードアドレスを含む関数のスコープ
///
/// DWARFの関数DIEでもELFシンボルでも同じように扱えるよう、名前とアドレス範囲だけを持ちます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeScope {
    /// ソース上の関数名
    pub name: Option<String>,
    /// リンケージ名（マングルされた名前）
    pub linkage_name: Option<String>,
    pub low_pc: u64,
    pub high_pc: u64,
}

impl CodeScope {
    /// 現在の表示モードに従った関数名
    ///
    /// `DemangleStyle::None` ではリンケージ名がそのまま返るので、
    /// フレーム型の検索キーとしても使えます。
    pub fn display_name(&self) -> String {
        match (&self.linkage_name, &self.name) {
            (Some(linkage), _) => display_name(linkage),
            (None, Some(name)) => name.clone(),
            (None, None) => "??".to_string(),
        }
    }
}

impl From<&FunctionScope> for CodeScope {
    fn from(scope: &FunctionScope) -> Self {
        Self {
            name: scope.name.clone(),
            linkage_name: scope.linkage_name.clone(),
            low_pc: scope.low_pc,
            high_pc: scope.high_pc,
        }
    }
}

impl From<&Symbol> for CodeScope {
    fn from(symbol: &Symbol) -> Self {
        Self {
            name: None,
            linkage_name: Some(symbol.name.clone()),
            low_pc: symbol.address,
            high_pc: symbol.address.saturating_add(symbol.size),
        }
    }
}

/// 解決済みのコードアドレス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCode {
    pub scope: CodeScope,
    pub line: Option<LineInfo>,
}

/// シンボル解決
///
/// 実行時のアドレス（ロードバイアス適用後）を受け取ります。
pub trait SymbolResolver {
    /// `pc` を含む関数のスコープ
    fn scope_at(&self, pc: u64) -> Result<Option<CodeScope>>;

    /// `pc` のソース行
    fn line_at(&self, pc: u64) -> Result<Option<LineInfo>>;

    /// 関数に対応するコルーチンフレーム型
    ///
    /// `function_key` は関数のリンケージ名です。
    fn frame_layout_type(&self, function_key: &str) -> Result<Option<TypeInfo>>;

    /// 関数ポインタの注釈（`<foo()+16>` など）
    fn symbolize(&self, _addr: u64) -> Option<String> {
        None
    }

    /// resume アドレスを関数とソース行に解決する
    ///
    /// 関数が見つからなければ [`WalkError::UnresolvedSymbol`] を返します。
    fn resolve(&self, pc: u64) -> Result<ResolvedCode> {
        let scope = self
            .scope_at(pc)?
            .ok_or(WalkError::UnresolvedSymbol { addr: pc })?;
        let line = self.line_at(pc)?;
        trace!("resolved 0x{:x} to {:?} ({:?})", pc, scope.linkage_name, line);
        Ok(ResolvedCode { scope, line })
    }
}

/// スコープに対応するフレーム型を検索する
///
/// 検索キーはリンケージ名そのものなので、検索の間だけ表示モードを
/// `DemangleStyle::None` に切り替えます。戻る時には元のモードに戻ります。
pub fn layout_type_for(symbols: &dyn SymbolResolver, scope: &CodeScope) -> Result<Option<TypeInfo>> {
    let _raw_names = DemangleStyleGuard::set(DemangleStyle::None);
    let key = scope.display_name();
    trace!("looking up frame type of {}", key);
    symbols.frame_layout_type(&key)
}
