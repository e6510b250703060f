//! ELFシンボルテーブル

use crate::demangle::display_name;
use crate::{DwarfLoader, Result};
use object::{Object, ObjectSymbol, SymbolKind};

/// シンボル情報
#[derive(Debug, Clone)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    pub address: u64,
    pub size: u64,
}

impl Symbol {
    pub fn new(name: String, address: u64, size: u64) -> Self {
        Self { name, address, size }
    }

    /// 現在の表示モードに従った名前を取得する
    pub fn display_name(&self) -> String {
        display_name(&self.name)
    }

    /// アドレスがシンボルの範囲内にあるか
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.address && addr < self.address.saturating_add(self.size)
    }
}

/// 関数シンボルのテーブル
///
/// DWARFで関数が見つからない場合のフォールバックと、
/// 関数ポインタの注釈（`<foo+16>`）に使います。
pub struct SymbolTable {
    /// アドレス順にソートされた関数シンボル
    functions: Vec<Symbol>,
}

impl SymbolTable {
    /// DWARFローダーのオブジェクトファイルからシンボルテーブルを作成する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let functions: Vec<Symbol> = loader
            .object_file()
            .symbols()
            .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.size() > 0)
            .filter_map(|symbol| {
                let name = symbol.name().ok()?;
                if name.is_empty() {
                    return None;
                }
                Some(Symbol::new(name.to_string(), symbol.address(), symbol.size()))
            })
            .collect();

        Ok(Self::from_symbols(functions))
    }

    /// シンボルの一覧からテーブルを作成する
    pub fn from_symbols(mut functions: Vec<Symbol>) -> Self {
        functions.sort_by_key(|s| s.address);
        Self { functions }
    }

    /// アドレスを含む関数シンボルを検索する
    pub fn reverse_resolve(&self, addr: u64) -> Option<&Symbol> {
        let idx = self.functions.partition_point(|s| s.address <= addr);
        // 重なり合うシンボルがあるので、開始アドレスが近いものから順に探す
        self.functions[..idx].iter().rev().find(|s| s.contains(addr))
    }

    /// 表示名に `pattern` を含むシンボルを検索する
    pub fn find_symbols(&self, pattern: &str) -> Vec<&Symbol> {
        self.functions
            .iter()
            .filter(|s| s.name.contains(pattern) || s.display_name().contains(pattern))
            .collect()
    }

    /// アドレスを `<name+offset>` 形式に整形する
    pub fn describe(&self, addr: u64) -> Option<String> {
        let symbol = self.reverse_resolve(addr)?;
        let offset = addr - symbol.address;
        if offset == 0 {
            Some(format!("<{}>", symbol.display_name()))
        } else {
            Some(format!("<{}+{}>", symbol.display_name(), offset))
        }
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
