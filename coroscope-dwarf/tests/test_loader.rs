//! DWARFローダーとシンボル解決のテスト
//!
//! テストバイナリ自身のデバッグ情報を読み込んで検証します。

use coroscope_dwarf::{
    DemangleStyle, DemangleStyleGuard, DwarfLoader, FrameTypeIndex, FunctionFinder,
    LineInfoProvider, SymbolTable,
};

#[inline(never)]
pub fn scope_lookup_marker(x: u64) -> u64 {
    std::hint::black_box(x).wrapping_mul(3)
}

fn load_self() -> DwarfLoader {
    let path = std::env::current_exe().expect("Failed to get test binary path");
    DwarfLoader::load(&path).expect("Failed to load DWARF from test binary")
}

/// マーカー関数のDWARF上のアドレスをシンボルテーブルから求める
fn marker_address(symbols: &SymbolTable) -> u64 {
    symbols
        .find_symbols("scope_lookup_marker")
        .first()
        .map(|symbol| symbol.address)
        .expect("marker symbol should be present")
}

#[test]
fn test_load_self() {
    let loader = load_self();
    assert_eq!(loader.pointer_width(), std::mem::size_of::<usize>() as u64);

    let symbols = SymbolTable::new(&loader).expect("Failed to build symbol table");
    assert!(!symbols.is_empty());
    assert_eq!(scope_lookup_marker(2), 6);
}

#[test]
fn test_scope_and_line_of_marker() {
    let loader = load_self();
    let symbols = SymbolTable::new(&loader).unwrap();
    let address = marker_address(&symbols);

    let scope = FunctionFinder::new(loader.dwarf())
        .scope_at_pc(address)
        .unwrap()
        .expect("marker should have a DWARF scope");
    assert!(scope.contains(address));
    assert!(scope.display_name().ends_with("scope_lookup_marker"));

    {
        let _guard = DemangleStyleGuard::set(DemangleStyle::None);
        let raw = scope.display_name();
        assert!(raw.contains("scope_lookup_marker"));
        assert!(!raw.contains("::"), "raw linkage name expected, got {}", raw);
    }

    let lines = LineInfoProvider::new(&loader).unwrap();
    let line = lines.lookup(address).unwrap().expect("marker should have a line row");
    assert!(line.file.ends_with("test_loader.rs"), "unexpected file {}", line.file);
    assert!(line.line > 0);
}

#[test]
fn test_rust_binary_has_no_coroutine_frame_types() {
    let loader = load_self();
    let index = FrameTypeIndex::build(loader.dwarf()).unwrap();
    assert!(index.get("scope_lookup_marker").is_none());
}
