//! 継続チェーン走査のテスト（メモリ上の偽ターゲットを使う）

use coroscope_coro::{
    present, strategy_for, ChainWalker, CodeScope, CoroAbi, FieldNames, FixedOffsetLayout,
    PromiseLinkLayout, SymbolResolver, WalkError,
};
use coroscope_dwarf::{
    DemangleStyle, FieldInfo, LineInfo, MemoryAccessError, MemoryReader, TypeInfo,
};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

/// バイト単位のメモリを持つ偽ターゲット
struct FakeMemory {
    bytes: BTreeMap<u64, u8>,
    pointer_width: u64,
    reads: Cell<usize>,
}

impl FakeMemory {
    fn new(pointer_width: u64) -> Self {
        Self {
            bytes: BTreeMap::new(),
            pointer_width,
            reads: Cell::new(0),
        }
    }

    fn write_pointer(&mut self, addr: u64, value: u64) {
        let bytes = value.to_le_bytes();
        for i in 0..self.pointer_width {
            self.bytes.insert(addr + i, bytes[i as usize]);
        }
    }
}

impl MemoryReader for FakeMemory {
    fn read(&self, addr: u64, size: usize) -> anyhow::Result<Vec<u8>> {
        self.reads.set(self.reads.get() + 1);
        (0..size as u64)
            .map(|i| {
                self.bytes
                    .get(&(addr + i))
                    .copied()
                    .ok_or_else(|| MemoryAccessError::new(addr, size, "unmapped").into())
            })
            .collect()
    }

    fn pointer_width(&self) -> u64 {
        self.pointer_width
    }
}

#[derive(Default)]
struct FakeSymbols {
    functions: Vec<CodeScope>,
    lines: HashMap<u64, LineInfo>,
    frame_types: HashMap<String, TypeInfo>,
    /// frame_layout_type が呼ばれた時の (キー, 表示モード)
    lookups: RefCell<Vec<(String, DemangleStyle)>>,
}

impl FakeSymbols {
    fn function(&mut self, linkage_name: &str, low_pc: u64, high_pc: u64) {
        self.functions.push(CodeScope {
            name: None,
            linkage_name: Some(linkage_name.to_string()),
            low_pc,
            high_pc,
        });
    }

    fn line(&mut self, pc: u64, file: &str, line: u32) {
        self.lines.insert(
            pc,
            LineInfo {
                file: file.to_string(),
                line,
                column: None,
            },
        );
    }
}

impl SymbolResolver for FakeSymbols {
    fn scope_at(&self, pc: u64) -> anyhow::Result<Option<CodeScope>> {
        Ok(self
            .functions
            .iter()
            .find(|f| pc >= f.low_pc && pc < f.high_pc)
            .cloned())
    }

    fn line_at(&self, pc: u64) -> anyhow::Result<Option<LineInfo>> {
        Ok(self.lines.get(&pc).cloned())
    }

    fn frame_layout_type(&self, function_key: &str) -> anyhow::Result<Option<TypeInfo>> {
        self.lookups
            .borrow_mut()
            .push((function_key.to_string(), DemangleStyle::current()));
        Ok(self.frame_types.get(function_key).cloned())
    }
}

/// 0x1000 -> 0x2000 -> null のチェーン
fn two_frame_target() -> (FakeMemory, FakeSymbols) {
    let mut memory = FakeMemory::new(8);
    memory.write_pointer(0x1000, 0x401100);
    memory.write_pointer(0x1010, 0x2000);
    memory.write_pointer(0x2000, 0x402200);
    memory.write_pointer(0x2010, 0);

    let mut symbols = FakeSymbols::default();
    symbols.function("_Z5innerv.resume", 0x401100, 0x401180);
    symbols.function("_Z5outerv.resume", 0x402200, 0x402280);
    symbols.line(0x401100, "demo.cpp", 12);
    (memory, symbols)
}

fn field(name: &str, offset: u64, type_info: TypeInfo) -> FieldInfo {
    FieldInfo {
        name: name.to_string(),
        offset,
        size: type_info.size(),
        type_info: Some(Box::new(type_info)),
        is_base: false,
    }
}

fn frame_type(continuation_width: u64) -> TypeInfo {
    let fn_ptr = TypeInfo::Pointer {
        pointee_type: Some(Box::new(TypeInfo::Subroutine)),
        size: 8,
    };
    let promise = TypeInfo::Struct {
        name: "promise_type".to_string(),
        size: 16,
        fields: vec![field(
            "continuation",
            0,
            TypeInfo::Primitive {
                name: "unsigned long".to_string(),
                size: continuation_width,
                encoding: None,
            },
        )],
    };
    TypeInfo::Struct {
        name: "_Z5innerv.coro_frame_ty".to_string(),
        size: 40,
        fields: vec![
            field(FieldNames::CLANG.resume, 0, fn_ptr.clone()),
            field(FieldNames::CLANG.destroy, 8, fn_ptr),
            field(FieldNames::CLANG.promise, 16, promise),
        ],
    }
}

#[test]
fn test_walk_two_frames() {
    let (memory, symbols) = two_frame_target();
    let layout = FixedOffsetLayout::clang();
    let chain = ChainWalker::new(&memory, &symbols, &layout).walk(0x1000).unwrap();

    assert_eq!(chain.depth(), 2);
    let records = chain.records();
    assert_eq!(records[0].frame_addr, 0x1000);
    assert_eq!(records[0].promise_addr, 0x1010);
    assert_eq!(records[0].continuation_addr, 0x1010);
    assert_eq!(records[0].resume_address, 0x401100);
    assert_eq!(records[1].frame_addr, 0x2000);
    assert_eq!(records[1].continuation_addr, 0x2010);
    assert_eq!(records[0].source_file(), Some("demo.cpp"));
    assert_eq!(records[0].source_line(), Some(12));
    assert_eq!(records[1].source_line(), None);

    // 各フレームの継続アドレスは次のフレームを指している
    assert_eq!(memory.read_pointer(records[0].continuation_addr).unwrap(), 0x2000);
    assert_eq!(memory.read_pointer(records[1].continuation_addr).unwrap(), 0);

    let lines: Vec<String> = chain.iter().enumerate().map(|(i, r)| present(r, i)).collect();
    assert_eq!(
        lines[0],
        "#0 0x401100 in inner() [frame_addr = 0x1000, promise_addr = 0x1010, continuation_addr = 0x1010] at demo.cpp:12"
    );
    assert_eq!(
        lines[1],
        "#1 0x402200 in outer() [frame_addr = 0x2000, promise_addr = 0x2010, continuation_addr = 0x2010]"
    );
}

#[test]
fn test_walk_null_start_is_empty() {
    let (memory, symbols) = two_frame_target();
    let layout = FixedOffsetLayout::clang();
    let chain = ChainWalker::new(&memory, &symbols, &layout).walk(0).unwrap();

    assert!(chain.is_empty());
    assert_eq!(memory.reads.get(), 0);
}

#[test]
fn test_walk_is_restartable() {
    let (memory, symbols) = two_frame_target();
    let layout = FixedOffsetLayout::clang();
    let walker = ChainWalker::new(&memory, &symbols, &layout);

    assert_eq!(walker.walk(0x1000).unwrap().depth(), 2);
    let from_outer = walker.walk(0x2000).unwrap();
    assert_eq!(from_outer.depth(), 1);
    assert_eq!(from_outer.records()[0].frame_addr, 0x2000);
}

#[test]
fn test_walk_fails_on_unresolved_resume_address() {
    let (mut memory, symbols) = two_frame_target();
    // 2番目のフレームの resume ポインタを関数外に向ける
    memory.write_pointer(0x2000, 0xdead_beef);
    let layout = FixedOffsetLayout::clang();

    let err = ChainWalker::new(&memory, &symbols, &layout)
        .walk(0x1000)
        .unwrap_err();
    match err.downcast_ref::<WalkError>() {
        Some(WalkError::UnresolvedSymbol { addr }) => assert_eq!(*addr, 0xdead_beef),
        other => panic!("unexpected error: {:?}", other),
    }
    // resume(0x1000), 継続(0x1010), resume(0x2000) の3回だけ読む
    assert_eq!(memory.reads.get(), 3);
}

#[test]
fn test_walk_propagates_memory_errors() {
    let (mut memory, symbols) = two_frame_target();
    memory.bytes.retain(|&addr, _| !(0x2010..0x2018).contains(&addr));
    let layout = FixedOffsetLayout::clang();

    let err = ChainWalker::new(&memory, &symbols, &layout)
        .walk(0x1000)
        .unwrap_err();
    assert_eq!(err.downcast_ref::<MemoryAccessError>().unwrap().addr, 0x2010);
}

#[test]
fn test_walk_promise_link_layout() {
    let mut memory = FakeMemory::new(8);
    memory.write_pointer(0x1000, 0x401100);
    // 親の promise（0x2000 + 16）を指す
    memory.write_pointer(0x1010, 0x2010);
    memory.write_pointer(0x2000, 0x402200);
    memory.write_pointer(0x2010, 0);
    let (_, symbols) = two_frame_target();

    let chain = ChainWalker::new(&memory, &symbols, &PromiseLinkLayout)
        .walk(0x1000)
        .unwrap();
    let frames: Vec<u64> = chain.iter().map(|r| r.frame_addr).collect();
    assert_eq!(frames, vec![0x1000, 0x2000]);
}

#[test]
fn test_walk_32bit_target() {
    let mut memory = FakeMemory::new(4);
    memory.write_pointer(0x8000, 0x401100);
    memory.write_pointer(0x8008, 0x9000);
    memory.write_pointer(0x9000, 0x402200);
    memory.write_pointer(0x9008, 0);
    let (_, symbols) = two_frame_target();
    let layout = strategy_for(CoroAbi::Clang);

    let chain = ChainWalker::new(&memory, &symbols, layout.as_ref())
        .walk(0x8000)
        .unwrap();
    assert_eq!(chain.depth(), 2);
    assert_eq!(chain.records()[0].promise_addr, 0x8008);
    assert_eq!(chain.records()[1].frame_addr, 0x9000);
}

#[test]
fn test_walk_verifies_frame_type_with_raw_linkage_name() {
    let (memory, mut symbols) = two_frame_target();
    symbols
        .frame_types
        .insert("_Z5innerv.resume".to_string(), frame_type(8));
    let layout = FixedOffsetLayout::clang();

    let chain = ChainWalker::new(&memory, &symbols, &layout).walk(0x1000).unwrap();
    assert_eq!(chain.depth(), 2);

    let lookups = symbols.lookups.borrow();
    assert_eq!(lookups.len(), 2);
    assert_eq!(lookups[0], ("_Z5innerv.resume".to_string(), DemangleStyle::None));
    assert_eq!(lookups[1], ("_Z5outerv.resume".to_string(), DemangleStyle::None));
    assert_eq!(DemangleStyle::current(), DemangleStyle::Auto);
}

#[test]
fn test_walk_layout_mismatch_produces_no_records() {
    let (memory, mut symbols) = two_frame_target();
    symbols
        .frame_types
        .insert("_Z5innerv.resume".to_string(), frame_type(4));
    let layout = FixedOffsetLayout::clang();

    let err = ChainWalker::new(&memory, &symbols, &layout)
        .walk(0x1000)
        .unwrap_err();
    match err.downcast_ref::<WalkError>() {
        Some(WalkError::LayoutMismatch { frame, abi, .. }) => {
            assert_eq!(*frame, 0x1000);
            assert_eq!(*abi, CoroAbi::Clang);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(DemangleStyle::current(), DemangleStyle::Auto);
}
