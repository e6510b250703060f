//! ELFコアダンプの読み取り
//!
//! PT_LOADセグメントをメモリとして、NT_PRSTATUSノートをレジスタとして扱います。

use crate::registers::{RegisterSnapshot, RegisterSource};
use crate::Result;
use coroscope_dwarf::{MemoryAccessError, MemoryReader};
use object::elf;
use object::read::elf::{FileHeader, ProgramHeader};
use object::{Endianness, FileKind};
use std::path::Path;
use tracing::debug;

/// NT_FILEノートのタイプ（"FILE"）
const NT_FILE: u32 = 0x4649_4c45;
/// x86-64のelf_prstatus内でのpr_regのオフセット
const PRSTATUS_REGS_OFFSET_X86_64: usize = 112;
/// user_regs_structのワード数
const USER_REGS_WORDS: usize = 27;

/// PT_LOADセグメント
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    vaddr: u64,
    memsz: u64,
    /// ファイルに保存されている部分（filesz分）
    data: Vec<u8>,
}

impl Segment {
    /// `[addr, addr + size)` がセグメントに収まっていればその内容を返す
    fn read(&self, addr: u64, size: usize) -> Option<Vec<u8>> {
        let offset = addr.checked_sub(self.vaddr)?;
        let end = offset.checked_add(size as u64)?;
        if end > self.memsz {
            return None;
        }

        // filesz を超える部分はゼロとして読む
        let mut bytes = vec![0u8; size];
        let start = offset as usize;
        if start < self.data.len() {
            let available = (self.data.len() - start).min(size);
            bytes[..available].copy_from_slice(&self.data[start..start + available]);
        }
        Some(bytes)
    }
}

/// NT_FILEノートの1エントリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedFile {
    pub start: u64,
    pub end: u64,
    /// ファイル内のオフセット（バイト）
    pub file_offset: u64,
    pub path: String,
}

/// ELFコアダンプ
pub struct CoreDump {
    segments: Vec<Segment>,
    registers: Option<RegisterSnapshot>,
    files: Vec<MappedFile>,
    pointer_width: u64,
}

impl CoreDump {
    /// コアファイルを読み込む
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read core file {:?}: {}", path, e))?;
        Self::parse(&data)
    }

    /// コアファイルの内容を解析する
    pub fn parse(data: &[u8]) -> Result<Self> {
        let core = match FileKind::parse(data)? {
            FileKind::Elf32 => parse_core::<elf::FileHeader32<Endianness>>(data, 4)?,
            FileKind::Elf64 => parse_core::<elf::FileHeader64<Endianness>>(data, 8)?,
            kind => return Err(anyhow::anyhow!("Not an ELF core file: {:?}", kind)),
        };
        debug!(
            "core: {} segments, {} mapped files, registers: {}",
            core.segments.len(),
            core.files.len(),
            core.registers.is_some()
        );
        Ok(core)
    }

    /// NT_FILEに記録されたマップ済みファイル
    pub fn mapped_files(&self) -> &[MappedFile] {
        &self.files
    }

    /// 実行ファイルのロードバイアスを求める
    ///
    /// NT_FILEのうち、実行ファイルと同じ名前の最初のエントリから計算します。
    /// ファイルオフセットが開始アドレスを超える壊れたエントリは読み飛ばします。
    pub fn load_bias(&self, binary: &Path) -> Option<u64> {
        let file_name = binary.file_name()?;
        self.files
            .iter()
            .filter(|f| Path::new(&f.path).file_name() == Some(file_name))
            .find_map(|f| f.start.checked_sub(f.file_offset))
    }
}

impl MemoryReader for CoreDump {
    fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        self.segments
            .iter()
            .find_map(|segment| segment.read(addr, size))
            .ok_or_else(|| MemoryAccessError::new(addr, size, "not in core file").into())
    }

    fn pointer_width(&self) -> u64 {
        self.pointer_width
    }
}

impl RegisterSource for CoreDump {
    fn snapshot(&self) -> Result<RegisterSnapshot> {
        self.registers
            .ok_or_else(|| anyhow::anyhow!("Core file has no NT_PRSTATUS registers"))
    }
}

fn parse_core<Elf: FileHeader<Endian = Endianness>>(
    data: &[u8],
    pointer_width: u64,
) -> Result<CoreDump> {
    let header = Elf::parse(data)?;
    let endian = header.endian()?;
    if header.e_type(endian) != elf::ET_CORE {
        return Err(anyhow::anyhow!("Not a core file (e_type = {})", header.e_type(endian)));
    }
    let is_x86_64 = header.e_machine(endian) == elf::EM_X86_64;

    let mut segments = Vec::new();
    let mut registers = None;
    let mut files = Vec::new();

    for phdr in header.program_headers(endian, data)? {
        match phdr.p_type(endian) {
            elf::PT_LOAD => {
                let bytes = phdr
                    .data(endian, data)
                    .map_err(|_| anyhow::anyhow!("Truncated PT_LOAD segment"))?;
                segments.push(Segment {
                    vaddr: phdr.p_vaddr(endian).into(),
                    memsz: phdr.p_memsz(endian).into(),
                    data: bytes.to_vec(),
                });
            }
            elf::PT_NOTE => {
                let Some(mut notes) = phdr.notes(endian, data)? else {
                    continue;
                };
                while let Some(note) = notes.next()? {
                    if note.name() != b"CORE" {
                        continue;
                    }
                    match note.n_type(endian) {
                        elf::NT_PRSTATUS if registers.is_none() && is_x86_64 => {
                            registers = parse_prstatus_x86_64(note.desc());
                        }
                        NT_FILE => files = parse_nt_file(note.desc(), pointer_width),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    Ok(CoreDump {
        segments,
        registers,
        files,
        pointer_width,
    })
}

/// NT_PRSTATUSからx86-64のレジスタを取り出す
fn parse_prstatus_x86_64(desc: &[u8]) -> Option<RegisterSnapshot> {
    let regs = desc.get(PRSTATUS_REGS_OFFSET_X86_64..PRSTATUS_REGS_OFFSET_X86_64 + USER_REGS_WORDS * 8)?;
    let words: Vec<u64> = regs
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
        .collect();
    RegisterSnapshot::from_user_regs_words(&words)
}

/// NT_FILEノートを解析する
///
/// レイアウト: count, page_size, count × (start, end, file_ofs), NUL区切りのパス名
fn parse_nt_file(desc: &[u8], word_size: u64) -> Vec<MappedFile> {
    let word_size = word_size as usize;
    let word = |index: usize| -> Option<u64> {
        let bytes = desc.get(index * word_size..(index + 1) * word_size)?;
        let mut buf = [0u8; 8];
        buf[..word_size].copy_from_slice(bytes);
        Some(u64::from_le_bytes(buf))
    };

    let (Some(count), Some(page_size)) = (word(0), word(1)) else {
        return Vec::new();
    };
    let names_offset = usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(3))
        .and_then(|words| words.checked_add(2))
        .and_then(|words| words.checked_mul(word_size));
    let Some(names) = names_offset.and_then(|offset| desc.get(offset..)) else {
        debug!("NT_FILE note with {} entries does not fit in {} bytes", count, desc.len());
        return Vec::new();
    };
    let count = count as usize;

    names
        .split(|&b| b == 0)
        .take(count)
        .enumerate()
        .filter_map(|(i, name)| {
            let base = 2 + i * 3;
            Some(MappedFile {
                start: word(base)?,
                end: word(base + 1)?,
                file_offset: word(base + 2)?.checked_mul(page_size)?,
                path: String::from_utf8_lossy(name).into_owned(),
            })
        })
        .collect()
}
