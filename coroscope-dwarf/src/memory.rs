//! ターゲットメモリの読み取りインターフェース

use crate::Result;

/// メモリアクセスエラー
///
/// 未マッピング領域や読み取り不可能な領域へのアクセスで発生します。
#[derive(Debug, Clone, thiserror::Error)]
#[error("Cannot access memory at address 0x{addr:x} ({reason})")]
pub struct MemoryAccessError {
    /// アクセスしようとしたアドレス
    pub addr: u64,
    /// 読み取りサイズ（バイト）
    pub size: usize,
    /// 失敗の理由
    pub reason: String,
}

impl MemoryAccessError {
    pub fn new(addr: u64, size: usize, reason: impl Into<String>) -> Self {
        Self {
            addr,
            size,
            reason: reason.into(),
        }
    }
}

/// メモリ読み取りトレイト
///
/// ライブプロセスとコアダンプのメモリインターフェースを抽象化します。
/// 値はターゲットのバイトオーダー（リトルエンディアン）で解釈されます。
pub trait MemoryReader {
    /// 指定アドレスから `size` バイトを読み取る
    fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>>;

    /// ターゲットのポインタ幅（バイト）
    fn pointer_width(&self) -> u64 {
        8
    }

    fn read_u8(&self, addr: u64) -> Result<u8> {
        let bytes = self.read(addr, 1)?;
        bytes
            .first()
            .copied()
            .ok_or_else(|| MemoryAccessError::new(addr, 1, "short read").into())
    }

    fn read_u16(&self, addr: u64) -> Result<u16> {
        Ok(read_le(&self.read(addr, 2)?, addr)? as u16)
    }

    fn read_u32(&self, addr: u64) -> Result<u32> {
        Ok(read_le(&self.read(addr, 4)?, addr)? as u32)
    }

    fn read_u64(&self, addr: u64) -> Result<u64> {
        read_le(&self.read(addr, 8)?, addr)
    }

    /// ポインタ幅の値を1つ読み取る
    fn read_pointer(&self, addr: u64) -> Result<u64> {
        match self.pointer_width() {
            4 => Ok(self.read_u32(addr)? as u64),
            _ => self.read_u64(addr),
        }
    }
}

/// リトルエンディアンのバイト列を整数に変換する（最大8バイト）
pub fn read_le(bytes: &[u8], addr: u64) -> Result<u64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(MemoryAccessError::new(
            addr,
            bytes.len(),
            format!("cannot decode {} bytes as an integer", bytes.len()),
        )
        .into());
    }

    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}
