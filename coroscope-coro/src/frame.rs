//! コルーチンフレームのビュー

use crate::Result;
use coroscope_dwarf::MemoryReader;

/// ターゲットメモリ上のコルーチンフレーム
///
/// フレームの先頭アドレスとポインタ幅だけを持ち、各フィールドのアドレスは
/// そこから導出します。
///
/// ```text
/// frame + 0   resume 関数へのポインタ
/// frame + W   destroy 関数へのポインタ
/// frame + 2W  promise（先頭メンバが継続ポインタ）
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoroutineFrame {
    frame_address: u64,
    pointer_width: u64,
}

impl CoroutineFrame {
    pub fn new(frame_address: u64, pointer_width: u64) -> Self {
        Self {
            frame_address,
            pointer_width,
        }
    }

    pub fn frame_addr(&self) -> u64 {
        self.frame_address
    }

    pub fn pointer_width(&self) -> u64 {
        self.pointer_width
    }

    /// resume 関数ポインタが格納されているアドレス
    pub fn resume_addr(&self) -> u64 {
        self.frame_address
    }

    /// destroy 関数ポインタが格納されているアドレス
    pub fn destroy_addr(&self) -> u64 {
        self.frame_address.wrapping_add(self.pointer_width)
    }

    /// promise オブジェクトのアドレス
    pub fn promise_addr(&self) -> u64 {
        self.frame_address.wrapping_add(self.pointer_width * 2)
    }

    /// 継続ポインタのアドレス
    ///
    /// 継続ポインタが promise の先頭メンバである場合に限り正しい値です。
    pub fn continuation_addr(&self) -> u64 {
        self.promise_addr()
    }

    /// resume 関数のアドレスを読み取る
    pub fn resume_address(&self, memory: &dyn MemoryReader) -> Result<u64> {
        memory.read_pointer(self.resume_addr())
    }

    /// 継続ポインタの値を読み取る
    pub fn next_continuation_address(&self, memory: &dyn MemoryReader) -> Result<u64> {
        memory.read_pointer(self.continuation_addr())
    }
}
