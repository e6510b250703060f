//! バックトレース行の整形

use crate::record::FrameRecord;

/// フレームを1行に整形する
///
/// ```text
/// #0 0x401136 in task() [frame_addr = 0x1000, promise_addr = 0x1010, continuation_addr = 0x1010] at demo.cpp:12
/// ```
///
/// ソース行が分からない場合、` at` 以降は出力しません。
pub fn present(record: &FrameRecord, index: usize) -> String {
    let mut line = format!(
        "#{} 0x{:x} in {} [frame_addr = 0x{:x}, promise_addr = 0x{:x}, continuation_addr = 0x{:x}]",
        index,
        record.resume_address,
        record.function_name(),
        record.frame_addr,
        record.promise_addr,
        record.continuation_addr,
    );
    if let Some(location) = &record.line {
        line.push_str(&format!(" at {}", location));
    }
    line
}
