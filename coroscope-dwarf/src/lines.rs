//! ソース行情報

use crate::loader::DwarfReader;
use crate::{DwarfLoader, Result};
use tracing::trace;

/// ソース行情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
}

impl std::fmt::Display for LineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// ソース行情報の取得
///
/// addr2lineのコンテキストを保持し、アドレスからファイルと行番号を引きます。
pub struct LineInfoProvider {
    context: addr2line::Context<DwarfReader>,
}

impl LineInfoProvider {
    /// ソース行情報プロバイダを作成する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let dwarf = loader.load_dwarf()?;
        let context = addr2line::Context::from_dwarf(dwarf)
            .map_err(|e| anyhow::anyhow!("Failed to build line table context: {}", e))?;
        Ok(Self { context })
    }

    /// アドレスからソース行情報を取得する
    ///
    /// ファイル名と行番号の両方が分かる場合のみ `Some` を返します。
    pub fn lookup(&self, addr: u64) -> Result<Option<LineInfo>> {
        let location = self
            .context
            .find_location(addr)
            .map_err(|e| anyhow::anyhow!("Failed to look up line for 0x{:x}: {}", addr, e))?;

        let info = location.and_then(|loc| match (loc.file, loc.line) {
            (Some(file), Some(line)) => Some(LineInfo {
                file: file.to_string(),
                line,
                column: loc.column,
            }),
            _ => None,
        });
        trace!("line lookup 0x{:x} -> {:?}", addr, info);

        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_info_display() {
        let info = LineInfo {
            file: "/src/task.cpp".to_string(),
            line: 42,
            column: Some(7),
        };
        assert_eq!(info.to_string(), "/src/task.cpp:42");
    }
}
