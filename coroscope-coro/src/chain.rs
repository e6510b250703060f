//! 継続チェーン（非同期バックトレース）

use crate::record::FrameRecord;

/// 継続チェーン
///
/// 最も最近中断したフレームから外側の継続へ向かう順に並びます。
#[derive(Debug, Clone, Default)]
pub struct Chain {
    records: Vec<FrameRecord>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// フレームを末尾（外側）に追加する
    pub fn push(&mut self, record: FrameRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FrameRecord> {
        self.records.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// チェーンの深さ
    pub fn depth(&self) -> usize {
        self.records.len()
    }
}

impl IntoIterator for Chain {
    type Item = FrameRecord;
    type IntoIter = std::vec::IntoIter<FrameRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a Chain {
    type Item = &'a FrameRecord;
    type IntoIter = std::slice::Iter<'a, FrameRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
