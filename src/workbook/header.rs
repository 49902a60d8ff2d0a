//! Header Resolution
//!
//! "Data Elements" シートのヘッダー行から列位置を解決し、
//! データ行へ書き込む値の集合（`RowPatch`）を組み立てるモジュール。

use std::path::Path;

use serde::Serialize;

use crate::api::HeaderColumn;
use crate::error::LogicalModelError;

/// `Type` 列に書き込む値
pub(crate) const LOGICAL_TYPE_VALUE: &str = "Logical";

/// 値を書き込むデータ行（0始まり、ヘッダー行の直下）
pub(crate) const DATA_ROW: u32 = 1;

/// ヘッダー行のセル
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HeaderCell {
    /// 列インデックス（0始まり）
    pub col: u32,
    /// 文字列セルの場合のみ、その文字列
    pub text: Option<String>,
}

impl HeaderCell {
    pub fn text(col: u32, text: impl Into<String>) -> Self {
        Self {
            col,
            text: Some(text.into()),
        }
    }

    pub fn non_text(col: u32) -> Self {
        Self { col, text: None }
    }
}

/// ラベルに一致する最初の列を探す
///
/// 左から順に走査し、文字列セルの値がラベルと完全一致（大文字小文字を区別）
/// した最初の列を返します。文字列以外のセルは照合対象になりません。
pub(crate) fn find_column(header: &[HeaderCell], label: &str) -> Option<u32> {
    header
        .iter()
        .filter(|cell| cell.text.as_deref() == Some(label))
        .map(|cell| cell.col)
        .min()
}

/// 解決済みのヘッダー列位置（0始まり）
///
/// `definition` は解決されますが、値は書き込まれません。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnIndices {
    pub element: u32,
    pub type_column: u32,
    pub short_label: u32,
    pub definition: u32,
}

impl ColumnIndices {
    /// ヘッダー行から4つの列をすべて解決する
    ///
    /// # 戻り値
    ///
    /// * `Ok(ColumnIndices)` - すべての列が見つかった場合
    /// * `Err(LogicalModelError::ColumnNotFound)` - 最初に見つからなかった列
    pub(crate) fn resolve(header: &[HeaderCell], path: &Path) -> Result<Self, LogicalModelError> {
        let lookup = |column: HeaderColumn| {
            find_column(header, column.label()).ok_or_else(|| LogicalModelError::ColumnNotFound {
                path: path.to_path_buf(),
                column: column.label().to_string(),
            })
        };

        Ok(Self {
            element: lookup(HeaderColumn::Element)?,
            type_column: lookup(HeaderColumn::Type)?,
            short_label: lookup(HeaderColumn::ShortLabel)?,
            definition: lookup(HeaderColumn::Definition)?,
        })
    }

    /// 列の種類ごとの位置
    pub fn get(&self, column: HeaderColumn) -> u32 {
        match column {
            HeaderColumn::Element => self.element,
            HeaderColumn::Type => self.type_column,
            HeaderColumn::ShortLabel => self.short_label,
            HeaderColumn::Definition => self.definition,
        }
    }
}

/// 1行分の書き込み内容
///
/// 同じ列への書き込みが重なった場合は後の値が優先されます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RowPatch {
    pub row: u32,
    /// 列インデックス昇順
    cells: Vec<(u32, String)>,
}

impl RowPatch {
    pub fn new(row: u32) -> Self {
        Self {
            row,
            cells: Vec::new(),
        }
    }

    /// 論理モデルのデータ行
    ///
    /// `Element` と `Short Label` に型名、`Type` に `"Logical"` を書き込みます。
    pub fn logical_model_row(columns: &ColumnIndices, type_name: &str) -> Self {
        let mut patch = Self::new(DATA_ROW);
        patch.set(columns.element, type_name);
        patch.set(columns.type_column, LOGICAL_TYPE_VALUE);
        patch.set(columns.short_label, type_name);
        patch
    }

    pub fn set(&mut self, col: u32, value: impl Into<String>) {
        let value = value.into();
        match self.cells.binary_search_by_key(&col, |(c, _)| *c) {
            Ok(pos) => self.cells[pos].1 = value,
            Err(pos) => self.cells.insert(pos, (col, value)),
        }
    }

    #[cfg(test)]
    pub fn get(&self, col: u32) -> Option<&str> {
        self.cells
            .binary_search_by_key(&col, |(c, _)| *c)
            .ok()
            .map(|pos| self.cells[pos].1.as_str())
    }

    pub fn cells(&self) -> &[(u32, String)] {
        &self.cells
    }

    /// 書き込む最大の列インデックス
    pub fn max_col(&self) -> Option<u32> {
        self.cells.last().map(|(c, _)| *c)
    }
}
