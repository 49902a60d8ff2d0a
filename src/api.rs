//! Public API Types
//!
//! 公開APIで使用する列挙型を定義するモジュール。

use std::fmt;

/// 小文字化後のファイル名衝突の処理方針
///
/// 異なるスキーマに属する複合型が、小文字化によって同じ論理モデル名
/// （例: `Patient` と `PATIENT` → `patient`）になった場合の扱いを指定します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum CollisionPolicy {
    /// 衝突を検出した時点で `LogicalModelError::NameCollision` を返す（デフォルト）
    #[default]
    Error,

    /// 警告ログを出力し、後から処理した型で成果物を上書きする
    ///
    /// 衝突検出を持たない旧来の挙動と同じ出力になります。
    OverwriteLastWins,
}

/// テンプレート成果物の種類
///
/// 各複合型について、3種類のテンプレートがコピーされます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    /// `*-spreadsheet.xml`（データ要素を書き込む対象）
    Spreadsheet,

    /// `*-introduction.xml`（そのままコピー）
    Introduction,

    /// `*-notes.xml`（そのままコピー）
    Notes,
}

impl TemplateKind {
    /// すべての種類（コピー順）
    pub const ALL: [TemplateKind; 3] = [
        TemplateKind::Spreadsheet,
        TemplateKind::Introduction,
        TemplateKind::Notes,
    ];

    /// ファイル名の接尾辞
    ///
    /// 例: `TemplateKind::Notes.suffix()` → `"-notes.xml"`
    pub fn suffix(self) -> &'static str {
        match self {
            TemplateKind::Spreadsheet => "-spreadsheet.xml",
            TemplateKind::Introduction => "-introduction.xml",
            TemplateKind::Notes => "-notes.xml",
        }
    }

    /// 接頭辞と接尾辞からファイル名を組み立てる
    ///
    /// 例: `TemplateKind::Spreadsheet.file_name("patient")` → `"patient-spreadsheet.xml"`
    pub fn file_name(self, prefix: &str) -> String {
        format!("{}{}", prefix, self.suffix())
    }
}

/// "Data Elements" シートのヘッダー列
///
/// ヘッダー行（行0）のセル文字列と完全一致（大文字小文字を区別）で照合されます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderColumn {
    /// `"Element"` 列: 型名を書き込む
    Element,

    /// `"Type"` 列: `"Logical"` を書き込む
    Type,

    /// `"Short Label"` 列: 型名を書き込む
    ShortLabel,

    /// `"Definition"` 列: 参照のみで書き込みは行わない
    Definition,
}

impl HeaderColumn {
    /// 解決が必要なすべての列（照合順）
    pub const ALL: [HeaderColumn; 4] = [
        HeaderColumn::Element,
        HeaderColumn::Type,
        HeaderColumn::ShortLabel,
        HeaderColumn::Definition,
    ];

    /// ヘッダー行で照合するラベル
    pub fn label(self) -> &'static str {
        match self {
            HeaderColumn::Element => "Element",
            HeaderColumn::Type => "Type",
            HeaderColumn::ShortLabel => "Short Label",
            HeaderColumn::Definition => "Definition",
        }
    }
}

impl fmt::Display for HeaderColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 1つの複合型の変換処理における段階
///
/// 変換失敗時に、どの操作で失敗したかを報告するために使用します。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Stage {
    /// 論理モデル名の決定と衝突検出
    NameResolution,

    /// テンプレートのコピー
    TemplateCopy,

    /// コピー先スプレッドシートへの書き込み
    WorkbookPopulation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::NameResolution => "name resolution",
            Stage::TemplateCopy => "template copy",
            Stage::WorkbookPopulation => "workbook population",
        };
        f.write_str(name)
    }
}
