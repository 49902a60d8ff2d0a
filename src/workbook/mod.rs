//! Workbook Module
//!
//! コピー済みスプレッドシートの "Data Elements" シートに、
//! 論理モデルの基本行を書き込むモジュール。
//!
//! テンプレートの形式はファイル先頭のシグネチャから判定し、
//! 形式ごとのバックエンドへ処理を振り分けます。
//!
//! - XML（SpreadsheetML 2003）: `spreadsheetml` バックエンド
//! - ZIP（OOXML xlsx）: `xlsx` バックエンド
//! - OLE2（旧バイナリ形式）: 書き込み非対応のためエラー

mod header;
mod markup;
mod spreadsheetml;
mod xlsx;

use std::path::Path;

pub use header::ColumnIndices;
pub(crate) use header::{HeaderCell, RowPatch};

use crate::error::LogicalModelError;
use crate::security::SecurityConfig;
use spreadsheetml::SpreadsheetMlDocument;
use xlsx::XlsxDocument;

/// 値を書き込むシート名
pub const DATA_ELEMENTS_SHEET: &str = "Data Elements";

const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";
const OLE2_SIGNATURE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// テンプレートワークブックの形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkbookFormat {
    /// XML Spreadsheet 2003
    SpreadsheetMl,
    /// Office Open XML（ZIPパッケージ）
    Xlsx,
    /// 旧バイナリ形式（読み取り専用）
    LegacyBinary,
}

impl WorkbookFormat {
    /// 先頭バイトから形式を判定する
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(ZIP_SIGNATURE) {
            WorkbookFormat::Xlsx
        } else if bytes.starts_with(OLE2_SIGNATURE) {
            WorkbookFormat::LegacyBinary
        } else {
            WorkbookFormat::SpreadsheetMl
        }
    }
}

/// 形式ごとのワークブック実装
///
/// ヘッダーの読み込みと行の書き込みを、形式に応じたバックエンドへ委譲します。
#[derive(Debug)]
pub(crate) enum TemplateWorkbook {
    SpreadsheetMl(SpreadsheetMlDocument),
    Xlsx(XlsxDocument),
}

impl TemplateWorkbook {
    /// バイト列からワークブックを構築する
    pub fn from_bytes(
        path: &Path,
        bytes: Vec<u8>,
        security: &SecurityConfig,
    ) -> Result<Self, LogicalModelError> {
        security
            .check_input_size(bytes.len() as u64)
            .map_err(LogicalModelError::SecurityViolation)?;

        match WorkbookFormat::detect(&bytes) {
            WorkbookFormat::SpreadsheetMl => Ok(TemplateWorkbook::SpreadsheetMl(
                SpreadsheetMlDocument::from_bytes(path, bytes)?,
            )),
            WorkbookFormat::Xlsx => Ok(TemplateWorkbook::Xlsx(XlsxDocument::from_bytes(
                path, bytes, security,
            )?)),
            WorkbookFormat::LegacyBinary => Err(LogicalModelError::MalformedTemplate {
                path: path.to_path_buf(),
                message: "legacy binary workbooks cannot be written".to_string(),
            }),
        }
    }

    /// シートのヘッダー行（行0）
    pub fn header_row(&self, sheet: &str) -> Result<Vec<HeaderCell>, LogicalModelError> {
        match self {
            TemplateWorkbook::SpreadsheetMl(doc) => doc.header_row(sheet),
            TemplateWorkbook::Xlsx(doc) => doc.header_row(sheet),
        }
    }

    /// 書き込み内容を適用したファイル内容
    pub fn apply(&self, sheet: &str, patch: &RowPatch) -> Result<Vec<u8>, LogicalModelError> {
        match self {
            TemplateWorkbook::SpreadsheetMl(doc) => doc.apply(sheet, patch),
            TemplateWorkbook::Xlsx(doc) => doc.apply(sheet, patch),
        }
    }
}

/// スプレッドシートに論理モデルの基本行を書き込む
///
/// ヘッダー行から `Element`、`Type`、`Short Label`、`Definition` の4列を解決し、
/// データ行（行1）に型名と `"Logical"` を書き込みます。
/// いずれかの列が見つからない場合は何も書き込みません。
/// ファイルは最後に一度だけ書き戻されます。
///
/// # 引数
///
/// * `path` - 書き込み対象のスプレッドシート（コピー済みの成果物）
/// * `type_name` - 複合型名（大文字小文字はそのまま）
/// * `security` - 入力サイズ等の制限
///
/// # 戻り値
///
/// * `Ok(ColumnIndices)` - 解決された列位置
/// * `Err(LogicalModelError)` - シートや列が見つからない、または入出力に失敗した場合
pub(crate) fn populate_logical_model(
    path: &Path,
    type_name: &str,
    security: &SecurityConfig,
) -> Result<ColumnIndices, LogicalModelError> {
    // 1. ファイルを読み込み、形式を判定
    let bytes = std::fs::read(path)?;
    let workbook = TemplateWorkbook::from_bytes(path, bytes, security)?;

    // 2. ヘッダー行から列位置を解決（書き込み前にすべて解決する）
    let header = workbook.header_row(DATA_ELEMENTS_SHEET)?;
    let columns = ColumnIndices::resolve(&header, path)?;

    // 3. データ行を組み立てて適用
    let patch = RowPatch::logical_model_row(&columns, type_name);
    let output = workbook.apply(DATA_ELEMENTS_SHEET, &patch)?;

    // 4. 一度だけ書き戻す
    std::fs::write(path, output)?;

    tracing::debug!(
        path = %path.display(),
        type_name,
        element = columns.element,
        type_column = columns.type_column,
        short_label = columns.short_label,
        "populated logical model row"
    );

    Ok(columns)
}
