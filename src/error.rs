//! Error Types Module
//!
//! クレート全体で使用する構造化エラー型を定義するモジュール。
//! `thiserror`を使用して、エラーの自動変換とメッセージフォーマットを実現する。

use std::path::PathBuf;

use thiserror::Error;

use crate::api::Stage;

/// xsd-logical-modelクレート全体で使用するエラー型
///
/// スキーマの読み込み、テンプレートのコピー、スプレッドシートへの書き込み中に
/// 発生するすべてのエラーを統一的に扱うために使用されます。
///
/// # エラーの種類
///
/// - `Io`: I/O操作中に発生したエラー
/// - `Schema`: XSDの解析に失敗したエラー
/// - `TemplateCopy`: テンプレートが存在しない、またはコピー先に書き込めない
/// - `WorksheetMissing` / `ColumnNotFound` / `MalformedTemplate`: テンプレートの構造が想定と異なる
/// - `NameCollision`: 異なる複合型が同じファイル名に対応する
/// - `TypeConversion`: 上記のいずれかを、失敗した型と段階の情報で包んだもの
///
/// # 使用例
///
/// ```rust,no_run
/// use xsd_logical_model::{LogicalModelError, SchemaSet};
///
/// fn load(path: &str) -> Result<SchemaSet, LogicalModelError> {
///     let set = SchemaSet::load(path)?;
///     Ok(set)
/// }
/// ```
#[derive(Error, Debug)]
pub enum LogicalModelError {
    /// I/O操作中に発生したエラー
    ///
    /// `#[from]`属性により、`std::io::Error`から自動的に変換されます。
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// OOXMLワークブックの読み込み中に発生したエラー（calamine由来）
    #[error("Failed to read workbook: {0}")]
    Parse(#[from] calamine::Error),

    /// UTF-8文字列の変換エラー
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// ZIPアーカイブの読み書きエラー
    #[error("ZIP archive error: {0}")]
    Zip(String),

    /// XMLの読み書きエラー
    #[error("XML error: {0}")]
    Xml(String),

    /// XSDとして解釈できない入力
    #[error("Invalid schema '{location}': {message}")]
    Schema {
        /// スキーマの場所（ファイルパス、または `<inline>`）
        location: String,
        /// エラーの詳細
        message: String,
    },

    /// 設定の検証に失敗したエラー
    ///
    /// `GeneratorBuilder::build()`時に、必須設定の欠落や
    /// 存在しない出力ディレクトリが検出された場合に発生します。
    #[error("Configuration error: {0}")]
    Config(String),

    /// テンプレートのコピーに失敗したエラー
    #[error("Failed to copy template '{}' to '{}': {source}", template.display(), target.display())]
    TemplateCopy {
        /// コピー元テンプレート
        template: PathBuf,
        /// コピー先
        target: PathBuf,
        /// 元のI/Oエラー
        source: std::io::Error,
    },

    /// "Data Elements" シートが存在しない（不正なテンプレート）
    #[error("Malformed template '{}': worksheet '{sheet}' not found", path.display())]
    WorksheetMissing {
        /// ワークブックのパス
        path: PathBuf,
        /// 探したシート名
        sheet: String,
    },

    /// ヘッダー行に必要な列が存在しない（テンプレートスキーマ不一致）
    #[error("Template schema mismatch in '{}': column '{column}' not found in header row", path.display())]
    ColumnNotFound {
        /// ワークブックのパス
        path: PathBuf,
        /// 見つからなかった列ラベル
        column: String,
    },

    /// テンプレートの構造が不正、またはサポートされない形式
    #[error("Malformed template '{}': {message}", path.display())]
    MalformedTemplate {
        /// ワークブックのパス
        path: PathBuf,
        /// エラーの詳細
        message: String,
    },

    /// 異なる複合型が同じ論理モデル名に対応する
    #[error("Name collision: complex types '{first}' and '{second}' both map to '{logical_name}'")]
    NameCollision {
        /// 小文字化後の論理モデル名
        logical_name: String,
        /// 先に処理された型
        first: String,
        /// 衝突した型
        second: String,
    },

    /// セキュリティ制限に違反したエラー
    ///
    /// テンプレートのサイズ上限、ZIPエントリ数や展開サイズの上限、
    /// パストラバーサルを含むエントリ名などで発生します。
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// 1つの複合型の変換に失敗したエラー
    ///
    /// 失敗した型名、段階、その時点までに変換済みの型数を保持します。
    #[error("Conversion of complex type '{type_name}' failed during {stage} ({converted} of {total} types processed): {source}")]
    TypeConversion {
        /// 失敗した複合型の名前
        type_name: String,
        /// 失敗した段階
        stage: Stage,
        /// 失敗前に変換が完了した型の数
        converted: usize,
        /// スキーマセット内の複合型の総数
        total: usize,
        /// 元のエラー
        source: Box<LogicalModelError>,
    },
}

impl LogicalModelError {
    /// `TypeConversion`で包まれている場合、元のエラーを返す
    ///
    /// 包まれていない場合は自身を返します。
    pub fn root_cause(&self) -> &LogicalModelError {
        match self {
            LogicalModelError::TypeConversion { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<quick_xml::Error> for LogicalModelError {
    fn from(e: quick_xml::Error) -> Self {
        LogicalModelError::Xml(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for LogicalModelError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        LogicalModelError::Xml(format!("XML attribute error: {}", e))
    }
}

impl From<zip::result::ZipError> for LogicalModelError {
    fn from(e: zip::result::ZipError) -> Self {
        LogicalModelError::Zip(e.to_string())
    }
}
