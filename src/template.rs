//! Template Module
//!
//! テンプレート成果物のコピー（インスタンス化）と論理モデル名の決定を行うモジュール。

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::api::TemplateKind;
use crate::error::LogicalModelError;

/// テンプレートファイル名の接頭辞（`template-spreadsheet.xml` など）
pub(crate) const TEMPLATE_PREFIX: &str = "template";

/// テンプレートディレクトリの既定のサブパス（FHIRディレクトリからの相対パス）
pub const DEFAULT_TEMPLATES_SUBPATH: &str = "source/templates";

/// 複合型名から論理モデル名を決定する
///
/// ロケールに依存しないASCIIの小文字化のみを行います。
/// 単語境界の区切り文字は挿入しないため、`ObservationResult` は `observationresult` になります。
///
/// # 使用例
///
/// ```rust
/// use xsd_logical_model::logical_model_name;
///
/// assert_eq!(logical_model_name("ObservationResult"), "observationresult");
/// ```
pub fn logical_model_name(type_name: &str) -> String {
    type_name.to_ascii_lowercase()
}

/// 1つの複合型について生成された成果物のパス
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    /// `<name>-spreadsheet.xml`（値を書き込んだスプレッドシート）
    pub spreadsheet: PathBuf,
    /// `<name>-introduction.xml`
    pub introduction: PathBuf,
    /// `<name>-notes.xml`
    pub notes: PathBuf,
}

impl ArtifactPaths {
    /// 出力ディレクトリと論理モデル名からパスを組み立てる
    pub fn new(target_directory: &Path, logical_name: &str) -> Self {
        Self {
            spreadsheet: target_directory.join(TemplateKind::Spreadsheet.file_name(logical_name)),
            introduction: target_directory
                .join(TemplateKind::Introduction.file_name(logical_name)),
            notes: target_directory.join(TemplateKind::Notes.file_name(logical_name)),
        }
    }

    /// 種類ごとのパス
    pub fn get(&self, kind: TemplateKind) -> &Path {
        match kind {
            TemplateKind::Spreadsheet => &self.spreadsheet,
            TemplateKind::Introduction => &self.introduction,
            TemplateKind::Notes => &self.notes,
        }
    }
}

/// テンプレートディレクトリ
#[derive(Debug, Clone)]
pub(crate) struct TemplateSet {
    directory: PathBuf,
}

impl TemplateSet {
    /// `<fhir_directory>/<subpath>` をテンプレートディレクトリとする
    pub fn new(fhir_directory: &Path, subpath: &Path) -> Self {
        Self {
            directory: fhir_directory.join(subpath),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// コピー元テンプレートのパス
    pub fn template_path(&self, kind: TemplateKind) -> PathBuf {
        self.directory.join(kind.file_name(TEMPLATE_PREFIX))
    }

    /// 3種類のテンプレートを出力ディレクトリにコピーする
    ///
    /// 既存のファイルは確認なしで上書きされます。
    ///
    /// # 引数
    ///
    /// * `target_directory` - 出力ディレクトリ（存在している必要がある）
    /// * `logical_name` - 論理モデル名（ファイル名の接頭辞）
    ///
    /// # 戻り値
    ///
    /// * `Ok(ArtifactPaths)` - コピー先のパス
    /// * `Err(LogicalModelError::TemplateCopy)` - テンプレートが存在しない、またはコピー先に書き込めない場合
    pub fn instantiate(
        &self,
        target_directory: &Path,
        logical_name: &str,
    ) -> Result<ArtifactPaths, LogicalModelError> {
        let artifacts = ArtifactPaths::new(target_directory, logical_name);

        for kind in TemplateKind::ALL {
            let template = self.template_path(kind);
            let target = artifacts.get(kind);

            std::fs::copy(&template, target).map_err(|source| {
                LogicalModelError::TemplateCopy {
                    template: template.clone(),
                    target: target.to_path_buf(),
                    source,
                }
            })?;

            tracing::debug!(
                template = %template.display(),
                target = %target.display(),
                "copied template"
            );
        }

        Ok(artifacts)
    }
}
