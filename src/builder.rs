//! Builder Module
//!
//! Fluent Builder APIを提供し、`LogicalModelGenerator`インスタンスを段階的に構築する。
//! 変換処理の本体（`LogicalModelGenerator::convert`）と、
//! 1回の変換実行の状態を保持する`ConversionRun`もこのモジュールで定義します。

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::api::{CollisionPolicy, Stage};
use crate::error::LogicalModelError;
use crate::schema::{ComplexType, SchemaSet, TypeId};
use crate::security::SecurityConfig;
use crate::template::{logical_model_name, ArtifactPaths, TemplateSet, DEFAULT_TEMPLATES_SUBPATH};
use crate::workbook::{populate_logical_model, ColumnIndices};

/// 変換処理の設定を保持する内部構造体
#[derive(Debug, Clone)]
pub(crate) struct GeneratorConfig {
    /// 変換対象のスキーマセット
    pub schema_set: SchemaSet,

    /// FHIRディレクトリ（テンプレートの基準ディレクトリ）
    pub fhir_directory: PathBuf,

    /// 出力ディレクトリ
    pub target_directory: PathBuf,

    /// FHIRディレクトリからテンプレートディレクトリへの相対パス
    pub templates_subpath: PathBuf,

    /// 論理モデル名の衝突時の方針
    pub collision_policy: CollisionPolicy,

    /// テンプレートワークブックのセキュリティ制限
    pub security: SecurityConfig,
}

/// Fluent Builder APIを提供する構造体
///
/// `LogicalModelGenerator`インスタンスを段階的に構築するためのビルダーです。
/// スキーマセット、FHIRディレクトリ、出力ディレクトリの指定は必須です。
///
/// # 使用例
///
/// ```rust,no_run
/// use xsd_logical_model::{GeneratorBuilder, SchemaSet};
///
/// # fn main() -> Result<(), xsd_logical_model::LogicalModelError> {
/// let generator = GeneratorBuilder::new()
///     .with_source_schema_set(SchemaSet::load("schema/observation.xsd")?)
///     .with_fhir_directory("fhir")
///     .with_target_directory("out")
///     .build()?;
/// let report = generator.convert()?;
/// println!("{} logical models", report.converted.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct GeneratorBuilder {
    schema_set: Option<SchemaSet>,
    fhir_directory: Option<PathBuf>,
    target_directory: Option<PathBuf>,
    templates_subpath: PathBuf,
    collision_policy: CollisionPolicy,
    security: SecurityConfig,
}

impl Default for GeneratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneratorBuilder {
    /// デフォルト設定を持つビルダーインスタンスを生成する
    ///
    /// # デフォルト設定
    ///
    /// - テンプレートのサブパス: `source/templates`
    /// - 衝突時の方針: `CollisionPolicy::Error`
    pub fn new() -> Self {
        Self {
            schema_set: None,
            fhir_directory: None,
            target_directory: None,
            templates_subpath: PathBuf::from(DEFAULT_TEMPLATES_SUBPATH),
            collision_policy: CollisionPolicy::default(),
            security: SecurityConfig::default(),
        }
    }

    /// 変換対象のスキーマセットを設定する（必須）
    pub fn with_source_schema_set(mut self, schema_set: SchemaSet) -> Self {
        self.schema_set = Some(schema_set);
        self
    }

    /// FHIRディレクトリを設定する（必須）
    ///
    /// テンプレートは `<fhir_directory>/<templates_subpath>/` から読み込まれます。
    pub fn with_fhir_directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.fhir_directory = Some(path.into());
        self
    }

    /// 出力ディレクトリを設定する（必須）
    ///
    /// ディレクトリは`build()`の時点で存在している必要があります。
    pub fn with_target_directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.target_directory = Some(path.into());
        self
    }

    /// テンプレートディレクトリのサブパスを設定する
    ///
    /// # 引数
    ///
    /// * `subpath` - FHIRディレクトリからの相対パス（デフォルト: `source/templates`）
    ///
    /// # 使用例
    ///
    /// ```rust
    /// use xsd_logical_model::GeneratorBuilder;
    ///
    /// let builder = GeneratorBuilder::new().with_templates_subpath("build/templates");
    /// ```
    pub fn with_templates_subpath<P: Into<PathBuf>>(mut self, subpath: P) -> Self {
        self.templates_subpath = subpath.into();
        self
    }

    /// 論理モデル名の衝突時の方針を設定する
    ///
    /// # 使用例
    ///
    /// ```rust
    /// use xsd_logical_model::{CollisionPolicy, GeneratorBuilder};
    ///
    /// let builder = GeneratorBuilder::new()
    ///     .with_collision_policy(CollisionPolicy::OverwriteLastWins);
    /// ```
    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_security_config(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    /// 設定を検証し、`LogicalModelGenerator`インスタンスを生成する
    ///
    /// # 戻り値
    ///
    /// * `Ok(LogicalModelGenerator)`: 設定が有効な場合
    /// * `Err(LogicalModelError::Config)`: 設定が無効な場合
    ///
    /// # 発生し得るエラー
    ///
    /// * `LogicalModelError::Config(String)`: 設定の検証に失敗した場合
    ///   * 必須項目（スキーマセット、FHIRディレクトリ、出力ディレクトリ）が未設定
    ///   * 出力ディレクトリが存在しない、またはディレクトリではない
    ///   * テンプレートのサブパスが絶対パス、または空
    pub fn build(self) -> Result<LogicalModelGenerator, LogicalModelError> {
        // 1. 必須項目の検証
        let schema_set = self.schema_set.ok_or_else(|| {
            LogicalModelError::Config("source schema set is required".to_string())
        })?;
        let fhir_directory = self
            .fhir_directory
            .ok_or_else(|| LogicalModelError::Config("FHIR directory is required".to_string()))?;
        let target_directory = self.target_directory.ok_or_else(|| {
            LogicalModelError::Config("target directory is required".to_string())
        })?;

        // 2. 出力ディレクトリの検証
        if !target_directory.is_dir() {
            return Err(LogicalModelError::Config(format!(
                "target directory does not exist or is not a directory: {}",
                target_directory.display()
            )));
        }

        // 3. テンプレートのサブパスの検証
        if self.templates_subpath.as_os_str().is_empty() {
            return Err(LogicalModelError::Config(
                "templates subpath must not be empty".to_string(),
            ));
        }
        if self.templates_subpath.is_absolute() {
            return Err(LogicalModelError::Config(format!(
                "templates subpath must be relative to the FHIR directory: {}",
                self.templates_subpath.display()
            )));
        }

        // 4. LogicalModelGeneratorインスタンス生成
        Ok(LogicalModelGenerator::new(GeneratorConfig {
            schema_set,
            fhir_directory,
            target_directory,
            templates_subpath: self.templates_subpath,
            collision_policy: self.collision_policy,
            security: self.security,
        }))
    }
}

/// 変換済みの複合型
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertedType {
    /// 型の識別子
    pub type_id: TypeId,
    /// 複合型名（大文字小文字はそのまま）
    pub name: String,
    /// 論理モデル名（ファイル名の接頭辞）
    pub logical_name: String,
    /// 生成された成果物
    pub artifacts: ArtifactPaths,
    /// 解決されたヘッダー列の位置
    pub columns: ColumnIndices,
}

/// 変換結果の集計
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionReport {
    /// 走査した複合型の数（重複を含む）
    pub total_complex_types: usize,
    /// 変換した複合型（処理順）
    pub converted: Vec<ConvertedType>,
    /// 処理済みのため読み飛ばした数
    pub skipped_duplicates: usize,
    /// 単純型のため読み飛ばした数
    pub skipped_non_complex: usize,
}

/// XSD複合型から論理モデルの成果物を生成するファサード
///
/// `GeneratorBuilder`を使用して構築された設定に基づいて変換処理を実行します。
#[derive(Debug)]
pub struct LogicalModelGenerator {
    config: GeneratorConfig,
    templates: TemplateSet,
}

impl LogicalModelGenerator {
    pub(crate) fn new(config: GeneratorConfig) -> Self {
        let templates = TemplateSet::new(&config.fhir_directory, &config.templates_subpath);
        Self { config, templates }
    }

    /// 変換対象のスキーマセット
    pub fn schema_set(&self) -> &SchemaSet {
        &self.config.schema_set
    }

    /// 出力ディレクトリ
    pub fn target_directory(&self) -> &Path {
        &self.config.target_directory
    }

    /// テンプレートディレクトリ
    pub fn templates_directory(&self) -> &Path {
        self.templates.directory()
    }

    /// スキーマセット内のすべての複合型を変換する
    ///
    /// # 戻り値
    ///
    /// * `Ok(ConversionReport)` - すべての複合型の変換に成功した場合
    /// * `Err(LogicalModelError::TypeConversion)` - 最初に失敗した型と段階を含むエラー
    ///
    /// # 処理フロー
    ///
    /// 1. 変換実行（処理済み型の記録）を開始
    /// 2. スキーマごと、宣言順に型定義を走査
    ///    - 複合型: 変換（処理済みの型は読み飛ばす）
    ///    - 単純型: 読み飛ばす
    /// 3. 集計を返す
    ///
    /// 失敗した時点で処理を中断し、再試行は行いません。
    pub fn convert(&self) -> Result<ConversionReport, LogicalModelError> {
        let mut run = self.start_run();

        for schema in self.config.schema_set.schemas() {
            tracing::debug!(
                location = ?schema.location(),
                target_namespace = ?schema.target_namespace(),
                types = schema.len(),
                "processing schema"
            );

            for definition in schema.types() {
                match definition.as_complex() {
                    Some(complex) => {
                        run.convert_type(complex)?;
                    }
                    None => run.skip_non_complex(),
                }
            }
        }

        Ok(run.finish())
    }

    /// 変換実行を開始する
    ///
    /// 処理済み型の記録は実行ごとに空の状態から始まり、`finish()`で破棄されます。
    pub fn start_run(&self) -> ConversionRun<'_> {
        tracing::info!(
            schemas = self.config.schema_set.len(),
            complex_types = self.config.schema_set.complex_type_count(),
            target = %self.config.target_directory.display(),
            "starting logical model generation"
        );

        ConversionRun {
            generator: self,
            registry: HashSet::new(),
            logical_names: HashMap::new(),
            report: ConversionReport::default(),
        }
    }
}

/// 1回の変換実行の状態
///
/// 処理済みの型（`TypeId`）と、割り当て済みの論理モデル名を保持します。
#[derive(Debug)]
pub struct ConversionRun<'g> {
    generator: &'g LogicalModelGenerator,
    registry: HashSet<TypeId>,
    /// 論理モデル名 → (割り当てた型, 修飾名)
    logical_names: HashMap<String, (TypeId, String)>,
    report: ConversionReport,
}

impl<'g> ConversionRun<'g> {
    /// 1つの複合型を変換する
    ///
    /// 処理済みの型は副作用なしで読み飛ばし、`Ok(None)`を返します。
    /// 型は成果物の生成より前に処理済みとして記録されるため、
    /// 途中で失敗した型もこの実行内で再処理されることはありません。
    ///
    /// # 戻り値
    ///
    /// * `Ok(Some(ConvertedType))` - 変換した場合
    /// * `Ok(None)` - 処理済みのため読み飛ばした場合
    /// * `Err(LogicalModelError::TypeConversion)` - 変換に失敗した場合
    pub fn convert_type(
        &mut self,
        complex: &ComplexType,
    ) -> Result<Option<ConvertedType>, LogicalModelError> {
        self.report.total_complex_types += 1;

        // 1. 処理済みの確認と記録（副作用より前）
        if !self.registry.insert(complex.id()) {
            self.report.skipped_duplicates += 1;
            tracing::debug!(type_name = complex.name(), id = %complex.id(), "already converted");
            return Ok(None);
        }

        let generator = self.generator;
        let config = &generator.config;
        let converted = self.report.converted.len();
        let total = config.schema_set.complex_type_count();
        let wrap = |stage: Stage| {
            move |source: LogicalModelError| LogicalModelError::TypeConversion {
                type_name: complex.name().to_string(),
                stage,
                converted,
                total,
                source: Box::new(source),
            }
        };

        // 2. 論理モデル名の決定
        let logical_name = self
            .assign_logical_name(complex)
            .map_err(wrap(Stage::NameResolution))?;

        // 3. テンプレートのコピー
        let artifacts = generator
            .templates
            .instantiate(&config.target_directory, &logical_name)
            .map_err(wrap(Stage::TemplateCopy))?;

        // 4. スプレッドシートへの書き込み
        let columns = populate_logical_model(&artifacts.spreadsheet, complex.name(), &config.security)
            .map_err(wrap(Stage::WorkbookPopulation))?;

        tracing::info!(
            type_name = complex.name(),
            logical_name = %logical_name,
            spreadsheet = %artifacts.spreadsheet.display(),
            "generated logical model"
        );

        let result = ConvertedType {
            type_id: complex.id(),
            name: complex.name().to_string(),
            logical_name,
            artifacts,
            columns,
        };
        self.report.converted.push(result.clone());
        Ok(Some(result))
    }

    /// 単純型などの変換対象外の定義を記録する
    pub fn skip_non_complex(&mut self) {
        self.report.skipped_non_complex += 1;
    }

    /// 処理済みかどうか
    pub fn is_converted(&self, id: TypeId) -> bool {
        self.registry.contains(&id)
    }

    /// 変換実行を終了し、集計を返す
    pub fn finish(self) -> ConversionReport {
        tracing::info!(
            converted = self.report.converted.len(),
            skipped_duplicates = self.report.skipped_duplicates,
            skipped_non_complex = self.report.skipped_non_complex,
            "logical model generation finished"
        );
        self.report
    }

    fn assign_logical_name(&mut self, complex: &ComplexType) -> Result<String, LogicalModelError> {
        let logical_name = logical_model_name(complex.name());

        if let Some((owner, first)) = self.logical_names.get(&logical_name) {
            if *owner != complex.id() {
                match self.generator.config.collision_policy {
                    CollisionPolicy::Error => {
                        return Err(LogicalModelError::NameCollision {
                            logical_name,
                            first: first.clone(),
                            second: complex.qualified_name(),
                        });
                    }
                    CollisionPolicy::OverwriteLastWins => {
                        tracing::warn!(
                            logical_name = %logical_name,
                            first = %first,
                            second = %complex.qualified_name(),
                            "logical model name collision, overwriting earlier artifacts"
                        );
                    }
                }
            }
        }

        self.logical_names.insert(
            logical_name.clone(),
            (complex.id(), complex.qualified_name()),
        );
        Ok(logical_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TemplateKind;
    use std::fs;

    const SPREADSHEET_TEMPLATE: &str = r#"<?xml version="1.0"?>
<Workbook xmlns="urn:schemas-microsoft-com:office:spreadsheet"
 xmlns:ss="urn:schemas-microsoft-com:office:spreadsheet">
 <Worksheet ss:Name="Data Elements">
  <Table>
   <Row>
    <Cell><Data ss:Type="String">Element</Data></Cell>
    <Cell><Data ss:Type="String">Type</Data></Cell>
    <Cell><Data ss:Type="String">Short Label</Data></Cell>
    <Cell><Data ss:Type="String">Definition</Data></Cell>
   </Row>
  </Table>
 </Worksheet>
</Workbook>"#;

    struct Fixture {
        fhir: tempfile::TempDir,
        target: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let fhir = tempfile::tempdir().unwrap();
            let templates = fhir.path().join(DEFAULT_TEMPLATES_SUBPATH);
            fs::create_dir_all(&templates).unwrap();
            fs::write(
                templates.join("template-spreadsheet.xml"),
                SPREADSHEET_TEMPLATE,
            )
            .unwrap();
            fs::write(templates.join("template-introduction.xml"), "<intro/>").unwrap();
            fs::write(templates.join("template-notes.xml"), "<notes/>").unwrap();

            Self {
                fhir,
                target: tempfile::tempdir().unwrap(),
            }
        }

        fn builder(&self, schema_set: SchemaSet) -> GeneratorBuilder {
            GeneratorBuilder::new()
                .with_source_schema_set(schema_set)
                .with_fhir_directory(self.fhir.path())
                .with_target_directory(self.target.path())
        }
    }

    fn schema_set(xsd: &str) -> SchemaSet {
        SchemaSet::from_xsd_str(xsd).unwrap()
    }

    #[test]
    fn test_builder_requires_schema_set() {
        let dir = tempfile::tempdir().unwrap();
        let result = GeneratorBuilder::new()
            .with_fhir_directory(dir.path())
            .with_target_directory(dir.path())
            .build();
        assert!(matches!(result, Err(LogicalModelError::Config(_))));
    }

    #[test]
    fn test_builder_requires_existing_target_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = GeneratorBuilder::new()
            .with_source_schema_set(SchemaSet::new())
            .with_fhir_directory(dir.path())
            .with_target_directory(dir.path().join("missing"))
            .build();
        match result {
            Err(LogicalModelError::Config(message)) => {
                assert!(message.contains("target directory"));
            }
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_rejects_absolute_subpath() {
        let fixture = Fixture::new();
        let absolute = fixture.fhir.path().join("templates");
        let result = fixture
            .builder(SchemaSet::new())
            .with_templates_subpath(absolute)
            .build();
        assert!(matches!(result, Err(LogicalModelError::Config(_))));
    }

    #[test]
    fn test_builder_defaults() {
        let fixture = Fixture::new();
        let generator = fixture.builder(SchemaSet::new()).build().unwrap();
        assert_eq!(
            generator.templates_directory(),
            fixture.fhir.path().join("source/templates")
        );
        assert_eq!(generator.config.collision_policy, CollisionPolicy::Error);
        assert_eq!(generator.target_directory(), fixture.target.path());
    }

    #[test]
    fn test_convert_type_twice_has_single_side_effect() {
        let fixture = Fixture::new();
        let set = schema_set(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"><xs:complexType name="Patient"/></xs:schema>"#,
        );
        let generator = fixture.builder(set).build().unwrap();
        let complex = generator.schema_set().complex_types().next().unwrap().clone();

        let mut run = generator.start_run();
        let first = run.convert_type(&complex).unwrap();
        assert!(first.is_some());
        assert!(run.is_converted(complex.id()));

        // 出力を消しても、2回目は何も書き込まない
        let spreadsheet = fixture.target.path().join("patient-spreadsheet.xml");
        fs::remove_file(&spreadsheet).unwrap();
        let second = run.convert_type(&complex).unwrap();
        assert!(second.is_none());
        assert!(!spreadsheet.exists());

        let report = run.finish();
        assert_eq!(report.converted.len(), 1);
        assert_eq!(report.skipped_duplicates, 1);
        assert_eq!(report.total_complex_types, 2);
    }

    #[test]
    fn test_failed_type_stays_registered() {
        let fixture = Fixture::new();
        fs::remove_file(
            fixture
                .fhir
                .path()
                .join(DEFAULT_TEMPLATES_SUBPATH)
                .join(TemplateKind::Notes.file_name("template")),
        )
        .unwrap();
        let set = schema_set(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"><xs:complexType name="Patient"/></xs:schema>"#,
        );
        let generator = fixture.builder(set).build().unwrap();
        let complex = generator.schema_set().complex_types().next().unwrap().clone();

        let mut run = generator.start_run();
        match run.convert_type(&complex) {
            Err(LogicalModelError::TypeConversion {
                type_name,
                stage,
                converted,
                total,
                source,
            }) => {
                assert_eq!(type_name, "Patient");
                assert_eq!(stage, Stage::TemplateCopy);
                assert_eq!(converted, 0);
                assert_eq!(total, 1);
                assert!(matches!(*source, LogicalModelError::TemplateCopy { .. }));
            }
            other => panic!("Expected TypeConversion error, got {:?}", other),
        }

        // 失敗した型も処理済みとして扱われる
        assert!(run.is_converted(complex.id()));
        assert!(run.convert_type(&complex).unwrap().is_none());
    }

    #[test]
    fn test_name_collision_is_error_by_default() {
        let fixture = Fixture::new();
        let mut set = SchemaSet::new();
        set.add_xsd_str(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:a"><xs:complexType name="Patient"/></xs:schema>"#,
            None,
        )
        .unwrap();
        set.add_xsd_str(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:b"><xs:complexType name="PATIENT"/></xs:schema>"#,
            None,
        )
        .unwrap();

        let generator = fixture.builder(set).build().unwrap();
        let err = generator.convert().unwrap_err();
        match err.root_cause() {
            LogicalModelError::NameCollision {
                logical_name,
                first,
                second,
            } => {
                assert_eq!(logical_name, "patient");
                assert_eq!(first, "{urn:a}Patient");
                assert_eq!(second, "{urn:b}PATIENT");
            }
            other => panic!("Expected NameCollision, got {:?}", other),
        }
        assert!(matches!(
            err,
            LogicalModelError::TypeConversion {
                stage: Stage::NameResolution,
                converted: 1,
                total: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_name_collision_last_wins() {
        let fixture = Fixture::new();
        let mut set = SchemaSet::new();
        set.add_xsd_str(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"><xs:complexType name="Patient"/></xs:schema>"#,
            None,
        )
        .unwrap();
        set.add_xsd_str(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"><xs:complexType name="PATIENT"/></xs:schema>"#,
            None,
        )
        .unwrap();

        let generator = fixture
            .builder(set)
            .with_collision_policy(CollisionPolicy::OverwriteLastWins)
            .build()
            .unwrap();
        let report = generator.convert().unwrap();
        assert_eq!(report.converted.len(), 2);

        let written =
            fs::read_to_string(fixture.target.path().join("patient-spreadsheet.xml")).unwrap();
        assert!(written.contains(">PATIENT<"));
        assert!(!written.contains(">Patient<"));
    }

    #[test]
    fn test_security_limits_apply_to_copied_spreadsheet() {
        let fixture = Fixture::new();
        let set = schema_set(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"><xs:complexType name="Patient"/></xs:schema>"#,
        );
        let generator = fixture
            .builder(set)
            .with_security_config(SecurityConfig {
                max_input_file_size: 16,
                ..SecurityConfig::default()
            })
            .build()
            .unwrap();

        let err = generator.convert().unwrap_err();
        assert!(matches!(
            err.root_cause(),
            LogicalModelError::SecurityViolation(_)
        ));
    }
}
