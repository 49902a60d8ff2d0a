//! Schema Module
//!
//! XML Schema（XSD）の型定義を保持するデータモデルと、その読み込み処理を提供するモジュール。
//! 名前付きのトップレベル型（`xs:complexType` / `xs:simpleType`）のみを扱います。

mod loader;

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::LogicalModelError;
use loader::{ParsedSchema, ParsedType, ParsedTypeKind};

/// 型定義の識別子
///
/// スキーマ読み込み時に割り当てられる合成IDです。
/// `(スキーマセット内のスキーマ番号, スキーマ内の宣言順)` の組で、
/// 名前が同じでも別スキーマの型は異なるIDを持ちます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeId {
    /// スキーマセット内のスキーマ番号（0始まり）
    pub schema: usize,
    /// スキーマ内の宣言順（0始まり）
    pub ordinal: usize,
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema, self.ordinal)
    }
}

/// 複合型（`xs:complexType`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexType {
    id: TypeId,
    name: String,
    target_namespace: Option<String>,
    documentation: Option<String>,
    base: Option<String>,
    is_abstract: bool,
}

impl ComplexType {
    /// 読み込み時に割り当てられた識別子
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// 修飾なしの型名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 宣言したスキーマの `targetNamespace`
    pub fn target_namespace(&self) -> Option<&str> {
        self.target_namespace.as_deref()
    }

    /// 最初の `xs:annotation/xs:documentation` のテキスト
    pub fn documentation(&self) -> Option<&str> {
        self.documentation.as_deref()
    }

    /// `complexContent` / `simpleContent` の `extension` または `restriction` の `base`
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// `abstract="true"` が指定されているか
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// `{namespace}name` 形式の名前（名前空間がない場合は型名のみ）
    pub fn qualified_name(&self) -> String {
        qualify(self.target_namespace.as_deref(), &self.name)
    }
}

/// 単純型（`xs:simpleType`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleType {
    id: TypeId,
    name: String,
    target_namespace: Option<String>,
    base: Option<String>,
}

impl SimpleType {
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_namespace(&self) -> Option<&str> {
        self.target_namespace.as_deref()
    }

    /// `xs:restriction` の `base`
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }
}

/// スキーマに宣言された名前付きの型定義
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDefinition {
    Complex(ComplexType),
    Simple(SimpleType),
}

impl TypeDefinition {
    pub fn id(&self) -> TypeId {
        match self {
            TypeDefinition::Complex(t) => t.id,
            TypeDefinition::Simple(t) => t.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TypeDefinition::Complex(t) => &t.name,
            TypeDefinition::Simple(t) => &t.name,
        }
    }

    /// 複合型の場合のみ `Some` を返す
    pub fn as_complex(&self) -> Option<&ComplexType> {
        match self {
            TypeDefinition::Complex(t) => Some(t),
            TypeDefinition::Simple(_) => None,
        }
    }
}

/// 1つのXSD文書
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    location: Option<PathBuf>,
    target_namespace: Option<String>,
    types: Vec<TypeDefinition>,
}

impl Schema {
    /// 読み込み元のファイルパス（文字列から読み込んだ場合は `None`）
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn target_namespace(&self) -> Option<&str> {
        self.target_namespace.as_deref()
    }

    /// 宣言順の型定義
    pub fn types(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.iter()
    }

    /// 宣言順の複合型
    pub fn complex_types(&self) -> impl Iterator<Item = &ComplexType> {
        self.types.iter().filter_map(TypeDefinition::as_complex)
    }

    /// 型名で検索（完全一致）
    pub fn type_by_name(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.iter().find(|t| t.name() == name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// スキーマの集合
///
/// 変換処理の入力です。変換処理はこの集合を変更しません。
///
/// # 使用例
///
/// ```rust
/// use xsd_logical_model::SchemaSet;
///
/// # fn main() -> Result<(), xsd_logical_model::LogicalModelError> {
/// let set = SchemaSet::from_xsd_str(
///     r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
///          <xs:complexType name="Patient"/>
///          <xs:simpleType name="Code"><xs:restriction base="xs:string"/></xs:simpleType>
///        </xs:schema>"#,
/// )?;
/// assert_eq!(set.complex_type_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSet {
    schemas: Vec<Schema>,
}

impl SchemaSet {
    /// 空のスキーマセットを生成
    pub fn new() -> Self {
        Self::default()
    }

    /// XSDファイルと、そこから `schemaLocation` で参照されるすべての文書を読み込む
    ///
    /// `xs:include` / `xs:import` / `xs:redefine` / `xs:override` の
    /// `schemaLocation` を参照元ファイルのディレクトリからの相対パスとして解決します。
    /// 複数の経路から参照される文書は1回だけ読み込まれます。
    ///
    /// # 戻り値
    ///
    /// * `Ok(SchemaSet)` - ルート文書を先頭に、発見順に並んだスキーマセット
    /// * `Err(LogicalModelError::Schema)` - 文書が読めない、またはXSDとして不正な場合
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LogicalModelError> {
        let mut set = Self::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        queue.push_back(path.as_ref().to_path_buf());

        while let Some(next) = queue.pop_front() {
            let canonical = next.canonicalize().map_err(|e| LogicalModelError::Schema {
                location: next.display().to_string(),
                message: format!("cannot read schema document: {}", e),
            })?;
            if !visited.insert(canonical.clone()) {
                continue;
            }

            let text = std::fs::read_to_string(&canonical).map_err(|e| LogicalModelError::Schema {
                location: canonical.display().to_string(),
                message: format!("cannot read schema document: {}", e),
            })?;
            let parsed = loader::parse_schema(&text, &canonical.display().to_string())?;

            let base_dir = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
            for reference in &parsed.references {
                if reference.contains("://") {
                    tracing::warn!(
                        schema = %canonical.display(),
                        location = %reference,
                        "skipping remote schema reference"
                    );
                    continue;
                }
                queue.push_back(base_dir.join(reference));
            }

            tracing::debug!(
                schema = %canonical.display(),
                types = parsed.types.len(),
                "loaded schema document"
            );
            set.push_parsed(parsed, Some(canonical));
        }

        Ok(set)
    }

    /// 1つのXSD文書の文字列からスキーマセットを生成
    ///
    /// `schemaLocation` による参照は解決しません。
    pub fn from_xsd_str(text: &str) -> Result<Self, LogicalModelError> {
        let mut set = Self::new();
        set.add_xsd_str(text, None)?;
        Ok(set)
    }

    /// XSD文書の文字列を解析してセットに追加し、そのスキーマ番号を返す
    ///
    /// 新しいスキーマの型には、このスキーマ番号を持つ `TypeId` が割り当てられます。
    pub fn add_xsd_str(
        &mut self,
        text: &str,
        location: Option<&Path>,
    ) -> Result<usize, LogicalModelError> {
        let label = location
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<inline>".to_string());
        let parsed = loader::parse_schema(text, &label)?;
        Ok(self.push_parsed(parsed, location.map(Path::to_path_buf)))
    }

    /// 解析結果にIDを割り当てて追加
    fn push_parsed(&mut self, parsed: ParsedSchema, location: Option<PathBuf>) -> usize {
        let schema_index = self.schemas.len();
        let target_namespace = parsed.target_namespace;

        let types = parsed
            .types
            .into_iter()
            .enumerate()
            .map(|(ordinal, parsed_type)| {
                let id = TypeId {
                    schema: schema_index,
                    ordinal,
                };
                build_definition(id, parsed_type, target_namespace.clone())
            })
            .collect();

        self.schemas.push(Schema {
            location,
            target_namespace,
            types,
        });
        schema_index
    }

    /// 読み込み順のスキーマ
    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.iter()
    }

    /// すべてのスキーマの複合型（スキーマ順、宣言順）
    pub fn complex_types(&self) -> impl Iterator<Item = &ComplexType> {
        self.schemas.iter().flat_map(Schema::complex_types)
    }

    /// すべてのスキーマの複合型の数
    pub fn complex_type_count(&self) -> usize {
        self.complex_types().count()
    }

    /// IDで型定義を取得
    pub fn get(&self, id: TypeId) -> Option<&TypeDefinition> {
        self.schemas.get(id.schema)?.types.get(id.ordinal)
    }

    /// スキーマの数
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

fn build_definition(
    id: TypeId,
    parsed: ParsedType,
    target_namespace: Option<String>,
) -> TypeDefinition {
    match parsed.kind {
        ParsedTypeKind::Complex => TypeDefinition::Complex(ComplexType {
            id,
            name: parsed.name,
            target_namespace,
            documentation: parsed.documentation,
            base: parsed.base,
            is_abstract: parsed.is_abstract,
        }),
        ParsedTypeKind::Simple => TypeDefinition::Simple(SimpleType {
            id,
            name: parsed.name,
            target_namespace,
            base: parsed.base,
        }),
    }
}

fn qualify(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{{{}}}{}", ns, name),
        _ => name.to_string(),
    }
}
