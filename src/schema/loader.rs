//! XSD Loader
//!
//! quick-xmlの名前空間対応リーダーでXSD文書を読み、
//! トップレベルの名前付き型定義と `schemaLocation` 参照を抽出します。

use std::collections::HashSet;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use crate::error::LogicalModelError;

/// XML Schemaの名前空間
pub(crate) const XS_NAMESPACE: &[u8] = b"http://www.w3.org/2001/XMLSchema";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParsedTypeKind {
    Complex,
    Simple,
}

/// 解析済みの型定義（ID割り当て前）
#[derive(Debug, Clone)]
pub(crate) struct ParsedType {
    pub kind: ParsedTypeKind,
    pub name: String,
    pub documentation: Option<String>,
    pub base: Option<String>,
    pub is_abstract: bool,
}

/// 解析済みのXSD文書
#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedSchema {
    pub target_namespace: Option<String>,
    pub types: Vec<ParsedType>,
    /// include / import / redefine / override の `schemaLocation`（出現順）
    pub references: Vec<String>,
}

/// 要素スタックの1段
///
/// XSD名前空間に属さない要素（`xs:documentation`内のXHTMLなど）は `None` として積みます。
type Frame = Option<String>;

/// XSD文書を解析
///
/// # 引数
///
/// * `text` - XSD文書
/// * `location` - エラーメッセージ用の文書の場所
///
/// # 戻り値
///
/// * `Ok(ParsedSchema)` - 解析に成功した場合
/// * `Err(LogicalModelError::Schema)` - XMLとして不正、ルートが `xs:schema` でない、
///   型名の欠落や重複がある場合
pub(crate) fn parse_schema(text: &str, location: &str) -> Result<ParsedSchema, LogicalModelError> {
    let schema_error = |message: String| LogicalModelError::Schema {
        location: location.to_string(),
        message,
    };

    let mut reader = NsReader::from_str(text);
    reader.trim_text(true);
    reader.expand_empty_elements(true);

    let mut parsed = ParsedSchema::default();
    let mut seen_names: HashSet<String> = HashSet::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut current: Option<ParsedType> = None;
    let mut documentation: Option<String> = None;
    let mut in_documentation = false;
    let mut root_seen = false;

    loop {
        let (resolved, event) = reader
            .read_resolved_event()
            .map_err(|e| schema_error(format!("XML parse error: {}", e)))?;

        match event {
            Event::Start(e) => {
                let local = xs_local_name(&resolved, &e)?;

                if !root_seen {
                    root_seen = true;
                    if local.as_deref() != Some("schema") {
                        return Err(schema_error(
                            "root element is not an XML Schema 'schema' element".to_string(),
                        ));
                    }
                    parsed.target_namespace = attribute(&e, b"targetNamespace")?;
                    stack.push(local);
                    continue;
                }

                let depth = stack.len();
                match (depth, local.as_deref()) {
                    // schema直下の名前付き型
                    (1, Some(kind @ ("complexType" | "simpleType"))) => {
                        let name = attribute(&e, b"name")?.ok_or_else(|| {
                            schema_error(format!("top-level {} without a name", kind))
                        })?;
                        if !seen_names.insert(name.clone()) {
                            return Err(schema_error(format!("duplicate type name '{}'", name)));
                        }
                        current = Some(ParsedType {
                            kind: if kind == "complexType" {
                                ParsedTypeKind::Complex
                            } else {
                                ParsedTypeKind::Simple
                            },
                            name,
                            documentation: None,
                            base: None,
                            is_abstract: attribute(&e, b"abstract")?
                                .map(|v| v == "true" || v == "1")
                                .unwrap_or(false),
                        });
                        documentation = None;
                    }
                    // schema直下の参照
                    (1, Some("include" | "import" | "redefine" | "override")) => {
                        if let Some(schema_location) = attribute(&e, b"schemaLocation")? {
                            parsed.references.push(schema_location);
                        }
                    }
                    // 型直下の annotation/documentation（最初の1つのみ）
                    (3, Some("documentation"))
                        if current.is_some()
                            && stack[2].as_deref() == Some("annotation")
                            && documentation.is_none() =>
                    {
                        in_documentation = true;
                        documentation = Some(String::new());
                    }
                    // complexType/(complexContent|simpleContent)/(extension|restriction)
                    (3, Some("extension" | "restriction"))
                        if matches!(
                            stack[2].as_deref(),
                            Some("complexContent" | "simpleContent")
                        ) =>
                    {
                        if let Some(t) = current.as_mut() {
                            if t.kind == ParsedTypeKind::Complex && t.base.is_none() {
                                t.base = attribute(&e, b"base")?;
                            }
                        }
                    }
                    // simpleType/restriction
                    (2, Some("restriction")) => {
                        if let Some(t) = current.as_mut() {
                            if t.kind == ParsedTypeKind::Simple && t.base.is_none() {
                                t.base = attribute(&e, b"base")?;
                            }
                        }
                    }
                    _ => {}
                }

                stack.push(local);
            }
            Event::Text(e) if in_documentation => {
                let text = e
                    .unescape()
                    .map_err(|e| schema_error(format!("XML text error: {}", e)))?;
                append_text(&mut documentation, &text);
            }
            Event::CData(e) if in_documentation => {
                let text = std::str::from_utf8(&e)?;
                append_text(&mut documentation, text);
            }
            Event::End(_) => {
                let depth = stack.len();
                stack.pop();

                if in_documentation && depth == 4 {
                    in_documentation = false;
                }

                if depth == 2 {
                    if let Some(mut t) = current.take() {
                        t.documentation = documentation.take().filter(|d| !d.is_empty());
                        parsed.types.push(t);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !root_seen {
        return Err(schema_error("document has no root element".to_string()));
    }

    Ok(parsed)
}

/// XSD名前空間に属する要素のローカル名を返す
fn xs_local_name(
    resolved: &ResolveResult<'_>,
    e: &BytesStart<'_>,
) -> Result<Option<String>, LogicalModelError> {
    match resolved {
        ResolveResult::Bound(ns) if ns.as_ref() == XS_NAMESPACE => {
            let local = e.local_name();
            Ok(Some(std::str::from_utf8(local.as_ref())?.to_string()))
        }
        _ => Ok(None),
    }
}

/// 接頭辞なし属性の値を取得（エスケープ解除済み）
fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, LogicalModelError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            let raw = std::str::from_utf8(&attr.value)?;
            let value = unescape(raw)
                .map_err(|e| LogicalModelError::Xml(format!("XML escape error: {}", e)))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn append_text(target: &mut Option<String>, text: &str) {
    if let Some(buffer) = target.as_mut() {
        if !buffer.is_empty() && !text.is_empty() {
            buffer.push(' ');
        }
        buffer.push_str(text);
    }
}
