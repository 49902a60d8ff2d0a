//! Markup Splicing
//!
//! XMLを再シリアライズせずに部分的に書き換えるための補助機能。
//! quick-xmlのバイト位置から開始タグの範囲を記録し、
//! 変更が必要な範囲だけを差し替えます。差し替え範囲外のバイト列は元のまま保持されます。

use quick_xml::escape::unescape;
use quick_xml::events::BytesStart;

use crate::error::LogicalModelError;

/// 文書中のバイト範囲 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// 長さ0の範囲（挿入位置）
    pub fn at(offset: usize) -> Self {
        Self::new(offset, offset)
    }
}

/// 属性（生の値とエスケープ解除済みの値）
#[derive(Debug, Clone)]
pub(crate) struct TagAttribute {
    /// 修飾名（例: `ss:Index`）
    pub key: String,
    /// 文書に書かれたままの値（エスケープ済み）
    pub raw: String,
    /// エスケープ解除済みの値
    pub value: String,
}

impl TagAttribute {
    /// 接頭辞を除いた属性名
    pub fn local_name(&self) -> &str {
        local_part(&self.key)
    }
}

/// 記録された開始タグ
#[derive(Debug, Clone)]
pub(crate) struct StartTag {
    /// 修飾名（例: `ss:Cell`）
    pub name: String,
    pub attributes: Vec<TagAttribute>,
    /// `<x/>` 形式かどうか
    pub self_closing: bool,
    /// タグ自身の範囲
    pub span: Span,
}

impl StartTag {
    /// quick-xmlの開始タグから生成
    pub fn capture(e: &BytesStart<'_>, span: Span, self_closing: bool) -> Result<Self, LogicalModelError> {
        let name = std::str::from_utf8(e.name().as_ref())?.to_string();

        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let raw = std::str::from_utf8(&attr.value)?.to_string();
            let value = unescape(&raw)
                .map_err(|e| LogicalModelError::Xml(format!("XML escape error: {}", e)))?
                .into_owned();
            attributes.push(TagAttribute { key, raw, value });
        }

        Ok(Self {
            name,
            attributes,
            self_closing,
            span,
        })
    }

    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    /// 要素名の接頭辞（`ss:Cell` → `Some("ss")`）
    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    /// ローカル名で属性値（エスケープ解除済み）を取得
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.local_name() == local)
            .map(|a| a.value.as_str())
    }

    /// 属性を差し替えてタグを再構築する
    ///
    /// # 引数
    ///
    /// * `remove` - 取り除く属性のローカル名
    /// * `add` - 末尾に追加する属性（修飾名と、エスケープ前の値）
    /// * `self_closing` - `/>` で閉じるかどうか
    pub fn render(&self, remove: &[&str], add: &[(String, String)], self_closing: bool) -> String {
        let mut out = String::with_capacity(self.span.end - self.span.start + 32);
        out.push('<');
        out.push_str(&self.name);

        for attr in &self.attributes {
            if remove.contains(&attr.local_name()) {
                continue;
            }
            out.push(' ');
            out.push_str(&attr.key);
            out.push_str("=\"");
            // 一重引用符で書かれていた値に含まれる `"` を保護する
            out.push_str(&attr.raw.replace('"', "&quot;"));
            out.push('"');
        }

        for (key, value) in add {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape_text(value));
            out.push('"');
        }

        out.push_str(if self_closing { "/>" } else { ">" });
        out
    }
}

/// 文書への差し替え操作の集合
#[derive(Debug, Default)]
pub(crate) struct Splice {
    edits: Vec<(Span, String)>,
}

impl Splice {
    pub fn new() -> Self {
        Self::default()
    }

    /// 範囲を置き換える（長さ0の範囲なら挿入）
    pub fn replace(&mut self, span: Span, replacement: String) {
        self.edits.push((span, replacement));
    }

    /// すべての差し替えを適用した文書を返す
    ///
    /// 範囲が重なっている場合はエラーを返します。
    pub fn apply(mut self, source: &str) -> Result<String, LogicalModelError> {
        self.edits.sort_by_key(|(span, _)| (span.start, span.end));

        let mut out = String::with_capacity(source.len() + 256);
        let mut cursor = 0;
        for (span, replacement) in &self.edits {
            if span.start < cursor || span.end > source.len() || span.start > span.end {
                return Err(LogicalModelError::Xml(format!(
                    "overlapping or out-of-range edit at {}..{}",
                    span.start, span.end
                )));
            }
            out.push_str(&source[cursor..span.start]);
            out.push_str(replacement);
            cursor = span.end;
        }
        out.push_str(&source[cursor..]);
        Ok(out)
    }
}

/// 接頭辞を付けた修飾名を組み立てる
pub(crate) fn qualified(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{}:{}", p, local),
        _ => local.to_string(),
    }
}

/// テキスト・属性値用のXMLエスケープ
pub(crate) fn escape_text(value: &str) -> String {
    quick_xml::escape::escape(value).into_owned()
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}
