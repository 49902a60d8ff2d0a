//! SpreadsheetML 2003 Backend
//!
//! XML Spreadsheet 2003形式（`urn:schemas-microsoft-com:office:spreadsheet`）の
//! テンプレートを読み書きするモジュール。
//!
//! `ss:Index` による列・行の飛び越し、`ss:MergeAcross` による結合セルを考慮して
//! セル位置を算出します。書き込みは対象の `<Row>` 要素と `<Table>` 開始タグの
//! 差し替えのみで行い、それ以外の部分（スタイル定義、他のシート等）は
//! バイト単位で保持されます。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;

use super::header::{HeaderCell, RowPatch};
use super::markup::{escape_text, qualified, Span, Splice, StartTag};
use crate::error::LogicalModelError;

/// SpreadsheetMLの名前空間URI
const SS_NAMESPACE: &str = "urn:schemas-microsoft-com:office:spreadsheet";

const BOM: &str = "\u{feff}";

/// 書き込み時に引き継がない属性（位置は再計算し、数式は値で置き換える）
const DROPPED_ON_WRITE: [&str; 3] = ["Index", "Formula", "ArrayRange"];

/// SpreadsheetML 2003文書
#[derive(Debug)]
pub(crate) struct SpreadsheetMlDocument {
    path: PathBuf,
    has_bom: bool,
    xml: String,
}

impl SpreadsheetMlDocument {
    /// バイト列から文書を構築する
    ///
    /// UTF-8（BOM付きも可）のみをサポートします。
    pub fn from_bytes(path: &Path, bytes: Vec<u8>) -> Result<Self, LogicalModelError> {
        let mut xml = String::from_utf8(bytes).map_err(|e| e.utf8_error())?;
        let has_bom = xml.starts_with(BOM);
        if has_bom {
            xml.drain(..BOM.len());
        }
        Ok(Self {
            path: path.to_path_buf(),
            has_bom,
            xml,
        })
    }

    /// 指定シートのヘッダー行（行0）を取得
    pub fn header_row(&self, sheet: &str) -> Result<Vec<HeaderCell>, LogicalModelError> {
        let layout = scan(&self.xml, sheet, &self.path)?;
        Ok(layout
            .header
            .cells
            .iter()
            .map(|cell| HeaderCell {
                col: cell.col,
                text: cell.text.clone(),
            })
            .collect())
    }

    /// 書き込み内容を適用した文書のバイト列を返す
    pub fn apply(&self, sheet: &str, patch: &RowPatch) -> Result<Vec<u8>, LogicalModelError> {
        let layout = scan(&self.xml, sheet, &self.path)?;
        let patched = render_patch(&self.xml, &layout, patch)?;

        let mut out = Vec::with_capacity(patched.len() + BOM.len());
        if self.has_bom {
            out.extend_from_slice(BOM.as_bytes());
        }
        out.extend_from_slice(patched.as_bytes());
        Ok(out)
    }
}

#[derive(Debug)]
struct CellEntry {
    col: u32,
    merge_across: u32,
    tag: StartTag,
    /// 要素全体の範囲
    outer: Span,
    text: Option<String>,
}

#[derive(Debug)]
struct RowEntry {
    index: u32,
    tag: StartTag,
    outer: Span,
    cells: Vec<CellEntry>,
}

#[derive(Debug)]
struct SheetLayout {
    ss_prefix: Option<String>,
    table: StartTag,
    header: RowEntry,
    data: Option<RowEntry>,
}

/// 文書を走査し、対象シートのヘッダー行とデータ行の位置を記録する
struct Scanner<'a> {
    sheet: &'a str,
    path: &'a Path,
    root_seen: bool,
    ss_prefix: Option<String>,
    sheet_found: bool,
    /// 対象 `<Worksheet>` の深さ（走査中のみ `Some`）
    sheet_depth: Option<usize>,
    finished: bool,
    table: Option<StartTag>,
    next_row: u32,
    next_col: u32,
    row: Option<RowEntry>,
    cell: Option<CellEntry>,
    /// `(文字列型かどうか, 収集中のテキスト)`
    data: Option<(bool, String)>,
    rows: Vec<RowEntry>,
}

impl<'a> Scanner<'a> {
    fn new(sheet: &'a str, path: &'a Path) -> Self {
        Self {
            sheet,
            path,
            root_seen: false,
            ss_prefix: None,
            sheet_found: false,
            sheet_depth: None,
            finished: false,
            table: None,
            next_row: 0,
            next_col: 0,
            row: None,
            cell: None,
            data: None,
            rows: Vec::new(),
        }
    }

    fn open(&mut self, tag: StartTag, depth: usize) -> Result<(), LogicalModelError> {
        if !self.root_seen {
            self.root_seen = true;
            if tag.local_name() != "Workbook" {
                return Err(malformed(
                    self.path,
                    format!("root element '{}' is not a SpreadsheetML Workbook", tag.name),
                ));
            }
            self.ss_prefix = tag
                .attributes
                .iter()
                .find(|a| a.key.starts_with("xmlns:") && a.value == SS_NAMESPACE)
                .map(|a| a.local_name().to_string());
            return Ok(());
        }

        let Some(sheet_depth) = self.sheet_depth else {
            if !self.sheet_found
                && depth == 2
                && tag.local_name() == "Worksheet"
                && tag.attr("Name") == Some(self.sheet)
            {
                self.sheet_found = true;
                self.sheet_depth = Some(depth);
            }
            return Ok(());
        };

        let relative = depth - sheet_depth;
        let local = tag.local_name().to_string();
        match (relative, local.as_str()) {
            (1, "Table") if self.table.is_none() => {
                self.table = Some(tag);
            }
            (2, "Row") if self.table.is_some() => {
                let index = match parse_index(&tag, self.path)? {
                    Some(index) => index,
                    None => self.next_row,
                };
                self.next_row = index.saturating_add(1);
                self.next_col = 0;
                // ヘッダー行とデータ行以外は記録しない
                self.row = (index <= 1).then(|| RowEntry {
                    index,
                    outer: tag.span,
                    tag,
                    cells: Vec::new(),
                });
            }
            (3, "Cell") if self.row.is_some() => {
                let col = match parse_index(&tag, self.path)? {
                    Some(col) => col,
                    None => self.next_col,
                };
                let merge_across = match tag.attr("MergeAcross") {
                    Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
                        malformed(self.path, format!("invalid MergeAcross value '{}'", raw))
                    })?,
                    None => 0,
                };
                self.next_col = col.saturating_add(merge_across).saturating_add(1);
                self.cell = Some(CellEntry {
                    col,
                    merge_across,
                    outer: tag.span,
                    tag,
                    text: None,
                });
            }
            (4, "Data") if self.cell.is_some() => {
                let is_string = tag.attr("Type") == Some("String");
                self.data = Some((is_string, String::new()));
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, depth: usize, end: usize) {
        let Some(sheet_depth) = self.sheet_depth else {
            return;
        };

        match depth - sheet_depth {
            0 => {
                self.sheet_depth = None;
                self.finished = true;
            }
            // </Table> 以降は走査不要
            1 if self.table.is_some() => {
                self.sheet_depth = None;
                self.finished = true;
            }
            2 => {
                if let Some(mut row) = self.row.take() {
                    row.outer.end = end;
                    self.rows.push(row);
                }
            }
            3 => {
                if let Some(mut cell) = self.cell.take() {
                    cell.outer.end = end;
                    if let Some(row) = self.row.as_mut() {
                        row.cells.push(cell);
                    }
                }
            }
            4 => {
                if let Some((is_string, text)) = self.data.take() {
                    if let Some(cell) = self.cell.as_mut() {
                        cell.text = is_string.then_some(text);
                    }
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some((_, buf)) = self.data.as_mut() {
            buf.push_str(text);
        }
    }

    fn into_layout(self) -> Result<SheetLayout, LogicalModelError> {
        if !self.sheet_found {
            return Err(LogicalModelError::WorksheetMissing {
                path: self.path.to_path_buf(),
                sheet: self.sheet.to_string(),
            });
        }

        let table = self.table.ok_or_else(|| {
            malformed(self.path, format!("worksheet '{}' has no Table element", self.sheet))
        })?;

        let mut header = None;
        let mut data = None;
        for row in self.rows {
            match row.index {
                0 if header.is_none() => header = Some(row),
                1 if data.is_none() => data = Some(row),
                _ => {}
            }
        }
        let header = header.ok_or_else(|| {
            malformed(self.path, format!("worksheet '{}' has no header row", self.sheet))
        })?;

        Ok(SheetLayout {
            ss_prefix: self.ss_prefix,
            table,
            header,
            data,
        })
    }
}

fn scan(xml: &str, sheet: &str, path: &Path) -> Result<SheetLayout, LogicalModelError> {
    let mut reader = Reader::from_str(xml);
    let mut scanner = Scanner::new(sheet, path);
    let mut depth = 0usize;

    while !scanner.finished {
        let start = reader.buffer_position();
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return Err(malformed(
                    path,
                    format!("invalid XML near byte {}: {}", reader.buffer_position(), e),
                ))
            }
        };
        let end = reader.buffer_position();

        match event {
            Event::Start(e) => {
                depth += 1;
                scanner.open(StartTag::capture(&e, Span::new(start, end), false)?, depth)?;
            }
            Event::Empty(e) => {
                scanner.open(StartTag::capture(&e, Span::new(start, end), true)?, depth + 1)?;
                scanner.close(depth + 1, end);
            }
            Event::End(_) => {
                scanner.close(depth, end);
                depth = depth.saturating_sub(1);
            }
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .map_err(|e| malformed(path, format!("invalid text content: {}", e)))?;
                scanner.text(&text);
            }
            Event::CData(e) => {
                scanner.text(std::str::from_utf8(&e)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    scanner.into_layout()
}

/// 1始まりの `ss:Index` 属性を0始まりに変換する
fn parse_index(tag: &StartTag, path: &Path) -> Result<Option<u32>, LogicalModelError> {
    match tag.attr("Index") {
        None => Ok(None),
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(index) if index >= 1 => Ok(Some(index - 1)),
            _ => Err(malformed(
                path,
                format!("invalid Index value '{}' on {}", raw, tag.name),
            )),
        },
    }
}

/// 既存セルと書き込みセルの組み合わせ
enum Piece<'a> {
    Keep(&'a CellEntry),
    Write {
        base: Option<&'a CellEntry>,
        value: &'a str,
    },
}

fn render_patch(
    xml: &str,
    layout: &SheetLayout,
    patch: &RowPatch,
) -> Result<String, LogicalModelError> {
    let ss = layout.ss_prefix.as_deref();
    let index_attr = qualified(ss, "Index");
    let type_attr = qualified(ss, "Type");
    let element_prefix = layout.header.tag.prefix();
    let cell_name = qualified(element_prefix, "Cell");
    let data_name = qualified(element_prefix, "Data");

    // 1. 既存セルと書き込みセルを列順に統合
    let mut pieces: BTreeMap<u32, Piece<'_>> = BTreeMap::new();
    if let Some(row) = &layout.data {
        for cell in &row.cells {
            pieces.insert(cell.col, Piece::Keep(cell));
        }
    }
    for (col, value) in patch.cells() {
        let base = match pieces.get(col) {
            Some(Piece::Keep(cell)) => Some(*cell),
            _ => None,
        };
        pieces.insert(
            *col,
            Piece::Write {
                base,
                value: value.as_str(),
            },
        );
    }

    // 2. データ行を再構築（すべてのセルに明示的な位置を付与）
    let mut body = String::new();
    let row_name = match &layout.data {
        Some(row) => {
            if row.tag.self_closing {
                body.push_str(&row.tag.render(&[], &[], false));
            } else {
                body.push_str(&xml[row.tag.span.start..row.tag.span.end]);
            }
            row.tag.name.clone()
        }
        None => {
            let name = qualified(element_prefix, "Row");
            body.push_str(&format!("<{}>", name));
            name
        }
    };

    // 結合範囲が他の書き込み列に掛かるセルは結合を解除する
    let covers_written = |cell: &CellEntry| {
        patch
            .cells()
            .iter()
            .any(|(c, _)| *c > cell.col && *c <= cell.col + cell.merge_across)
    };

    for (col, piece) in &pieces {
        let position = vec![(index_attr.clone(), (col + 1).to_string())];
        match piece {
            Piece::Keep(cell) => {
                let remove: &[&str] = if covers_written(cell) {
                    &["Index", "MergeAcross"]
                } else {
                    &["Index"]
                };
                body.push_str(&cell.tag.render(remove, &position, cell.tag.self_closing));
                if !cell.tag.self_closing {
                    body.push_str(&xml[cell.tag.span.end..cell.outer.end]);
                }
            }
            Piece::Write { base, value } => {
                let name = match base {
                    Some(cell) => {
                        let mut remove = DROPPED_ON_WRITE.to_vec();
                        if covers_written(cell) {
                            remove.push("MergeAcross");
                        }
                        body.push_str(&cell.tag.render(&remove, &position, false));
                        cell.tag.name.as_str()
                    }
                    None => {
                        body.push_str(&format!("<{} {}=\"{}\">", cell_name, index_attr, col + 1));
                        cell_name.as_str()
                    }
                };
                body.push_str(&format!(
                    "<{data} {ty}=\"String\">{value}</{data}></{cell}>",
                    data = data_name,
                    ty = type_attr,
                    value = escape_text(value),
                    cell = name,
                ));
            }
        }
    }
    body.push_str(&format!("</{}>", row_name));

    let mut splice = Splice::new();
    match &layout.data {
        Some(row) => splice.replace(row.outer, body),
        None => splice.replace(Span::at(layout.header.outer.end), body),
    }

    // 3. Tableの行数・列数の宣言を拡張
    if let Some(table_tag) = expand_table(&layout.table, patch) {
        splice.replace(layout.table.span, table_tag);
    }

    splice.apply(xml)
}

/// `ExpandedRowCount` / `ExpandedColumnCount` が書き込み範囲より小さい場合に
/// 拡張したTable開始タグを返す
fn expand_table(table: &StartTag, patch: &RowPatch) -> Option<String> {
    let required_rows = patch.row + 1;
    let required_cols = patch.max_col().map(|c| c + 1).unwrap_or(0);

    let mut remove = Vec::new();
    let mut add = Vec::new();
    for attr in &table.attributes {
        let required = match attr.local_name() {
            "ExpandedRowCount" => required_rows,
            "ExpandedColumnCount" => required_cols,
            _ => continue,
        };
        if let Ok(declared) = attr.value.trim().parse::<u32>() {
            if declared < required {
                remove.push(attr.local_name());
                add.push((attr.key.clone(), required.to_string()));
            }
        }
    }

    if add.is_empty() {
        return None;
    }
    Some(table.render(&remove, &add, table.self_closing))
}

fn malformed(path: &Path, message: String) -> LogicalModelError {
    LogicalModelError::MalformedTemplate {
        path: path.to_path_buf(),
        message,
    }
}
