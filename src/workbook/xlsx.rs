//! OOXML (xlsx) Backend
//!
//! ZIPパッケージ形式のテンプレートを読み書きするモジュール。
//! ヘッダー行の読み込みにはcalamineを使用し、書き込みはワークシートXMLの
//! `<row>` 要素を直接差し替えて行います。
//! 差し替え対象以外のZIPエントリは再圧縮せずにそのままコピーされます。

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto_from_rs, Data, Reader, Sheets};
use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::header::{HeaderCell, RowPatch};
use super::markup::{escape_text, qualified, Span, Splice, StartTag};
use crate::error::LogicalModelError;
use crate::security::{validate_zip_path, SecurityConfig};
use crate::types::{CellCoord, CellRange};

const PACKAGE_RELS: &str = "_rels/.rels";
const CONTENT_TYPES: &str = "[Content_Types].xml";
const OFFICE_DOCUMENT_REL: &str = "/officeDocument";
const CALC_CHAIN_REL: &str = "/calcChain";
const BOM: &str = "\u{feff}";

/// 書き込み時に引き継がない属性（位置と型は再設定する）
const DROPPED_ON_WRITE: [&str; 4] = ["r", "t", "cm", "vm"];

/// OOXMLワークブック
#[derive(Debug)]
pub(crate) struct XlsxDocument {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl XlsxDocument {
    /// バイト列から文書を構築する
    ///
    /// ZIPアーカイブのエントリ数、各エントリのパスと展開後サイズを検証します。
    pub fn from_bytes(
        path: &Path,
        bytes: Vec<u8>,
        security: &SecurityConfig,
    ) -> Result<Self, LogicalModelError> {
        check_archive(&bytes, security)?;
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
        })
    }

    /// 指定シートのヘッダー行（行0）を取得
    pub fn header_row(&self, sheet: &str) -> Result<Vec<HeaderCell>, LogicalModelError> {
        let sheets = open_workbook_auto_from_rs(Cursor::new(self.bytes.clone()))?;
        let mut workbook = match sheets {
            Sheets::Xlsx(workbook) => workbook,
            _ => {
                return Err(malformed(
                    &self.path,
                    "ZIP package is not an OOXML workbook".to_string(),
                ))
            }
        };

        if !workbook.sheet_names().iter().any(|name| name == sheet) {
            return Err(LogicalModelError::WorksheetMissing {
                path: self.path.clone(),
                sheet: sheet.to_string(),
            });
        }

        let range = workbook
            .worksheet_range(sheet)
            .map_err(calamine::Error::from)?;

        let (start, end) = match (range.start(), range.end()) {
            (Some(start), Some(end)) if start.0 == 0 => (start, end),
            _ => {
                return Err(malformed(
                    &self.path,
                    format!("worksheet '{}' has no header row", sheet),
                ))
            }
        };

        let mut header = Vec::new();
        for col in start.1..=end.1 {
            match range.get_value((0, col)) {
                Some(Data::String(text)) => header.push(HeaderCell::text(col, text.clone())),
                Some(Data::Empty) | None => {}
                Some(_) => header.push(HeaderCell::non_text(col)),
            }
        }
        Ok(header)
    }

    /// 書き込み内容を適用したパッケージのバイト列を返す
    pub fn apply(&self, sheet: &str, patch: &RowPatch) -> Result<Vec<u8>, LogicalModelError> {
        let mut archive = ZipArchive::new(Cursor::new(self.bytes.as_slice()))?;

        // 1. シート名からワークシートXMLのパスを解決
        let workbook = locate_workbook(&mut archive, &self.path)?;
        let part = locate_sheet_part(&mut archive, &workbook, sheet, &self.path)?;

        // 2. ワークシートXMLのデータ行を差し替え
        let xml = read_part(&mut archive, &part, &self.path)?;
        let patched = match xml.strip_prefix(BOM) {
            Some(body) => {
                let mut patched = patch_sheet_xml(body, patch, &self.path)?;
                patched.xml.insert_str(0, BOM);
                patched
            }
            None => patch_sheet_xml(&xml, patch, &self.path)?,
        };

        tracing::debug!(part = %part, "patched worksheet part");

        let mut edits = BTreeMap::new();
        edits.insert(part, PartEdit::Replace(patched.xml.into_bytes()));

        // 3. 数式セルを上書きした場合は計算チェーンを破棄
        if patched.replaced_formula {
            edits.extend(calc_chain_removal(&mut archive, &workbook, &self.path)?);
        }

        // 4. パッケージを再構築
        rewrite_archive(&mut archive, &edits)
    }
}

/// ZIPアーカイブのセキュリティチェック
fn check_archive(bytes: &[u8], security: &SecurityConfig) -> Result<(), LogicalModelError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    // セキュリティチェック: ファイル数の上限
    if archive.len() > security.max_file_count {
        return Err(LogicalModelError::SecurityViolation(format!(
            "ZIP archive contains too many files: {} (max: {})",
            archive.len(),
            security.max_file_count
        )));
    }

    let mut total_decompressed_size = 0u64;
    for i in 0..archive.len() {
        let file = archive.by_index(i)?;

        // パストラバーサル対策
        let file_name = file.name();
        validate_zip_path(file_name).map_err(|e| {
            LogicalModelError::SecurityViolation(format!("Invalid ZIP path: {}", e))
        })?;

        let file_size = file.size();
        if file_size > security.max_file_size {
            return Err(LogicalModelError::SecurityViolation(format!(
                "File '{}' exceeds maximum size: {} bytes (max: {} bytes)",
                file_name, file_size, security.max_file_size
            )));
        }

        total_decompressed_size = total_decompressed_size
            .checked_add(file_size)
            .ok_or_else(|| {
                LogicalModelError::SecurityViolation(
                    "Total decompressed size calculation overflow".to_string(),
                )
            })?;

        if total_decompressed_size > security.max_decompressed_size {
            return Err(LogicalModelError::SecurityViolation(format!(
                "Total decompressed size exceeds maximum: {} bytes (max: {} bytes)",
                total_decompressed_size, security.max_decompressed_size
            )));
        }
    }

    Ok(())
}

fn read_part<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    path: &Path,
) -> Result<String, LogicalModelError> {
    let mut file = archive
        .by_name(name)
        .map_err(|_| malformed(path, format!("package part '{}' is missing", name)))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

/// ワークブック本体のパート
#[derive(Debug)]
struct WorkbookParts {
    /// ワークブック本体のディレクトリ（例: `xl`）
    dir: String,
    /// ワークブック本体のパート名（例: `xl/workbook.xml`）
    workbook: String,
    /// ワークブックのリレーションシップのパート名
    rels: String,
}

/// パッケージのリレーションシップからワークブック本体を特定する
fn locate_workbook<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    path: &Path,
) -> Result<WorkbookParts, LogicalModelError> {
    let package_rels = read_part(archive, PACKAGE_RELS, path)?;
    let workbook_target = elements(&package_rels, "Relationship")?
        .into_iter()
        .find(|rel| {
            rel.attr("Type")
                .is_some_and(|ty| ty.ends_with(OFFICE_DOCUMENT_REL))
        })
        .and_then(|rel| rel.attr("Target").map(str::to_string))
        .ok_or_else(|| malformed(path, "package has no officeDocument relationship".to_string()))?;
    let workbook = resolve_target("", &workbook_target);
    let (dir, file) = match workbook.rsplit_once('/') {
        Some((dir, file)) => (dir.to_string(), file.to_string()),
        None => (String::new(), workbook.clone()),
    };
    let rels = if dir.is_empty() {
        format!("_rels/{}.rels", file)
    } else {
        format!("{}/_rels/{}.rels", dir, file)
    };

    Ok(WorkbookParts {
        dir,
        workbook,
        rels,
    })
}

/// ワークブックのリレーションシップをたどり、シートのパート名を返す
fn locate_sheet_part<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    workbook: &WorkbookParts,
    sheet: &str,
    path: &Path,
) -> Result<String, LogicalModelError> {
    // 1. ワークブックからシートのリレーションシップIDを取得
    let workbook_xml = read_part(archive, &workbook.workbook, path)?;
    let rel_id = elements(&workbook_xml, "sheet")?
        .into_iter()
        .find(|s| s.attr("name") == Some(sheet))
        .and_then(|s| {
            s.attributes
                .iter()
                .find(|a| a.key.contains(':') && a.local_name() == "id")
                .map(|a| a.value.clone())
        })
        .ok_or_else(|| LogicalModelError::WorksheetMissing {
            path: path.to_path_buf(),
            sheet: sheet.to_string(),
        })?;

    // 2. ワークブックのリレーションシップからパート名を解決
    let workbook_rels = read_part(archive, &workbook.rels, path)?;
    let target = elements(&workbook_rels, "Relationship")?
        .into_iter()
        .find(|rel| rel.attr("Id") == Some(rel_id.as_str()))
        .and_then(|rel| rel.attr("Target").map(str::to_string))
        .ok_or_else(|| {
            malformed(
                path,
                format!("relationship '{}' for worksheet '{}' not found", rel_id, sheet),
            )
        })?;

    let part = resolve_target(&workbook.dir, &target);
    validate_zip_path(&part).map_err(|e| {
        LogicalModelError::SecurityViolation(format!("Invalid worksheet part: {}", e))
    })?;
    Ok(part)
}

/// 計算チェーンのパートと、それを参照するリレーションシップ・コンテンツタイプを削除する編集
///
/// 計算チェーンを持たないワークブックでは空を返します。
fn calc_chain_removal<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    workbook: &WorkbookParts,
    path: &Path,
) -> Result<Vec<(String, PartEdit)>, LogicalModelError> {
    let is_calc_chain =
        |rel: &StartTag| rel.attr("Type").is_some_and(|ty| ty.ends_with(CALC_CHAIN_REL));

    let rels_xml = read_part(archive, &workbook.rels, path)?;
    let target = elements(&rels_xml, "Relationship")?
        .into_iter()
        .find(|rel| is_calc_chain(rel))
        .and_then(|rel| rel.attr("Target").map(str::to_string));
    let Some(target) = target else {
        return Ok(Vec::new());
    };
    let part = resolve_target(&workbook.dir, &target);

    let mut edits = vec![(
        workbook.rels.clone(),
        PartEdit::Replace(remove_elements(&rels_xml, "Relationship", is_calc_chain)?.into_bytes()),
    )];

    if archive.file_names().any(|name| name == CONTENT_TYPES) {
        let content_types = read_part(archive, CONTENT_TYPES, path)?;
        let part_name = format!("/{}", part);
        let rewritten = remove_elements(&content_types, "Override", |o| {
            o.attr("PartName") == Some(part_name.as_str())
        })?;
        edits.push((CONTENT_TYPES.to_string(), PartEdit::Replace(rewritten.into_bytes())));
    }

    tracing::debug!(part = %part, "dropping calculation chain");
    edits.push((part, PartEdit::Remove));
    Ok(edits)
}

/// 条件に一致する要素を（子要素ごと）取り除く
fn remove_elements<F>(xml: &str, local: &str, matches: F) -> Result<String, LogicalModelError>
where
    F: Fn(&StartTag) -> bool,
{
    let mut reader = XmlReader::from_str(xml);
    let mut splice = Splice::new();
    let mut open: Option<(usize, Span)> = None;
    let mut depth = 0usize;

    loop {
        let start = reader.buffer_position();
        let event = reader.read_event()?;
        let span = Span::new(start, reader.buffer_position());
        match event {
            Event::Start(e) => {
                depth += 1;
                if open.is_none() && e.local_name().as_ref() == local.as_bytes() {
                    let tag = StartTag::capture(&e, span, false)?;
                    if matches(&tag) {
                        open = Some((depth, span));
                    }
                }
            }
            Event::Empty(e) => {
                if open.is_none() && e.local_name().as_ref() == local.as_bytes() {
                    let tag = StartTag::capture(&e, span, true)?;
                    if matches(&tag) {
                        splice.replace(span, String::new());
                    }
                }
            }
            Event::End(_) => {
                if let Some((level, opened)) = open {
                    if level == depth {
                        splice.replace(Span::new(opened.start, span.end), String::new());
                        open = None;
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    splice.apply(xml)
}

/// リレーションシップのTargetをパッケージ内のパート名に解決する
fn resolve_target(base_dir: &str, target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None if base_dir.is_empty() => target.to_string(),
        None => format!("{}/{}", base_dir, target),
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// 指定したローカル名を持つすべての要素の開始タグ
fn elements(xml: &str, local: &str) -> Result<Vec<StartTag>, LogicalModelError> {
    let mut reader = XmlReader::from_str(xml);
    let mut found = Vec::new();
    loop {
        let start = reader.buffer_position();
        let event = reader.read_event()?;
        let span = Span::new(start, reader.buffer_position());
        match event {
            Event::Start(e) | Event::Empty(e) => {
                if e.local_name().as_ref() == local.as_bytes() {
                    found.push(StartTag::capture(&e, span, false)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(found)
}

/// パッケージのパートに対する編集
#[derive(Debug)]
enum PartEdit {
    Replace(Vec<u8>),
    Remove,
}

/// 編集対象のパートを置き換え・削除し、他のエントリはそのままコピーする
fn rewrite_archive<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    edits: &BTreeMap<String, PartEdit>,
) -> Result<Vec<u8>, LogicalModelError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        match edits.get(file.name()) {
            Some(PartEdit::Replace(contents)) => {
                let name = file.name().to_string();
                drop(file);
                writer.start_file(name, options)?;
                writer.write_all(contents)?;
            }
            Some(PartEdit::Remove) => {}
            None => writer.raw_copy_file(file)?,
        }
    }

    Ok(writer.finish()?.into_inner())
}

#[derive(Debug)]
struct CellEntry {
    col: u32,
    tag: StartTag,
    outer: Span,
    /// `<f>` 子要素を持つ
    has_formula: bool,
    /// 共有数式の基点（`<f t="shared" ref="...">`）
    shared_formula_master: bool,
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
    sheet_data: StartTag,
    dimension: Option<StartTag>,
    header: Option<RowEntry>,
    data: Option<RowEntry>,
}

fn scan_sheet(xml: &str, path: &Path) -> Result<SheetLayout, LogicalModelError> {
    let mut reader = XmlReader::from_str(xml);
    let mut depth = 0usize;
    let mut sheet_data: Option<StartTag> = None;
    let mut dimension: Option<StartTag> = None;
    let mut rows: Vec<RowEntry> = Vec::new();
    let mut row: Option<RowEntry> = None;
    let mut cell: Option<CellEntry> = None;
    let mut next_row = 0u32;
    let mut next_col = 0u32;

    loop {
        let start = reader.buffer_position();
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return Err(malformed(
                    path,
                    format!("invalid worksheet XML near byte {}: {}", reader.buffer_position(), e),
                ))
            }
        };
        let end = reader.buffer_position();

        let (tag, self_closing) = match event {
            Event::Start(e) => (StartTag::capture(&e, Span::new(start, end), false)?, false),
            Event::Empty(e) => (StartTag::capture(&e, Span::new(start, end), true)?, true),
            Event::End(_) => {
                match depth {
                    2 if sheet_data.is_some() => break,
                    3 => {
                        if let Some(mut r) = row.take() {
                            r.outer.end = end;
                            rows.push(r);
                        }
                    }
                    4 => {
                        if let (Some(mut c), Some(r)) = (cell.take(), row.as_mut()) {
                            c.outer.end = end;
                            r.cells.push(c);
                        }
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        let level = depth + 1;
        let in_sheet_data = sheet_data.is_some();
        let local = tag.local_name().to_string();
        match (level, local.as_str()) {
            (2, "dimension") => dimension = Some(tag),
            (2, "sheetData") => {
                sheet_data = Some(tag);
                if self_closing {
                    break;
                }
            }
            (3, "row") if in_sheet_data => {
                let index = match tag.attr("r") {
                    Some(raw) => match raw.trim().parse::<u32>() {
                        Ok(r) if r >= 1 => r - 1,
                        _ => {
                            return Err(malformed(path, format!("invalid row number '{}'", raw)))
                        }
                    },
                    None => next_row,
                };
                next_row = index.saturating_add(1);
                next_col = 0;
                let entry = (index <= 1).then(|| RowEntry {
                    index,
                    outer: tag.span,
                    tag,
                    cells: Vec::new(),
                });
                if self_closing {
                    rows.extend(entry);
                } else {
                    row = entry;
                }
            }
            (4, "c") if row.is_some() => {
                let col = match tag.attr("r") {
                    Some(raw) => CellCoord::parse_a1(raw)
                        .map(|coord| coord.col)
                        .ok_or_else(|| malformed(path, format!("invalid cell reference '{}'", raw)))?,
                    None => next_col,
                };
                next_col = col.saturating_add(1);
                let entry = CellEntry {
                    col,
                    outer: tag.span,
                    tag,
                    has_formula: false,
                    shared_formula_master: false,
                };
                match (self_closing, row.as_mut()) {
                    (true, Some(r)) => r.cells.push(entry),
                    _ => cell = Some(entry),
                }
            }
            (5, "f") => {
                if let Some(c) = cell.as_mut() {
                    c.has_formula = true;
                    c.shared_formula_master |=
                        tag.attr("t") == Some("shared") && tag.attr("ref").is_some();
                }
            }
            _ => {}
        }

        if !self_closing {
            depth += 1;
        }
    }

    let sheet_data =
        sheet_data.ok_or_else(|| malformed(path, "worksheet has no sheetData".to_string()))?;

    let mut header = None;
    let mut data = None;
    for r in rows {
        match r.index {
            0 if header.is_none() => header = Some(r),
            1 if data.is_none() => data = Some(r),
            _ => {}
        }
    }

    Ok(SheetLayout {
        sheet_data,
        dimension,
        header,
        data,
    })
}

enum Piece<'a> {
    Keep(&'a CellEntry),
    Write {
        base: Option<&'a CellEntry>,
        value: &'a str,
    },
}

/// 書き込み後のワークシートXML
#[derive(Debug)]
struct PatchedSheet {
    xml: String,
    /// 数式セルを上書きした
    replaced_formula: bool,
}

/// ワークシートXMLのデータ行にインライン文字列として値を書き込む
fn patch_sheet_xml(
    xml: &str,
    patch: &RowPatch,
    path: &Path,
) -> Result<PatchedSheet, LogicalModelError> {
    let layout = scan_sheet(xml, path)?;
    let header = layout
        .header
        .as_ref()
        .ok_or_else(|| malformed(path, "worksheet has no header row".to_string()))?;

    let prefix = layout.sheet_data.prefix();
    let cell_name = qualified(prefix, "c");
    let is_name = qualified(prefix, "is");
    let t_name = qualified(prefix, "t");

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

    // 共有数式の基点は上書きしない
    let mut replaced_formula = false;
    for (col, piece) in &pieces {
        if let Piece::Write {
            base: Some(cell), ..
        } = piece
        {
            if cell.shared_formula_master {
                return Err(malformed(
                    path,
                    format!(
                        "cell {} is the master of a shared formula and cannot be overwritten",
                        CellCoord::new(patch.row, *col).to_a1_notation()
                    ),
                ));
            }
            replaced_formula |= cell.has_formula;
        }
    }

    let mut body = String::new();
    let row_name = match &layout.data {
        Some(row) => {
            body.push_str(&row.tag.render(&["spans"], &[], false));
            row.tag.name.clone()
        }
        None => {
            let name = qualified(prefix, "row");
            body.push_str(&format!("<{} r=\"{}\">", name, patch.row + 1));
            name
        }
    };

    for (col, piece) in &pieces {
        let reference = CellCoord::new(patch.row, *col).to_a1_notation();
        match piece {
            Piece::Keep(cell) => {
                let position = vec![("r".to_string(), reference)];
                body.push_str(&cell.tag.render(&["r"], &position, cell.tag.self_closing));
                if !cell.tag.self_closing {
                    body.push_str(&xml[cell.tag.span.end..cell.outer.end]);
                }
            }
            Piece::Write { base, value } => {
                let attrs = vec![
                    ("r".to_string(), reference),
                    ("t".to_string(), "inlineStr".to_string()),
                ];
                let name = match base {
                    Some(cell) => {
                        body.push_str(&cell.tag.render(&DROPPED_ON_WRITE, &attrs, false));
                        cell.tag.name.as_str()
                    }
                    None => {
                        body.push_str(&format!("<{} r=\"{}\" t=\"inlineStr\">", cell_name, attrs[0].1));
                        cell_name.as_str()
                    }
                };
                let space = if value.trim() != *value {
                    " xml:space=\"preserve\""
                } else {
                    ""
                };
                body.push_str(&format!(
                    "<{is}><{t}{space}>{value}</{t}></{is}></{cell}>",
                    is = is_name,
                    t = t_name,
                    space = space,
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
        None => splice.replace(Span::at(header.outer.end), body),
    }

    if let Some(dimension) = &layout.dimension {
        if let Some(rendered) = expand_dimension(dimension, patch) {
            splice.replace(dimension.span, rendered);
        }
    }

    Ok(PatchedSheet {
        xml: splice.apply(xml)?,
        replaced_formula,
    })
}

/// `<dimension ref>` を書き込み範囲まで広げる
fn expand_dimension(dimension: &StartTag, patch: &RowPatch) -> Option<String> {
    let declared = CellRange::parse(dimension.attr("ref")?)?;
    let expanded = declared.expand_to(CellCoord::new(patch.row, patch.max_col()?));
    if expanded == declared {
        return None;
    }
    Some(dimension.render(
        &["ref"],
        &[("ref".to_string(), expanded.to_a1_notation())],
        dimension.self_closing,
    ))
}

fn malformed(path: &Path, message: String) -> LogicalModelError {
    LogicalModelError::MalformedTemplate {
        path: path.to_path_buf(),
        message,
    }
}
