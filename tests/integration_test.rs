//! Integration Tests for xsd-logical-model
//!
//! スキーマの読み込みから成果物の生成・書き込みまでを一通り検証します。
//! SpreadsheetML 2003 テンプレートは文字列で、xlsx テンプレートは
//! rust_xlsxwriter で生成し、書き込み結果は calamine で読み戻します。

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use rust_xlsxwriter::*;
use xsd_logical_model::{
    CollisionPolicy, GeneratorBuilder, LogicalModelError, SchemaSet, Stage, DATA_ELEMENTS_SHEET,
};

// Helper module for generating test fixtures
mod fixtures {
    use super::*;

    pub const XS_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

    /// XSD文書を生成
    pub fn xsd(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="{}" targetNamespace="urn:test">
{}
</xs:schema>"#,
            XS_NAMESPACE, body
        )
    }

    /// 指定したヘッダーを持つ SpreadsheetML 2003 テンプレートを生成
    pub fn spreadsheetml_template(sheet_name: &str, header: &[&str]) -> String {
        let cells: String = header
            .iter()
            .map(|label| {
                format!(
                    "<Cell ss:StyleID=\"hdr\"><Data ss:Type=\"String\">{}</Data></Cell>",
                    label
                )
            })
            .collect();

        format!(
            r#"<?xml version="1.0"?>
<?mso-application progid="Excel.Sheet"?>
<Workbook xmlns="urn:schemas-microsoft-com:office:spreadsheet"
 xmlns:o="urn:schemas-microsoft-com:office:office"
 xmlns:x="urn:schemas-microsoft-com:office:excel"
 xmlns:ss="urn:schemas-microsoft-com:office:spreadsheet">
 <Styles>
  <Style ss:ID="hdr"><Font ss:Bold="1"/></Style>
 </Styles>
 <Worksheet ss:Name="Metadata">
  <Table><Row><Cell><Data ss:Type="String">Element</Data></Cell></Row></Table>
 </Worksheet>
 <Worksheet ss:Name="{}">
  <Table ss:ExpandedColumnCount="{}" ss:ExpandedRowCount="1" x:FullColumns="1" x:FullRows="1">
   <Row>{}</Row>
  </Table>
 </Worksheet>
</Workbook>"#,
            sheet_name,
            header.len(),
            cells
        )
    }

    /// 指定したヘッダーを持つ xlsx テンプレートを生成
    pub fn xlsx_template(header: &[&str]) -> Result<Vec<u8>, XlsxError> {
        let mut workbook = Workbook::new();

        let overview = workbook.add_worksheet();
        overview.set_name("Metadata")?;
        overview.write_string(0, 0, "Element")?;
        overview.write_string(1, 0, "untouched")?;

        let bold = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name(DATA_ELEMENTS_SHEET)?;
        for (col, label) in header.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *label, &bold)?;
        }

        Ok(workbook.save_to_buffer()?)
    }

    /// FHIRディレクトリにテンプレートを配置
    pub fn install_templates(fhir: &Path, spreadsheet: &[u8]) -> PathBuf {
        let templates = fhir.join("source").join("templates");
        fs::create_dir_all(&templates).unwrap();
        fs::write(templates.join("template-spreadsheet.xml"), spreadsheet).unwrap();
        fs::write(
            templates.join("template-introduction.xml"),
            "<div>introduction</div>",
        )
        .unwrap();
        fs::write(templates.join("template-notes.xml"), "<div>notes</div>").unwrap();
        templates
    }

    /// xlsx の指定シートを読み込む
    pub fn read_sheet(path: &Path, sheet: &str) -> Range<Data> {
        let bytes = fs::read(path).unwrap();
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes)).unwrap();
        workbook.worksheet_range(sheet).unwrap()
    }
}

use fixtures::*;

const STANDARD_HEADER: [&str; 4] = ["Element", "Type", "Short Label", "Definition"];

struct Workspace {
    fhir: tempfile::TempDir,
    target: tempfile::TempDir,
}

impl Workspace {
    fn new(spreadsheet: &[u8]) -> Self {
        let fhir = tempfile::tempdir().unwrap();
        install_templates(fhir.path(), spreadsheet);
        Self {
            fhir,
            target: tempfile::tempdir().unwrap(),
        }
    }

    fn with_standard_template() -> Self {
        Self::new(spreadsheetml_template(DATA_ELEMENTS_SHEET, &STANDARD_HEADER).as_bytes())
    }

    fn builder(&self, schemas: SchemaSet) -> GeneratorBuilder {
        GeneratorBuilder::new()
            .with_source_schema_set(schemas)
            .with_fhir_directory(self.fhir.path())
            .with_target_directory(self.target.path())
    }

    fn output(&self, file_name: &str) -> PathBuf {
        self.target.path().join(file_name)
    }

    fn output_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.target.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

#[test]
fn test_patient_row_is_written() {
    let workspace = Workspace::with_standard_template();
    let schemas = SchemaSet::from_xsd_str(&xsd(r#"<xs:complexType name="Patient"/>"#)).unwrap();

    let report = workspace.builder(schemas).build().unwrap().convert().unwrap();

    assert_eq!(report.converted.len(), 1);
    let converted = &report.converted[0];
    assert_eq!(converted.name, "Patient");
    assert_eq!(converted.logical_name, "patient");
    // Definition列は解決されるが書き込まれない
    assert_eq!(converted.columns.definition, 3);

    let written = fs::read_to_string(workspace.output("patient-spreadsheet.xml")).unwrap();
    assert!(written.contains(concat!(
        r#"<Row><Cell ss:Index="1"><Data ss:Type="String">Patient</Data></Cell>"#,
        r#"<Cell ss:Index="2"><Data ss:Type="String">Logical</Data></Cell>"#,
        r#"<Cell ss:Index="3"><Data ss:Type="String">Patient</Data></Cell></Row>"#
    )));
    assert!(!written.contains(r#"ss:Index="4""#));
    assert!(written.contains(r#"ss:ExpandedRowCount="2""#));
    // 他のシートは変更されない
    assert!(written.contains(
        r#"<Worksheet ss:Name="Metadata">
  <Table><Row><Cell><Data ss:Type="String">Element</Data></Cell></Row></Table>"#
    ));
}

#[test]
fn test_observation_result_naming() {
    let workspace = Workspace::with_standard_template();
    let schemas =
        SchemaSet::from_xsd_str(&xsd(r#"<xs:complexType name="ObservationResult"/>"#)).unwrap();

    workspace.builder(schemas).build().unwrap().convert().unwrap();

    assert_eq!(
        workspace.output_files(),
        vec![
            "observationresult-introduction.xml",
            "observationresult-notes.xml",
            "observationresult-spreadsheet.xml",
        ]
    );
    // 付随文書はそのままコピーされる
    assert_eq!(
        fs::read_to_string(workspace.output("observationresult-notes.xml")).unwrap(),
        "<div>notes</div>"
    );
    assert_eq!(
        fs::read_to_string(workspace.output("observationresult-introduction.xml")).unwrap(),
        "<div>introduction</div>"
    );
    let written =
        fs::read_to_string(workspace.output("observationresult-spreadsheet.xml")).unwrap();
    assert!(written.contains(">ObservationResult<"));
}

#[test]
fn test_simple_types_produce_no_artifacts() {
    let workspace = Workspace::with_standard_template();
    let schemas = SchemaSet::from_xsd_str(&xsd(
        r#"<xs:simpleType name="Code"><xs:restriction base="xs:string"/></xs:simpleType>"#,
    ))
    .unwrap();

    let report = workspace.builder(schemas).build().unwrap().convert().unwrap();

    assert!(report.converted.is_empty());
    assert_eq!(report.skipped_non_complex, 1);
    assert!(workspace.output_files().is_empty());
}

#[test]
fn test_one_artifact_triple_per_complex_type() {
    let workspace = Workspace::with_standard_template();
    let schemas = SchemaSet::from_xsd_str(&xsd(concat!(
        r#"<xs:complexType name="Patient"/>"#,
        r#"<xs:simpleType name="Code"><xs:restriction base="xs:string"/></xs:simpleType>"#,
        r#"<xs:complexType name="Encounter"><xs:complexContent><xs:extension base="Base"/></xs:complexContent></xs:complexType>"#,
    )))
    .unwrap();

    let report = workspace.builder(schemas).build().unwrap().convert().unwrap();

    let names: Vec<&str> = report.converted.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Patient", "Encounter"]);
    assert_eq!(workspace.output_files().len(), 6);
}

#[test]
fn test_header_lookup_is_case_sensitive() {
    let template = spreadsheetml_template(
        DATA_ELEMENTS_SHEET,
        &["element", "Type", "Short Label", "Definition"],
    );
    let workspace = Workspace::new(template.as_bytes());
    let schemas = SchemaSet::from_xsd_str(&xsd(r#"<xs:complexType name="Patient"/>"#)).unwrap();

    let err = workspace.builder(schemas).build().unwrap().convert().unwrap_err();

    match err.root_cause() {
        LogicalModelError::ColumnNotFound { column, .. } => assert_eq!(column, "Element"),
        other => panic!("Expected ColumnNotFound, got {:?}", other),
    }
}

#[test]
fn test_missing_type_column_writes_nothing() {
    let template = spreadsheetml_template(
        DATA_ELEMENTS_SHEET,
        &["Element", "Short Label", "Definition"],
    );
    let workspace = Workspace::new(template.as_bytes());
    let schemas = SchemaSet::from_xsd_str(&xsd(r#"<xs:complexType name="Patient"/>"#)).unwrap();

    let err = workspace.builder(schemas).build().unwrap().convert().unwrap_err();

    match &err {
        LogicalModelError::TypeConversion {
            type_name, stage, ..
        } => {
            assert_eq!(type_name, "Patient");
            assert_eq!(*stage, Stage::WorkbookPopulation);
        }
        other => panic!("Expected TypeConversion, got {:?}", other),
    }
    assert!(matches!(
        err.root_cause(),
        LogicalModelError::ColumnNotFound { .. }
    ));
    // コピーされたスプレッドシートはテンプレートのまま
    assert_eq!(
        fs::read_to_string(workspace.output("patient-spreadsheet.xml")).unwrap(),
        template
    );
}

#[test]
fn test_missing_data_elements_worksheet() {
    let template = spreadsheetml_template("Elements", &STANDARD_HEADER);
    let workspace = Workspace::new(template.as_bytes());
    let schemas = SchemaSet::from_xsd_str(&xsd(r#"<xs:complexType name="Patient"/>"#)).unwrap();

    let err = workspace.builder(schemas).build().unwrap().convert().unwrap_err();

    match err.root_cause() {
        LogicalModelError::WorksheetMissing { sheet, path } => {
            assert_eq!(sheet, DATA_ELEMENTS_SHEET);
            assert!(path.ends_with("patient-spreadsheet.xml"));
        }
        other => panic!("Expected WorksheetMissing, got {:?}", other),
    }
}

#[test]
fn test_missing_template_stops_the_run() {
    let workspace = Workspace::with_standard_template();
    fs::remove_file(
        workspace
            .fhir
            .path()
            .join("source/templates/template-introduction.xml"),
    )
    .unwrap();
    let schemas = SchemaSet::from_xsd_str(&xsd(concat!(
        r#"<xs:complexType name="Patient"/>"#,
        r#"<xs:complexType name="Encounter"/>"#,
    )))
    .unwrap();

    let err = workspace.builder(schemas).build().unwrap().convert().unwrap_err();

    match err {
        LogicalModelError::TypeConversion {
            type_name,
            stage,
            converted,
            total,
            ..
        } => {
            assert_eq!(type_name, "Patient");
            assert_eq!(stage, Stage::TemplateCopy);
            assert_eq!((converted, total), (0, 2));
        }
        other => panic!("Expected TypeConversion, got {:?}", other),
    }
    // 2つ目の型は処理されない
    assert!(!workspace.output("encounter-spreadsheet.xml").exists());
}

#[test]
fn test_custom_templates_subpath() {
    let workspace = Workspace::with_standard_template();
    fs::rename(
        workspace.fhir.path().join("source/templates"),
        workspace.fhir.path().join("templates"),
    )
    .unwrap();
    let schemas = SchemaSet::from_xsd_str(&xsd(r#"<xs:complexType name="Patient"/>"#)).unwrap();

    let report = workspace
        .builder(schemas)
        .with_templates_subpath("templates")
        .build()
        .unwrap()
        .convert()
        .unwrap();

    assert_eq!(report.converted.len(), 1);
}

#[test]
fn test_includes_are_followed_once() {
    let workspace = Workspace::with_standard_template();
    let schema_dir = tempfile::tempdir().unwrap();
    fs::write(
        schema_dir.path().join("root.xsd"),
        xsd(concat!(
            r#"<xs:include schemaLocation="common.xsd"/>"#,
            r#"<xs:include schemaLocation="clinical/encounter.xsd"/>"#,
            r#"<xs:complexType name="Patient"/>"#,
        )),
    )
    .unwrap();
    fs::write(
        schema_dir.path().join("common.xsd"),
        xsd(r#"<xs:complexType name="ObservationResult"/>"#),
    )
    .unwrap();
    fs::create_dir(schema_dir.path().join("clinical")).unwrap();
    fs::write(
        schema_dir.path().join("clinical/encounter.xsd"),
        xsd(concat!(
            r#"<xs:include schemaLocation="../common.xsd"/>"#,
            r#"<xs:complexType name="Encounter"/>"#,
        )),
    )
    .unwrap();

    let schemas = SchemaSet::load(schema_dir.path().join("root.xsd")).unwrap();
    assert_eq!(schemas.len(), 3);

    let report = workspace.builder(schemas).build().unwrap().convert().unwrap();

    let mut names: Vec<&str> = report
        .converted
        .iter()
        .map(|c| c.logical_name.as_str())
        .collect();
    names.sort();
    assert_eq!(names, vec!["encounter", "observationresult", "patient"]);
    assert_eq!(report.skipped_duplicates, 0);
}

#[test]
fn test_repeated_visits_convert_once() {
    let workspace = Workspace::with_standard_template();
    let schemas = SchemaSet::from_xsd_str(&xsd(r#"<xs:complexType name="Patient"/>"#)).unwrap();
    let generator = workspace.builder(schemas).build().unwrap();

    let mut run = generator.start_run();
    let mut results = Vec::new();
    for _ in 0..3 {
        for complex in generator.schema_set().complex_types() {
            results.push(run.convert_type(complex).unwrap().is_some());
        }
    }
    let report = run.finish();

    assert_eq!(results, vec![true, false, false]);
    assert_eq!(report.converted.len(), 1);
    assert_eq!(report.skipped_duplicates, 2);
}

#[test]
fn test_rerun_produces_identical_output() {
    let workspace = Workspace::with_standard_template();
    let schemas = SchemaSet::from_xsd_str(&xsd(r#"<xs:complexType name="Patient"/>"#)).unwrap();
    let generator = workspace.builder(schemas).build().unwrap();

    generator.convert().unwrap();
    let first = fs::read(workspace.output("patient-spreadsheet.xml")).unwrap();
    generator.convert().unwrap();
    let second = fs::read(workspace.output("patient-spreadsheet.xml")).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_cross_schema_collision() {
    let workspace = Workspace::with_standard_template();
    let mut schemas = SchemaSet::new();
    schemas
        .add_xsd_str(&xsd(r#"<xs:complexType name="Patient"/>"#), None)
        .unwrap();
    schemas
        .add_xsd_str(&xsd(r#"<xs:complexType name="PATIENT"/>"#), None)
        .unwrap();

    let err = workspace
        .builder(schemas.clone())
        .build()
        .unwrap()
        .convert()
        .unwrap_err();
    assert!(matches!(
        err.root_cause(),
        LogicalModelError::NameCollision { .. }
    ));

    let report = workspace
        .builder(schemas)
        .with_collision_policy(CollisionPolicy::OverwriteLastWins)
        .build()
        .unwrap()
        .convert()
        .unwrap();
    assert_eq!(report.converted.len(), 2);
    let written = fs::read_to_string(workspace.output("patient-spreadsheet.xml")).unwrap();
    assert!(written.contains(">PATIENT<"));
}

#[test]
fn test_report_serializes_to_json() {
    let workspace = Workspace::with_standard_template();
    let schemas = SchemaSet::from_xsd_str(&xsd(r#"<xs:complexType name="Patient"/>"#)).unwrap();

    let report = workspace.builder(schemas).build().unwrap().convert().unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["converted"][0]["logical_name"], "patient");
    assert_eq!(json["converted"][0]["type_id"]["schema"], 0);
    assert_eq!(json["converted"][0]["columns"]["type_column"], 1);
    assert_eq!(json["skipped_non_complex"], 0);
}

#[test]
fn test_xlsx_template_is_populated() {
    let template =
        xlsx_template(&["Element", "Short Label", "Type", "Definition", "Comments"]).unwrap();
    let workspace = Workspace::new(&template);
    let schemas =
        SchemaSet::from_xsd_str(&xsd(r#"<xs:complexType name="ObservationResult"/>"#)).unwrap();

    let report = workspace.builder(schemas).build().unwrap().convert().unwrap();
    assert_eq!(report.converted[0].columns.short_label, 1);

    let spreadsheet = workspace.output("observationresult-spreadsheet.xml");
    let range = read_sheet(&spreadsheet, DATA_ELEMENTS_SHEET);

    let text = |row: u32, col: u32| match range.get_value((row, col)) {
        Some(Data::String(s)) => Some(s.clone()),
        _ => None,
    };
    assert_eq!(text(1, 0).as_deref(), Some("ObservationResult"));
    assert_eq!(text(1, 1).as_deref(), Some("ObservationResult"));
    assert_eq!(text(1, 2).as_deref(), Some("Logical"));
    assert_eq!(text(1, 3), None);
    assert_eq!(text(1, 4), None);
    // ヘッダー行は変更されない
    assert_eq!(text(0, 3).as_deref(), Some("Definition"));

    let metadata = read_sheet(&spreadsheet, "Metadata");
    assert_eq!(
        metadata.get_value((1, 0)),
        Some(&Data::String("untouched".to_string()))
    );
}

#[test]
fn test_xlsx_existing_data_row_is_overwritten() {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(DATA_ELEMENTS_SHEET).unwrap();
    for (col, label) in STANDARD_HEADER.iter().enumerate() {
        sheet.write_string(0, col as u16, *label).unwrap();
    }
    let italic = Format::new().set_italic();
    sheet.write_string_with_format(1, 0, "placeholder", &italic).unwrap();
    sheet.write_number(1, 1, 42.0).unwrap();
    sheet.write_string(1, 3, "keep me").unwrap();
    let template = workbook.save_to_buffer().unwrap();

    let workspace = Workspace::new(&template);
    let schemas = SchemaSet::from_xsd_str(&xsd(r#"<xs:complexType name="Patient"/>"#)).unwrap();
    workspace.builder(schemas).build().unwrap().convert().unwrap();

    let range = read_sheet(&workspace.output("patient-spreadsheet.xml"), DATA_ELEMENTS_SHEET);
    assert_eq!(
        range.get_value((1, 0)),
        Some(&Data::String("Patient".to_string()))
    );
    assert_eq!(
        range.get_value((1, 1)),
        Some(&Data::String("Logical".to_string()))
    );
    assert_eq!(
        range.get_value((1, 2)),
        Some(&Data::String("Patient".to_string()))
    );
    // Definition列の既存値はそのまま
    assert_eq!(
        range.get_value((1, 3)),
        Some(&Data::String("keep me".to_string()))
    );
}

#[test]
fn test_xlsx_rerun_is_idempotent() {
    let template = xlsx_template(&STANDARD_HEADER).unwrap();
    let workspace = Workspace::new(&template);
    let schemas = SchemaSet::from_xsd_str(&xsd(r#"<xs:complexType name="Patient"/>"#)).unwrap();
    let generator = workspace.builder(schemas).build().unwrap();

    generator.convert().unwrap();
    let first = fs::read(workspace.output("patient-spreadsheet.xml")).unwrap();
    generator.convert().unwrap();
    let second = fs::read(workspace.output("patient-spreadsheet.xml")).unwrap();

    assert_eq!(first, second);
}
