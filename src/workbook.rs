use anyhow::{Context, Result};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};

use crate::model::UnmatchedRecord;
use crate::util::now_utc_string;

const AUTHOR: &str = "Operator Department Updater";
const WORKSHEET_NAME: &str = "Work Order Center";
const ROW_MARKER: &str = "[u:1]";
const TEXT_STYLE: &str = "s62";

/// Version/schema row the loader expects at the top of the sheet.
const SCHEMA_ROW: [(&str, &str); 3] = [("Number", "2022"), ("String", "101:2"), ("String", "103:4")];

/// Serialized Excel 2003 XML workbook ready for the data loader.
#[derive(Debug, Clone)]
pub struct LoaderWorkbook {
    pub xml: String,
    pub rows_written: usize,
    pub rows_excluded: usize,
}

pub fn build_workbook(records: &[UnmatchedRecord]) -> Result<LoaderWorkbook> {
    build_workbook_at(records, &now_utc_string())
}

pub fn build_workbook_at(records: &[UnmatchedRecord], created_at: &str) -> Result<LoaderWorkbook> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 1);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
    writer.write_event(Event::PI(BytesPI::new(r#"mso-application progid="Excel.Sheet""#)))?;

    writer.write_event(Event::Start(BytesStart::new("Workbook").with_attributes([
        ("xmlns", "urn:schemas-microsoft-com:office:spreadsheet"),
        ("xmlns:o", "urn:schemas-microsoft-com:office:office"),
        ("xmlns:x", "urn:schemas-microsoft-com:office:excel"),
        ("xmlns:ss", "urn:schemas-microsoft-com:office:spreadsheet"),
        ("xmlns:html", "http://www.w3.org/TR/REC-html40"),
    ])))?;

    write_document_properties(&mut writer, created_at)?;
    write_workbook_options(&mut writer)?;
    write_styles(&mut writer)?;

    writer.write_event(Event::Start(
        BytesStart::new("Worksheet").with_attributes([("ss:Name", WORKSHEET_NAME)]),
    ))?;
    writer.write_event(Event::Start(BytesStart::new("Table").with_attributes([
        ("ss:ExpandedColumnCount", "3"),
        ("x:FullColumns", "1"),
        ("x:FullRows", "1"),
    ])))?;

    start(&mut writer, "Row")?;
    for (data_type, value) in SCHEMA_ROW {
        write_cell(&mut writer, Some(TEXT_STYLE), data_type, value)?;
    }
    end(&mut writer, "Row")?;

    let mut rows_written = 0;
    let mut rows_excluded = 0;
    for record in records {
        let (Some(operator), Some(department)) = (
            unsigned_digits(&record.operator_id),
            unsigned_digits(&record.new_department),
        ) else {
            rows_excluded += 1;
            continue;
        };

        start(&mut writer, "Row")?;
        write_cell(&mut writer, None, "String", ROW_MARKER)?;
        write_cell(&mut writer, None, "Number", operator)?;
        write_cell(&mut writer, None, "Number", department)?;
        end(&mut writer, "Row")?;
        rows_written += 1;
    }

    end(&mut writer, "Table")?;
    writer.write_event(Event::Start(BytesStart::new("WorksheetOptions").with_attributes([(
        "xmlns",
        "urn:schemas-microsoft-com:office:excel",
    )])))?;
    text_element(&mut writer, "ProtectObjects", "False")?;
    text_element(&mut writer, "ProtectScenarios", "False")?;
    end(&mut writer, "WorksheetOptions")?;
    end(&mut writer, "Worksheet")?;
    end(&mut writer, "Workbook")?;

    let mut xml = String::from_utf8(writer.into_inner())
        .context("workbook serialization produced invalid UTF-8")?;
    xml.push('\n');

    Ok(LoaderWorkbook {
        xml,
        rows_written,
        rows_excluded,
    })
}

// Ids are written as digit text so values wider than any machine integer
// survive unchanged.
fn unsigned_digits(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty() && value.bytes().all(|byte| byte.is_ascii_digit())).then_some(value)
}

fn write_document_properties(writer: &mut Writer<Vec<u8>>, created_at: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("DocumentProperties").with_attributes([(
        "xmlns",
        "urn:schemas-microsoft-com:office:office",
    )])))?;
    text_element(writer, "Author", AUTHOR)?;
    text_element(writer, "LastAuthor", AUTHOR)?;
    text_element(writer, "Created", created_at)?;
    text_element(writer, "Version", "16.00")?;
    end(writer, "DocumentProperties")
}

fn write_workbook_options(writer: &mut Writer<Vec<u8>>) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("ExcelWorkbook").with_attributes([(
        "xmlns",
        "urn:schemas-microsoft-com:office:excel",
    )])))?;
    text_element(writer, "ProtectStructure", "False")?;
    text_element(writer, "ProtectWindows", "False")?;
    end(writer, "ExcelWorkbook")
}

fn write_styles(writer: &mut Writer<Vec<u8>>) -> Result<()> {
    start(writer, "Styles")?;

    writer.write_event(Event::Start(
        BytesStart::new("Style").with_attributes([("ss:ID", "Default"), ("ss:Name", "Normal")]),
    ))?;
    empty(writer, BytesStart::new("Alignment").with_attributes([("ss:Vertical", "Bottom")]))?;
    empty(writer, BytesStart::new("Borders"))?;
    empty(
        writer,
        BytesStart::new("Font").with_attributes([
            ("ss:FontName", "Calibri"),
            ("x:Family", "Swiss"),
            ("ss:Size", "11"),
            ("ss:Color", "#000000"),
        ]),
    )?;
    empty(writer, BytesStart::new("Interior"))?;
    empty(writer, BytesStart::new("NumberFormat"))?;
    empty(writer, BytesStart::new("Protection"))?;
    end(writer, "Style")?;

    writer.write_event(Event::Start(
        BytesStart::new("Style").with_attributes([("ss:ID", TEXT_STYLE)]),
    ))?;
    empty(writer, BytesStart::new("NumberFormat").with_attributes([("ss:Format", "@")]))?;
    end(writer, "Style")?;

    end(writer, "Styles")
}

fn write_cell(
    writer: &mut Writer<Vec<u8>>,
    style: Option<&str>,
    data_type: &str,
    value: &str,
) -> Result<()> {
    let mut cell = BytesStart::new("Cell");
    if let Some(style) = style {
        cell.push_attribute(("ss:StyleID", style));
    }
    writer.write_event(Event::Start(cell))?;
    writer.write_event(Event::Start(
        BytesStart::new("Data").with_attributes([("ss:Type", data_type)]),
    ))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    end(writer, "Data")?;
    end(writer, "Cell")
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<()> {
    start(writer, name)?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    end(writer, name)
}

fn start(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    Ok(())
}

fn end(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn empty(writer: &mut Writer<Vec<u8>>, element: BytesStart<'_>) -> Result<()> {
    writer.write_event(Event::Empty(element))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(operator: &str, department: &str) -> UnmatchedRecord {
        UnmatchedRecord {
            operator_id: operator.into(),
            new_department: department.into(),
            old_department: None,
        }
    }

    fn data_rows(xml: &str) -> usize {
        xml.matches(ROW_MARKER).count()
    }

    #[test]
    fn schema_row_precedes_record_rows() {
        let workbook =
            build_workbook_at(&[record("42", "7")], "2026-01-02T03:04:05Z").unwrap();
        let xml = &workbook.xml;

        assert!(xml.trim_start().starts_with("<?xml version=\"1.0\"?>"));
        assert!(xml.contains("<?mso-application progid=\"Excel.Sheet\"?>"));
        assert!(xml.contains("<Created>2026-01-02T03:04:05Z</Created>"));
        assert!(xml.contains("<Worksheet ss:Name=\"Work Order Center\">"));

        let schema = xml.find("<Data ss:Type=\"Number\">2022</Data>").unwrap();
        let operator = xml.find("<Data ss:Type=\"Number\">42</Data>").unwrap();
        assert!(schema < operator);
        assert!(xml.contains("<Data ss:Type=\"String\">103:4</Data>"));
        assert!(xml.contains("<Data ss:Type=\"Number\">7</Data>"));
        assert!(xml.trim_end().ends_with("</Workbook>"));
    }

    #[test]
    fn non_integer_records_are_excluded() {
        let records = vec![record("42", "7"), record("SHOP", "7"), record("8", "N/A")];
        let workbook = build_workbook(&records).unwrap();

        assert_eq!(workbook.rows_written, 1);
        assert_eq!(workbook.rows_excluded, 2);
        assert_eq!(data_rows(&workbook.xml), 1);
        assert!(!workbook.xml.contains("SHOP"));
    }

    #[test]
    fn ids_wider_than_u64_are_kept_verbatim() {
        let wide = "1234567890123456789012345";
        let workbook = build_workbook(&[record(wide, "7")]).unwrap();

        assert_eq!(workbook.rows_written, 1);
        assert_eq!(workbook.rows_excluded, 0);
        assert!(workbook.xml.contains(&format!("<Data ss:Type=\"Number\">{wide}</Data>")));
    }

    #[test]
    fn empty_input_still_produces_schema_row() {
        let workbook = build_workbook(&[]).unwrap();
        assert_eq!(workbook.rows_written, 0);
        assert!(workbook.xml.contains("101:2"));
        assert_eq!(data_rows(&workbook.xml), 0);
    }
}
