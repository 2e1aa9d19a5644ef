//! Text extraction for supported source formats
//!
//! Spreadsheets (delimited text and workbooks) keep their cell references
//! (`A1: value | B1: value`) so extracted values can cite a location.
//! Markdown keeps its headings. Word documents keep paragraphs, with table
//! rows joined by ` | `.

use std::io::{Cursor, Read};
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use quick_xml::events::Event;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("binary content ({0}) in a text source")]
    Binary(String),

    #[error("not valid UTF-8")]
    NotUtf8,

    #[error("delimited text: {0}")]
    Csv(#[from] csv::Error),

    #[error("workbook: {0}")]
    Workbook(String),

    #[error("archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archives are expanded by the directory builder, not parsed as text")]
    NestedArchive,

    #[error("document XML: {0}")]
    Xml(String),

    #[error("pdf: {0}")]
    Pdf(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Supported source formats, by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Markdown,
    Text,
    Delimited(u8),
    Json,
    Workbook,
    Docx,
    Pdf,
    Archive,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "md" | "markdown" => Some(SourceFormat::Markdown),
            "txt" | "text" => Some(SourceFormat::Text),
            "csv" => Some(SourceFormat::Delimited(b',')),
            "tsv" => Some(SourceFormat::Delimited(b'\t')),
            "json" => Some(SourceFormat::Json),
            "xlsx" | "xlsm" | "xls" | "ods" => Some(SourceFormat::Workbook),
            "docx" => Some(SourceFormat::Docx),
            "pdf" => Some(SourceFormat::Pdf),
            "zip" => Some(SourceFormat::Archive),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceFormat::Markdown => "markdown",
            SourceFormat::Text => "text",
            SourceFormat::Delimited(b',') => "csv",
            SourceFormat::Delimited(_) => "tsv",
            SourceFormat::Json => "json",
            SourceFormat::Workbook => "workbook",
            SourceFormat::Docx => "docx",
            SourceFormat::Pdf => "pdf",
            SourceFormat::Archive => "zip",
        }
    }

    fn is_text(&self) -> bool {
        matches!(
            self,
            SourceFormat::Markdown | SourceFormat::Text | SourceFormat::Delimited(_) | SourceFormat::Json
        )
    }
}

/// Spreadsheet column letter for a 0-based index (0 → A, 26 → AA)
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// One row as `A1: v | B1: v`, or None when every cell is blank
fn cell_row<I>(row: usize, cells: I) -> Option<String>
where
    I: IntoIterator<Item = (usize, String)>,
{
    let cells: Vec<String> = cells
        .into_iter()
        .filter_map(|(col, cell)| {
            let cell = cell.trim();
            (!cell.is_empty()).then(|| format!("{}{}: {}", column_letter(col), row + 1, cell))
        })
        .collect();
    (!cells.is_empty()).then(|| cells.join(" | "))
}

/// Render delimited text as cell-referenced rows
///
/// Row numbers count records, so a quoted cell spanning lines stays one
/// row. Empty cells are omitted, rows with no values are skipped.
pub fn normalize_delimited(text: &str, delimiter: u8, sheet_name: &str) -> Result<String, DocumentError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut out = format!("=== Sheet: {} ===\n", sheet_name);
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let cells = record.iter().map(str::to_string).enumerate();
        if let Some(line) = cell_row(row, cells) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    Ok(out)
}

fn workbook_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

/// Every sheet of a workbook, each under `=== Sheet: name ===`
///
/// Cell references are absolute, so a sheet whose data starts at C3
/// still reports `C3`.
pub fn workbook_text(bytes: &[u8]) -> Result<String, DocumentError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| DocumentError::Workbook(e.to_string()))?;

    let mut parts = Vec::new();
    for sheet in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| DocumentError::Workbook(e.to_string()))?;
        let (row0, col0) = range.start().unwrap_or((0, 0));

        let mut out = format!("=== Sheet: {} ===\n", sheet);
        for (r, row) in range.rows().enumerate() {
            let cells = row
                .iter()
                .enumerate()
                .map(|(c, cell)| (col0 as usize + c, workbook_cell(cell)));
            if let Some(line) = cell_row(row0 as usize + r, cells) {
                out.push_str(&line);
                out.push('\n');
            }
        }
        parts.push(out);
    }
    Ok(parts.join("\n"))
}

/// Paragraph and table text from `word/document.xml`
pub fn docx_text(bytes: &[u8]) -> Result<String, DocumentError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut xml = String::new();
    archive.by_name("word/document.xml")?.read_to_string(&mut xml)?;

    let mut reader = quick_xml::Reader::from_str(&xml);
    let mut blocks: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut table_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(|e| DocumentError::Xml(e.to_string()))? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:t" => in_text = true,
                b"w:tbl" => table_depth += 1,
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => paragraph.push('\t'),
                b"w:br" | b"w:cr" => paragraph.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                let text = t.unescape().map_err(|e| DocumentError::Xml(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    let text = std::mem::take(&mut paragraph);
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if table_depth > 0 {
                        if !cell.is_empty() {
                            cell.push(' ');
                        }
                        cell.push_str(text);
                    } else {
                        blocks.push(text.to_string());
                    }
                }
                b"w:tc" => row.push(std::mem::take(&mut cell)),
                b"w:tr" => {
                    let cells: Vec<String> = row.drain(..).filter(|c| !c.is_empty()).collect();
                    if !cells.is_empty() {
                        blocks.push(cells.join(" | "));
                    }
                }
                b"w:tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(blocks.join("\n\n"))
}

/// Text of every page of a PDF
pub fn pdf_text(bytes: &[u8]) -> Result<String, DocumentError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| DocumentError::Pdf(e.to_string()))?;
    Ok(trim_lines(&text))
}

fn trim_lines(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Normalized text for one file's contents
///
/// Text formats are rejected when `infer` recognizes binary content.
/// Archives are not handled here; see [`archive_entries`].
pub fn extract_text(bytes: &[u8], format: SourceFormat, file_name: &str) -> Result<String, DocumentError> {
    if format.is_text() {
        if let Some(kind) = infer::get(bytes) {
            return Err(DocumentError::Binary(kind.mime_type().to_string()));
        }
    }

    let as_text = || std::str::from_utf8(bytes).map_err(|_| DocumentError::NotUtf8);
    match format {
        SourceFormat::Markdown | SourceFormat::Text => Ok(trim_lines(as_text()?)),
        SourceFormat::Delimited(delimiter) => {
            let sheet = Path::new(file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(file_name);
            normalize_delimited(as_text()?, delimiter, sheet)
        }
        SourceFormat::Json => {
            let text = as_text()?;
            Ok(serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| serde_json::to_string_pretty(&v).ok())
                .unwrap_or_else(|| text.to_string()))
        }
        SourceFormat::Workbook => workbook_text(bytes),
        SourceFormat::Docx => docx_text(bytes),
        SourceFormat::Pdf => pdf_text(bytes),
        SourceFormat::Archive => Err(DocumentError::NestedArchive),
    }
}

/// One supported file inside a ZIP archive
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    /// File name without directories
    pub name: String,
    pub format: SourceFormat,
    pub bytes: Vec<u8>,
}

/// Supported files in a ZIP archive, in archive order
///
/// Directories, hidden and `__` entries, unsupported formats and nested
/// archives are left out.
pub fn archive_entries(bytes: &[u8]) -> Result<Vec<ArchiveEntry>, DocumentError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::new();

    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        if file.is_dir() {
            continue;
        }
        let name = file
            .name()
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .to_string();
        if name.is_empty() || name.starts_with('.') || name.starts_with("__") {
            continue;
        }
        let Some(format) = SourceFormat::from_path(Path::new(&name)) else {
            continue;
        };
        if format == SourceFormat::Archive {
            continue;
        }

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        entries.push(ArchiveEntry {
            name,
            format,
            bytes: contents,
        });
    }
    Ok(entries)
}

/// Case-insensitive wildcard match (`*` any run, `?` one character)
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut star: Option<usize> = None;
    let mut star_n = 0;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_n = n;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            star_n += 1;
            n = star_n;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
