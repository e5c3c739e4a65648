//! Format-specific markdown extraction for the built-in converter.
//!
//! Every function takes raw bytes and returns markdown or a
//! [`ConverterError`]; none of them panic on malformed input. Decoding a
//! file as plain text after a failure is not done here, the cache
//! controller owns that fallback.
//!
//! | Content type | Output |
//! |--------------|--------|
//! | PDF | Extracted text, paragraphs preserved |
//! | DOCX | Paragraphs, `Heading N` styles as `#` headings |
//! | PPTX | `## Slide N` sections, one paragraph per text frame line |
//! | XLSX | `## Sheet N` sections rendered as markdown tables |
//! | HTML | Headings, paragraphs, list items, links, code blocks |
//! | CSV | Markdown table |
//! | JSON | Pretty-printed fenced block |
//! | `text/*` | UTF-8 text as-is |

use std::io::Read;

use quick_xml::events::{BytesStart, Event};
use scraper::{ElementRef, Html, Node, Selector};

use docmark_core::error::ConverterError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_HTML: &str = "text/html";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_JSON: &str = "application/json";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_TEXT: &str = "text/plain";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Worksheet column limit (`XFD`).
const XLSX_MAX_COLUMNS: usize = 16_384;
/// Zip-bomb guard for a single decompressed archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Dispatches on a normalized content type (no parameters, lowercase).
pub fn extract_markdown(bytes: &[u8], content_type: &str) -> Result<String, ConverterError> {
    let markdown = match content_type {
        MIME_PDF => extract_pdf(bytes)?,
        MIME_DOCX => extract_docx(bytes)?,
        MIME_PPTX => extract_pptx(bytes)?,
        MIME_XLSX => extract_xlsx(bytes)?,
        MIME_HTML | "application/xhtml+xml" => extract_html(&decode_utf8(bytes, "HTML")?),
        MIME_CSV => csv_to_markdown(&decode_utf8(bytes, "CSV")?)?,
        MIME_JSON => json_to_markdown(bytes)?,
        t if t.starts_with("text/") => decode_utf8(bytes, "text")?,
        other => return Err(ConverterError::UnsupportedContentType(other.to_string())),
    };
    Ok(markdown)
}

fn extraction(format: &'static str, detail: impl ToString) -> ConverterError {
    ConverterError::Extraction {
        format,
        detail: detail.to_string(),
    }
}

fn decode_utf8(bytes: &[u8], format: &'static str) -> Result<String, ConverterError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| extraction(format, e))
}

/// Collapses runs of blank lines and trims trailing whitespace per line.
fn tidy(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> Result<String, ConverterError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| extraction("PDF", e))?;
    Ok(tidy(&text))
}

// ============ OOXML shared helpers ============

fn open_archive<'a>(bytes: &'a [u8], format: &'static str) -> Result<Archive<'a>, ConverterError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| extraction(format, e))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    format: &'static str,
) -> Result<Vec<u8>, ConverterError> {
    let entry = archive.by_name(name).map_err(|e| extraction(format, e))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| extraction(format, e))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(extraction(
            format,
            format!("ZIP entry {} exceeds size limit ({} bytes)", name, MAX_XML_ENTRY_BYTES),
        ));
    }
    Ok(out)
}

/// Entry names under `prefix` ending in `.xml`, ordered by their number
/// (`slide2.xml` before `slide10.xml`).
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn attr_value(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Paragraph texts of a DrawingML/WordprocessingML part. Paragraphs are
/// `<p>` elements; text runs are `<t>` elements. With `styles`, a
/// `<pStyle val="HeadingN">` turns the paragraph into a level-N heading.
fn xml_paragraphs(xml: &[u8], styles: bool, format: &'static str) -> Result<Vec<String>, ConverterError> {
    let mut paragraphs = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut heading: Option<usize> = None;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => {
                    current.clear();
                    heading = None;
                }
                b"pStyle" if styles => heading = heading_level(&e),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"pStyle" if styles => heading = heading_level(&e),
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| extraction(format, e))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = current.trim();
                    if !text.is_empty() {
                        paragraphs.push(match heading {
                            Some(level) => format!("{} {}", "#".repeat(level), text),
                            None => text.to_string(),
                        });
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(extraction(format, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn heading_level(e: &BytesStart<'_>) -> Option<usize> {
    let style = attr_value(e, b"val")?;
    if style.eq_ignore_ascii_case("title") {
        return Some(1);
    }
    let level = style
        .strip_prefix("Heading")
        .or_else(|| style.strip_prefix("heading"))?
        .trim()
        .parse::<usize>()
        .ok()?;
    (1..=6).contains(&level).then_some(level)
}

// ============ DOCX ============

fn extract_docx(bytes: &[u8]) -> Result<String, ConverterError> {
    let mut archive = open_archive(bytes, "DOCX")?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", "DOCX")?;
    let paragraphs = xml_paragraphs(&xml, true, "DOCX")?;
    Ok(paragraphs.join("\n\n"))
}

// ============ PPTX ============

fn extract_pptx(bytes: &[u8]) -> Result<String, ConverterError> {
    let mut archive = open_archive(bytes, "PPTX")?;
    let slides = numbered_entries(&archive, "ppt/slides/slide");
    let mut sections = Vec::new();
    for (idx, name) in slides.iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, name, "PPTX")?;
        let paragraphs = xml_paragraphs(&xml, false, "PPTX")?;
        if paragraphs.is_empty() {
            continue;
        }
        sections.push(format!("## Slide {}\n\n{}", idx + 1, paragraphs.join("\n\n")));
    }
    Ok(sections.join("\n\n"))
}

// ============ XLSX ============

fn extract_xlsx(bytes: &[u8]) -> Result<String, ConverterError> {
    let mut archive = open_archive(bytes, "XLSX")?;
    let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut sections = Vec::new();
    for (idx, name) in sheets.iter().take(XLSX_MAX_SHEETS).enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, name, "XLSX")?;
        let rows = sheet_rows(&xml, &shared_strings)?;
        if rows.is_empty() {
            continue;
        }
        sections.push(format!("## Sheet {}\n\n{}", idx + 1, markdown_table(&rows)));
    }
    Ok(sections.join("\n\n"))
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ConverterError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", "XLSX")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                current.push_str(&te.unescape().map_err(|e| extraction("XLSX", e))?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(extraction("XLSX", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Zero-based column index from an A1-style cell reference (`"C7"` → 2).
///
/// `Ok(None)` when the reference has no column letters. References past
/// the last worksheet column (`XFD`) are rejected.
fn column_index(cell_ref: &str) -> Result<Option<usize>, ConverterError> {
    let letters = cell_ref.bytes().take_while(u8::is_ascii_alphabetic);
    let mut idx = 0usize;
    let mut any = false;
    for b in letters {
        any = true;
        idx = idx
            .checked_mul(26)
            .and_then(|i| i.checked_add(usize::from(b.to_ascii_uppercase() - b'A') + 1))
            .filter(|&i| i <= XLSX_MAX_COLUMNS)
            .ok_or_else(|| {
                extraction(
                    "XLSX",
                    format!("cell reference {} is beyond the last column", cell_ref),
                )
            })?;
    }
    Ok(any.then(|| idx - 1))
}

fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, ConverterError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row: Vec<String> = Vec::new();
    let mut cell_type = String::new();
    let mut cell_col: Option<usize> = None;
    let mut value = String::new();
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    cell_type = attr_value(&e, b"t").unwrap_or_default();
                    cell_col = match attr_value(&e, b"r") {
                        Some(cell_ref) => column_index(&cell_ref)?,
                        None => None,
                    };
                    value.clear();
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                value.push_str(&te.unescape().map_err(|e| extraction("XLSX", e))?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let text = match cell_type.as_str() {
                        "s" => value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                            .unwrap_or_default(),
                        "b" => match value.trim() {
                            "1" => "TRUE".to_string(),
                            _ => "FALSE".to_string(),
                        },
                        _ => value.trim().to_string(),
                    };
                    let col = cell_col.unwrap_or(row.len());
                    if row.len() <= col {
                        row.resize(col + 1, String::new());
                    }
                    row[col] = text;
                    cell_count += 1;
                }
                b"row" => {
                    if row.iter().any(|c| !c.is_empty()) {
                        rows.push(std::mem::take(&mut row));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(extraction("XLSX", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

/// Renders rows as a markdown table; the first row is the header.
fn markdown_table(rows: &[Vec<String>]) -> String {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let render = |cells: &[String]| {
        let mut padded: Vec<String> = cells
            .iter()
            .map(|c| c.replace('|', "\\|").replace('\n', " "))
            .collect();
        padded.resize(width, String::new());
        format!("| {} |", padded.join(" | "))
    };
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(render(&rows[0]));
    lines.push(format!("|{}", " --- |".repeat(width)));
    for row in &rows[1..] {
        lines.push(render(row));
    }
    lines.join("\n")
}

// ============ CSV / JSON ============

fn csv_to_markdown(text: &str) -> Result<String, ConverterError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| extraction("CSV", e))?;
        if record.iter().any(|f| !f.is_empty()) {
            rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }
    }
    if rows.is_empty() {
        return Ok(String::new());
    }
    Ok(markdown_table(&rows))
}

fn json_to_markdown(bytes: &[u8]) -> Result<String, ConverterError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| extraction("JSON", e))?;
    let pretty = serde_json::to_string_pretty(&value).map_err(|e| extraction("JSON", e))?;
    Ok(format!("```json\n{}\n```", pretty))
}

// ============ HTML ============

fn extract_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    let root = Selector::parse("body")
        .ok()
        .and_then(|body| document.select(&body).next())
        .unwrap_or_else(|| document.root_element());
    render_html(root, &mut out);
    tidy(&out)
}

fn render_html(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
                let needs_gap = !out.is_empty() && !out.ends_with([' ', '\n']);
                if collapsed.is_empty() {
                    if !text.is_empty() && needs_gap {
                        out.push(' ');
                    }
                    continue;
                }
                if text.starts_with(char::is_whitespace) && needs_gap {
                    out.push(' ');
                }
                out.push_str(&collapsed);
                if text.ends_with(char::is_whitespace) {
                    out.push(' ');
                }
            }
            Node::Element(el) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                match el.name() {
                    "script" | "style" | "noscript" | "template" | "head" => {}
                    "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                        let level = el.name()[1..].parse::<usize>().unwrap_or(1);
                        let text = inline_text(child_el);
                        if !text.is_empty() {
                            out.push_str(&format!("\n\n{} {}\n\n", "#".repeat(level), text));
                        }
                    }
                    "p" | "div" | "section" | "article" | "blockquote" | "table" | "tr" => {
                        out.push_str("\n\n");
                        render_html(child_el, out);
                        out.push_str("\n\n");
                    }
                    "br" => out.push('\n'),
                    "li" => {
                        out.push_str("\n- ");
                        render_html(child_el, out);
                    }
                    "ul" | "ol" => {
                        out.push('\n');
                        render_html(child_el, out);
                        out.push('\n');
                    }
                    "pre" => {
                        let code: String = child_el.text().collect();
                        out.push_str(&format!("\n\n```\n{}\n```\n\n", code.trim_end()));
                    }
                    "a" => {
                        let text = inline_text(child_el);
                        match el.attr("href") {
                            Some(href) if !text.is_empty() => {
                                out.push_str(&format!("[{}]({})", text, href))
                            }
                            _ => out.push_str(&text),
                        }
                    }
                    "strong" | "b" => wrap_inline(child_el, "**", out),
                    "em" | "i" => wrap_inline(child_el, "*", out),
                    "code" => wrap_inline(child_el, "`", out),
                    "td" | "th" => {
                        render_html(child_el, out);
                        out.push(' ');
                    }
                    _ => render_html(child_el, out),
                }
            }
            _ => {}
        }
    }
}

fn inline_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn wrap_inline(element: ElementRef<'_>, marker: &str, out: &mut String) {
    let text = inline_text(element);
    if !text.is_empty() {
        out.push_str(&format!("{}{}{}", marker, text, marker));
    }
}
