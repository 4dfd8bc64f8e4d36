//! Minimal Office Open XML workbook codec.
//!
//! Writing produces one worksheet of inline string cells. Reading takes the
//! first worksheet of any workbook and returns every cell as text: shared
//! strings are resolved, numbers come back as their literal `<v>` text.

use anyhow::{anyhow, Context};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

const CONTENT_TYPES_ENTRY: &str = "[Content_Types].xml";
const ROOT_RELS_ENTRY: &str = "_rels/.rels";
const WORKBOOK_ENTRY: &str = "xl/workbook.xml";
const WORKBOOK_RELS_ENTRY: &str = "xl/_rels/workbook.xml.rels";
const FIRST_SHEET_ENTRY: &str = "xl/worksheets/sheet1.xml";
const SHARED_STRINGS_ENTRY: &str = "xl/sharedStrings.xml";

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n";
const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_PKG_REL: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

pub fn write_workbook(path: &Path, sheet_name: &str, rows: &[Vec<String>]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out = File::create(path)
        .with_context(|| format!("failed to create output file {}", path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out);
    // Fixed timestamps keep identical sheets byte-identical.
    let opts = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let entries = [
        (CONTENT_TYPES_ENTRY, content_types_xml()),
        (ROOT_RELS_ENTRY, root_rels_xml()),
        (WORKBOOK_ENTRY, workbook_xml(sheet_name)),
        (WORKBOOK_RELS_ENTRY, workbook_rels_xml()),
        (FIRST_SHEET_ENTRY, worksheet_xml(rows)),
    ];
    for (name, body) in entries {
        zip.start_file(name, opts)
            .with_context(|| format!("failed to start {} entry", name))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("failed to write {} entry", name))?;
    }
    zip.finish().context("failed to finalize workbook")?;
    Ok(())
}

pub fn read_first_sheet(path: &Path) -> anyhow::Result<(String, Vec<Vec<String>>)> {
    let f = File::open(path)
        .with_context(|| format!("failed to open workbook {}", path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(f).context("not a valid xlsx (zip) file")?;

    let workbook = read_entry(&mut archive, WORKBOOK_ENTRY)?
        .ok_or_else(|| anyhow!("workbook is missing {}", WORKBOOK_ENTRY))?;
    let (sheet_name, rel_id) = first_sheet_ref(&workbook)
        .ok_or_else(|| anyhow!("workbook declares no sheets"))?;
    let sheet_entry = match (rel_id, read_entry(&mut archive, WORKBOOK_RELS_ENTRY)?) {
        (Some(rid), Some(rels)) => {
            relationship_target(&rels, &rid).unwrap_or_else(|| FIRST_SHEET_ENTRY.to_string())
        }
        _ => FIRST_SHEET_ENTRY.to_string(),
    };
    let shared = match read_entry(&mut archive, SHARED_STRINGS_ENTRY)? {
        Some(xml) => parse_shared_strings(&xml),
        None => Vec::new(),
    };
    let sheet_xml = read_entry(&mut archive, &sheet_entry)?
        .ok_or_else(|| anyhow!("workbook is missing {}", sheet_entry))?;
    Ok((sheet_name, parse_sheet_rows(&sheet_xml, &shared)?))
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> anyhow::Result<Option<String>> {
    let mut f = match archive.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to open {}", name)),
    };
    let mut text = String::new();
    f.read_to_string(&mut text)
        .with_context(|| format!("failed to read {}", name))?;
    Ok(Some(text))
}

fn content_types_xml() -> String {
    format!(
        "{XML_DECL}<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
<Default Extension=\"xml\" ContentType=\"application/xml\"/>\
<Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>\
<Override PartName=\"/xl/worksheets/sheet1.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>\
</Types>"
    )
}

fn root_rels_xml() -> String {
    format!(
        "{XML_DECL}<Relationships xmlns=\"{NS_PKG_REL}\">\
<Relationship Id=\"rId1\" Type=\"{NS_REL}/officeDocument\" Target=\"xl/workbook.xml\"/>\
</Relationships>"
    )
}

fn workbook_xml(sheet_name: &str) -> String {
    format!(
        "{XML_DECL}<workbook xmlns=\"{NS_MAIN}\" xmlns:r=\"{NS_REL}\">\
<sheets><sheet name=\"{}\" sheetId=\"1\" r:id=\"rId1\"/></sheets></workbook>",
        escape_xml(sheet_name)
    )
}

fn workbook_rels_xml() -> String {
    format!(
        "{XML_DECL}<Relationships xmlns=\"{NS_PKG_REL}\">\
<Relationship Id=\"rId1\" Type=\"{NS_REL}/worksheet\" Target=\"worksheets/sheet1.xml\"/>\
</Relationships>"
    )
}

fn worksheet_xml(rows: &[Vec<String>]) -> String {
    let mut out = format!("{XML_DECL}<worksheet xmlns=\"{NS_MAIN}\"><sheetData>");
    for (ri, row) in rows.iter().enumerate() {
        let r = ri + 1;
        out.push_str(&format!("<row r=\"{}\">", r));
        for (ci, cell) in row.iter().enumerate() {
            out.push_str(&format!(
                "<c r=\"{}{}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                column_name(ci),
                r,
                escape_xml(cell)
            ));
        }
        out.push_str("</row>");
    }
    out.push_str("</sheetData></worksheet>");
    out
}

pub fn column_name(mut idx: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (idx % 26) as u8);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    name.reverse();
    String::from_utf8(name).unwrap_or_default()
}

// Sheet limits of the format itself (XFD, 1048576).
const MAX_COLUMNS: usize = 16_384;
const MAX_ROWS: usize = 1_048_576;

fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: Vec<u8> = cell_ref
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .map(|b| b.to_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut n = 0usize;
    for b in letters {
        n = n.checked_mul(26)?.checked_add((b - b'A' + 1) as usize)?;
        if n > MAX_COLUMNS {
            return None;
        }
    }
    Some(n - 1)
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => {
                if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok().and_then(char::from_u32)
                } else {
                    None
                }
            }
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

struct OpenTag<'a> {
    attrs: &'a str,
    self_closing: bool,
    end: usize,
}

fn find_open_tag<'a>(xml: &'a str, from: usize, name: &str) -> Option<OpenTag<'a>> {
    let pat = format!("<{}", name);
    let mut pos = from;
    while pos <= xml.len() {
        let start = pos + xml[pos..].find(&pat)?;
        let after = start + pat.len();
        match xml[after..].chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => {
                let close = after + xml[after..].find('>')?;
                let self_closing = xml[..close].ends_with('/');
                let attrs_end = if self_closing { close - 1 } else { close };
                return Some(OpenTag {
                    attrs: &xml[after..attrs_end],
                    self_closing,
                    end: close + 1,
                });
            }
            _ => pos = after,
        }
    }
    None
}

fn element_body<'a>(xml: &'a str, tag: &OpenTag<'_>, name: &str) -> Option<(&'a str, usize)> {
    if tag.self_closing {
        return Some(("", tag.end));
    }
    let close = format!("</{}>", name);
    let rel = xml[tag.end..].find(&close)?;
    Some((&xml[tag.end..tag.end + rel], tag.end + rel + close.len()))
}

fn attr<'a>(attrs: &'a str, key: &str) -> Option<&'a str> {
    let pat = format!("{}=", key);
    let mut pos = 0usize;
    while let Some(rel) = attrs[pos..].find(&pat) {
        let start = pos + rel;
        let boundary = start == 0
            || attrs[..start]
                .chars()
                .next_back()
                .map(|c| c.is_whitespace())
                .unwrap_or(true);
        let value_start = start + pat.len();
        if boundary {
            let quote = attrs[value_start..].chars().next()?;
            if quote == '"' || quote == '\'' {
                let body = &attrs[value_start + 1..];
                let end = body.find(quote)?;
                return Some(&body[..end]);
            }
        }
        pos = value_start;
    }
    None
}

fn text_runs(xml: &str) -> String {
    let mut out = String::new();
    let mut pos = 0usize;
    while let Some(tag) = find_open_tag(xml, pos, "t") {
        let Some((body, next)) = element_body(xml, &tag, "t") else {
            break;
        };
        out.push_str(&unescape_xml(body));
        pos = next;
    }
    out
}

fn first_sheet_ref(workbook: &str) -> Option<(String, Option<String>)> {
    let tag = find_open_tag(workbook, 0, "sheet")?;
    let name = unescape_xml(attr(tag.attrs, "name").unwrap_or("Sheet1"));
    let rid = attr(tag.attrs, "r:id").map(|s| s.to_string());
    Some((name, rid))
}

fn relationship_target(rels: &str, rid: &str) -> Option<String> {
    let mut pos = 0usize;
    while let Some(tag) = find_open_tag(rels, pos, "Relationship") {
        pos = tag.end;
        if attr(tag.attrs, "Id") != Some(rid) {
            continue;
        }
        let target = attr(tag.attrs, "Target")?;
        return Some(match target.strip_prefix('/') {
            Some(abs) => abs.to_string(),
            None => format!("xl/{}", target),
        });
    }
    None
}

fn parse_shared_strings(xml: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while let Some(tag) = find_open_tag(xml, pos, "si") {
        let Some((body, next)) = element_body(xml, &tag, "si") else {
            break;
        };
        out.push(text_runs(body));
        pos = next;
    }
    out
}

fn parse_sheet_rows(xml: &str, shared: &[String]) -> anyhow::Result<Vec<Vec<String>>> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut pos = 0usize;
    while let Some(row_tag) = find_open_tag(xml, pos, "row") {
        let (row_body, next) = element_body(xml, &row_tag, "row")
            .ok_or_else(|| anyhow!("unterminated <row> element"))?;
        pos = next;

        let row_no = attr(row_tag.attrs, "r")
            .and_then(|r| r.parse::<usize>().ok())
            .unwrap_or(rows.len() + 1);
        if row_no > MAX_ROWS {
            return Err(anyhow!("row number {} is past the sheet limit", row_no));
        }
        while rows.len() + 1 < row_no {
            rows.push(Vec::new());
        }

        let mut cells: Vec<String> = Vec::new();
        let mut cpos = 0usize;
        while let Some(c_tag) = find_open_tag(row_body, cpos, "c") {
            let (c_body, c_next) = element_body(row_body, &c_tag, "c")
                .ok_or_else(|| anyhow!("unterminated <c> element in row {}", row_no))?;
            cpos = c_next;

            let col = match attr(c_tag.attrs, "r") {
                Some(r) if r.bytes().next().is_some_and(|b| b.is_ascii_alphabetic()) => {
                    column_index(r).ok_or_else(|| anyhow!("cell reference {} is out of range", r))?
                }
                _ => cells.len(),
            };
            if col >= MAX_COLUMNS {
                return Err(anyhow!("row {} has more than {} cells", row_no, MAX_COLUMNS));
            }
            let value = cell_value(c_body, attr(c_tag.attrs, "t"), shared)?;
            if cells.len() <= col {
                cells.resize(col + 1, String::new());
            }
            cells[col] = value;
        }
        rows.push(cells);
    }
    Ok(rows)
}

fn cell_value(body: &str, cell_type: Option<&str>, shared: &[String]) -> anyhow::Result<String> {
    if cell_type == Some("inlineStr") {
        return Ok(text_runs(body));
    }
    let raw = match find_open_tag(body, 0, "v") {
        Some(tag) => element_body(body, &tag, "v")
            .map(|(v, _)| unescape_xml(v))
            .unwrap_or_default(),
        None => return Ok(String::new()),
    };
    if cell_type == Some("s") {
        let idx = raw
            .trim()
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid shared string index: {}", raw))?;
        return shared
            .get(idx)
            .cloned()
            .ok_or_else(|| anyhow!("shared string index out of range: {}", idx));
    }
    Ok(raw)
}
