//! Custom danmaku XML codec.
//!
//! Parses the dandanplay-style `<i><d p="...">text</d></i>` document with a
//! streaming reader so arbitrarily large uploads stay cheap, and generates
//! the same format for the file storage backend. A line-based plain-text
//! fallback (`time,mode,size,color,... | text`) converts to XML first.

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::warn;

use crate::models::Comment;
use crate::provider::RawComment;

use super::DEFAULT_FONT_SIZE;

/// Provider tag stamped on comments parsed from uploaded XML.
pub const CUSTOM_XML_TAG: &str = "custom_xml";
/// Provider tag stamped on comments converted from the plain-text format.
pub const CUSTOM_TEXT_TAG: &str = "custom_text";

/// Remove characters that are invalid in XML 1.0 documents.
#[must_use]
pub fn clean_xml_string(content: &str) -> String {
    content
        .chars()
        .filter(|&c| {
            c == '\u{9}'
                || c == '\u{A}'
                || c == '\u{D}'
                || ('\u{20}'..='\u{D7FF}').contains(&c)
                || ('\u{E000}'..='\u{FFFD}').contains(&c)
                || c >= '\u{10000}'
        })
        .collect()
}

/// Parse a `p` attribute's core fields, repairing a missing font size.
///
/// Accepted: `time,mode,size,color[,...]` or the 3-field `time,mode,color`
/// variant, which gets `font_size = 25` inserted.
fn parse_p_fields(p: &str) -> Option<RawFields> {
    let parts: Vec<&str> = p.split(',').collect();
    if parts.len() < 3 {
        return None;
    }
    let time_sec: f64 = parts[0].trim().parse().ok()?;
    let mode: u8 = parts[1].trim().parse().unwrap_or(1);

    let (font_size, color_index) = if parts.len() == 3 {
        (DEFAULT_FONT_SIZE, 2)
    } else if parts[2].trim().parse::<u32>().is_ok() {
        (parts[2].trim().parse().unwrap_or(DEFAULT_FONT_SIZE), 3)
    } else {
        // Empty or junk size field: repair with the default.
        (DEFAULT_FONT_SIZE, 3)
    };
    let color: u32 = parts
        .get(color_index)
        .and_then(|c| c.trim().parse().ok())
        .unwrap_or(16_777_215);

    Some(RawFields {
        time_sec,
        mode,
        font_size,
        color,
    })
}

struct RawFields {
    time_sec: f64,
    mode: u8,
    font_size: u32,
    color: u32,
}

/// Streaming-parse an XML danmaku document into raw comments.
///
/// Malformed `<d>` entries are skipped; a parse error mid-document returns
/// whatever was decoded before it.
#[must_use]
pub fn parse_xml_content(xml_content: &str) -> Vec<RawComment> {
    let mut reader = Reader::from_str(xml_content);
    reader.config_mut().trim_text(true);

    let mut comments = Vec::new();
    let mut pending_p: Option<String> = None;
    let mut in_d = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"d" => {
                in_d = true;
                pending_p = e
                    .try_get_attribute("p")
                    .ok()
                    .flatten()
                    .and_then(|attr| attr.unescape_value().ok())
                    .map(|v| v.into_owned());
            }
            Ok(Event::Text(text)) if in_d => {
                if let (Some(p), Ok(content)) = (&pending_p, text.unescape()) {
                    if let Some(fields) = parse_p_fields(p) {
                        comments.push(RawComment {
                            id: format!("custom-{}", comments.len() + 1),
                            time_sec: fields.time_sec,
                            mode: fields.mode,
                            font_size: fields.font_size,
                            color: fields.color,
                            text: content.into_owned(),
                        });
                    }
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"d" => {
                in_d = false;
                pending_p = None;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("XML parse error at byte {}: {e}", reader.buffer_position());
                break;
            }
        }
    }

    comments
}

/// Generate the dandanplay-style XML document for a stored comment list.
///
/// Three-field `p` tuples are repaired by inserting the default font size so
/// every emitted entry is `time,mode,size,color,...`.
#[must_use]
pub fn generate_xml(comments: &[Comment]) -> String {
    let mut parts = vec![
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>".to_string(),
        "<i>".to_string(),
        "  <chatserver>danmu</chatserver>".to_string(),
        "  <chatid>0</chatid>".to_string(),
        "  <mission>0</mission>".to_string(),
        format!("  <maxlimit>{}</maxlimit>", comments.len()),
        "  <source>kuyun</source>".to_string(),
    ];

    for comment in comments {
        let p = repair_p_attribute(&comment.p);
        let text = quick_xml::escape::escape(comment.m.as_str());
        parts.push(format!("  <d p=\"{p}\">{text}</d>"));
    }
    parts.push("</i>".to_string());
    parts.join("\n")
}

fn repair_p_attribute(p: &str) -> String {
    let parts: Vec<&str> = p.split(',').collect();
    // Core fields end where the bracketed provider tag begins.
    let core_end = parts
        .iter()
        .position(|part| part.contains('[') && part.contains(']'))
        .unwrap_or(parts.len());
    let mut core: Vec<String> = parts[..core_end].iter().map(|s| (*s).to_string()).collect();
    let tail: Vec<String> = parts[core_end..].iter().map(|s| (*s).to_string()).collect();

    if core.len() == 3 {
        core.insert(2, DEFAULT_FONT_SIZE.to_string());
    } else if core.len() >= 4 && core[2].trim().parse::<u32>().is_err() {
        core[2] = DEFAULT_FONT_SIZE.to_string();
    }

    core.into_iter().chain(tail).collect::<Vec<_>>().join(",")
}

/// Convert the line-based plain-text format to the XML document above.
///
/// One entry per line: `time,mode,size,color,... | text`. Lines without a
/// `|` separator or with fewer than four fields are skipped.
#[must_use]
pub fn convert_text_danmaku_to_xml(text_content: &str) -> String {
    let mut entries = Vec::new();
    for line in text_content.trim().lines() {
        let Some((params, text)) = line.split_once('|') else {
            continue;
        };
        let fields: Vec<&str> = params.split(',').collect();
        if fields.len() < 4 {
            continue;
        }
        let p = format!(
            "{},{},{},{},[{CUSTOM_TEXT_TAG}]",
            fields[0].trim(),
            fields[1].trim(),
            fields[2].trim(),
            fields[3].trim()
        );
        let escaped = quick_xml::escape::escape(text.trim());
        entries.push(format!("  <d p=\"{p}\">{escaped}</d>"));
    }

    let mut parts = vec![
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>".to_string(),
        "<i>".to_string(),
        "  <chatserver>danmu</chatserver>".to_string(),
        "  <chatid>0</chatid>".to_string(),
        "  <mission>0</mission>".to_string(),
        format!("  <maxlimit>{}</maxlimit>", entries.len()),
        "  <source>danmuhub</source>".to_string(),
    ];
    parts.extend(entries);
    parts.push("</i>".to_string());
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_document() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<i>
  <maxlimit>2</maxlimit>
  <d p="12.34,1,25,16777215,[custom_xml]">hello</d>
  <d p="56.78,5,18,255">&lt;top&gt;</d>
</i>"#;
        let comments = parse_xml_content(xml);
        assert_eq!(comments.len(), 2);
        assert!((comments[0].time_sec - 12.34).abs() < 1e-9);
        assert_eq!(comments[0].text, "hello");
        assert_eq!(comments[1].mode, 5);
        assert_eq!(comments[1].text, "<top>");
    }

    #[test]
    fn three_field_p_gets_default_font_size() {
        let xml = r#"<i><d p="1.5,1,16777215">x</d></i>"#;
        let comments = parse_xml_content(xml);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].font_size, DEFAULT_FONT_SIZE);
        assert_eq!(comments[0].color, 16_777_215);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let xml = r#"<i><d p="bogus">x</d><d p="2.0,1,25,255">ok</d></i>"#;
        let comments = parse_xml_content(xml);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].text, "ok");
    }

    #[test]
    fn clean_xml_string_strips_control_chars() {
        let dirty = "a\u{0}b\u{8}c\nd";
        assert_eq!(clean_xml_string(dirty), "abc\nd");
    }

    #[test]
    fn text_format_converts_and_round_trips() {
        let text = "756.103,1,25,16777215,abc | 前方高能\nbogus line\n12,4,25,255|bottom";
        let xml = convert_text_danmaku_to_xml(text);
        let comments = parse_xml_content(&xml);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].text, "前方高能");
        assert_eq!(comments[1].mode, 4);
    }

    #[test]
    fn generate_repairs_short_p_and_escapes_text() {
        let comments = vec![Comment {
            cid: "a".into(),
            p: "1.23,1,16777215".into(),
            m: "a<b>&c".into(),
            t: 1.23,
        }];
        let xml = generate_xml(&comments);
        assert!(xml.contains("p=\"1.23,1,25,16777215\""));
        assert!(xml.contains("a&lt;b&gt;&amp;c"));
        assert!(xml.contains("<maxlimit>1</maxlimit>"));
    }
}
