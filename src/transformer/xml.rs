//! XML body rewriting.
//!
//! The document is streamed event by event. Only rewritten text, CDATA
//! sections and start tags are re-emitted; every other event is written back
//! from its raw bytes. The document must have exactly one root element, with
//! only whitespace, comments and processing instructions around it.

use super::{parse_error, ContentKind, NodeRewriter, RewriteError};
use crate::matcher::PathElement;
use quick_xml::events::{BytesCData, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// Rewrite the text, CDATA and attribute values of an XML document.
///
/// Returns `None` when nothing changed.
pub(super) async fn rewrite(
    text: &str,
    rewriter: &NodeRewriter<'_>,
) -> Result<Option<String>, RewriteError> {
    let mut reader = Reader::from_str(text);
    let mut writer = Writer::new(Vec::with_capacity(text.len()));
    let mut path: Vec<PathElement> = Vec::new();
    let mut root = Root::Pending;
    let mut changed = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            parse_error(
                ContentKind::Xml,
                format!("{} (at byte {})", e, reader.error_position()),
            )
        })?;

        match event {
            Event::Start(start) => {
                if path.is_empty() {
                    root.open()?;
                }
                path.push(PathElement::Name(element_name(&start)?));
                let start = rewrite_attributes(start, &mut path, rewriter, &mut changed).await?;
                write(&mut writer, Event::Start(start))?;
            }
            Event::Empty(start) => {
                if path.is_empty() {
                    root.open()?;
                    root = Root::Closed;
                }
                path.push(PathElement::Name(element_name(&start)?));
                let start = rewrite_attributes(start, &mut path, rewriter, &mut changed).await?;
                path.pop();
                write(&mut writer, Event::Empty(start))?;
            }
            Event::End(end) => {
                path.pop();
                if path.is_empty() {
                    root = Root::Closed;
                }
                write(&mut writer, Event::End(end))?;
            }
            Event::Text(content) if path.is_empty() => {
                if !content.iter().all(u8::is_ascii_whitespace) {
                    return Err(parse_error(
                        ContentKind::Xml,
                        format!(
                            "text outside the root element (at byte {})",
                            reader.buffer_position()
                        ),
                    ));
                }
                write(&mut writer, Event::Text(content))?;
            }
            Event::Text(content) => {
                let value = content
                    .unescape()
                    .map_err(|e| parse_error(ContentKind::Xml, e))?
                    .into_owned();
                let (leading, scalar, trailing) = split_padding(&value);
                let replacement = if scalar.is_empty() {
                    None
                } else {
                    rewriter.rewrite(&path, scalar).await?
                };
                match replacement {
                    Some(output) => {
                        changed = true;
                        let padded = format!("{}{}{}", leading, output, trailing);
                        write(&mut writer, Event::Text(BytesText::new(&padded)))?;
                    }
                    None => write(&mut writer, Event::Text(content))?,
                }
            }
            Event::CData(_) if path.is_empty() => {
                return Err(parse_error(
                    ContentKind::Xml,
                    format!(
                        "CDATA outside the root element (at byte {})",
                        reader.buffer_position()
                    ),
                ));
            }
            Event::CData(content) => {
                let value = std::str::from_utf8(&content)
                    .map_err(|e| parse_error(ContentKind::Xml, e))?
                    .to_string();
                match rewriter.rewrite(&path, &value).await? {
                    Some(output) => {
                        changed = true;
                        write_cdata(&mut writer, &output)?;
                    }
                    None => write(&mut writer, Event::CData(content))?,
                }
            }
            Event::Eof => break,
            other => write(&mut writer, other)?,
        }
    }

    if let Some(PathElement::Name(open)) = path.last() {
        return Err(parse_error(
            ContentKind::Xml,
            format!("unclosed element <{}>", open),
        ));
    }
    if root == Root::Pending {
        return Err(parse_error(ContentKind::Xml, "no root element"));
    }

    if !changed {
        return Ok(None);
    }

    String::from_utf8(writer.into_inner())
        .map(Some)
        .map_err(|e| parse_error(ContentKind::Xml, e))
}

/// Where the reader is relative to the document element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Pending,
    Open,
    Closed,
}

impl Root {
    fn open(&mut self) -> Result<(), RewriteError> {
        if *self != Root::Pending {
            return Err(parse_error(ContentKind::Xml, "more than one root element"));
        }
        *self = Root::Open;
        Ok(())
    }
}

/// Split text into leading whitespace, the scalar, and trailing whitespace.
fn split_padding(value: &str) -> (&str, &str, &str) {
    let start = value.len() - value.trim_start().len();
    let end = value.trim_end().len().max(start);
    (&value[..start], &value[start..end], &value[end..])
}

/// Write `output` as CDATA, splitting sections at every `]]>`.
fn write_cdata(writer: &mut Writer<Vec<u8>>, output: &str) -> Result<(), RewriteError> {
    let mut parts = output.split("]]>").peekable();
    let mut first = true;
    while let Some(part) = parts.next() {
        let mut section = String::with_capacity(part.len() + 3);
        if !first {
            section.push('>');
        }
        section.push_str(part);
        if parts.peek().is_some() {
            section.push_str("]]");
        }
        write(writer, Event::CData(BytesCData::new(section)))?;
        first = false;
    }
    Ok(())
}

fn element_name(start: &BytesStart<'_>) -> Result<String, RewriteError> {
    std::str::from_utf8(start.name().as_ref())
        .map(str::to_string)
        .map_err(|e| parse_error(ContentKind::Xml, e))
}

/// Rewrite selected attribute values; the tag is rebuilt only if one changed.
async fn rewrite_attributes<'a>(
    start: BytesStart<'a>,
    path: &mut Vec<PathElement>,
    rewriter: &NodeRewriter<'_>,
    changed: &mut bool,
) -> Result<BytesStart<'a>, RewriteError> {
    let mut replacements = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| parse_error(ContentKind::Xml, e))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| parse_error(ContentKind::Xml, e))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| parse_error(ContentKind::Xml, e))?
            .into_owned();

        path.push(PathElement::Attribute(key));
        let replacement = rewriter.rewrite(path, &value).await;
        path.pop();
        replacements.push(replacement?);
    }

    if replacements.iter().all(Option::is_none) {
        return Ok(start);
    }
    *changed = true;

    let mut rebuilt = BytesStart::new(element_name(&start)?);
    for (attr, replacement) in start.attributes().zip(replacements) {
        let attr = attr.map_err(|e| parse_error(ContentKind::Xml, e))?;
        match replacement {
            Some(value) => {
                let key = std::str::from_utf8(attr.key.as_ref())
                    .map_err(|e| parse_error(ContentKind::Xml, e))?;
                rebuilt.push_attribute((key, value.as_str()));
            }
            None => rebuilt.push_attribute(attr),
        }
    }
    Ok(rebuilt)
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), RewriteError> {
    writer
        .write_event(event)
        .map_err(|e| parse_error(ContentKind::Xml, e))
}
