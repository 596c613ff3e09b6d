//! Hierarchical outlines built from paragraph summaries.
//!
//! The model writes outlines as nested
//! `<section id="..." title="...">...</section>` markup, usually with some
//! prose around it. [`parse_sections`] turns that into a [`Section`] tree; the
//! raw text is always kept next to the tree so a failed parse can be
//! inspected by hand.

use anyhow::Result;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::layers::error;
use crate::layers::llm::ChatModel;
use crate::layers::pacing::Pacer;
use crate::layers::repository::{read_json, write_json};
use crate::layers::summarize::SummaryRecord;
use crate::layers::tags::{collapse_whitespace, Tag, TagKind, TagStream};

pub const SUMMARIES_PER_OUTLINE: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subsections: Vec<Section>,
}

impl Section {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            subsections: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        1 + self.subsections.iter().map(Section::depth).max().unwrap_or(0)
    }
}

/// A model-written outline: the raw answer and, when it parsed, the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub topic: String,
    pub text: String,
    pub outline: Option<Vec<Section>>,
}

impl Outline {
    fn from_response(topic: &str, text: String) -> Self {
        let sections = parse_sections(&text);
        let outline = if sections.is_empty() {
            tracing::error!("\tError parsing response: {}", text);
            None
        } else {
            let duplicates = duplicate_ids(&sections);
            if !duplicates.is_empty() {
                tracing::warn!("\tOutline reuses section ids: {}", duplicates.join(", "));
            }
            Some(sections)
        };
        Self {
            topic: topic.to_string(),
            text,
            outline,
        }
    }
}

/// Parses every root section found in `text`.
///
/// Anything that is not a well-formed section tag is skipped. A section left
/// open runs to the end of the input, and a stray close tag at the root is
/// ignored.
pub fn parse_sections(text: &str) -> Vec<Section> {
    let mut tags = TagStream::new(text);
    let mut roots = Vec::new();
    while let Some(tag) = tags.next() {
        if let Some(section) = open_section(&tag) {
            roots.push(build_section(section, tag.kind, &mut tags));
        }
    }
    roots
}

fn open_section(tag: &Tag<'_>) -> Option<Section> {
    if !tag.is("section") || tag.kind == TagKind::Close {
        return None;
    }
    let id = attribute_text(tag.attr("id")?)?;
    let title = attribute_text(tag.attr("title")?)?;
    Some(Section::new(id, title))
}

fn build_section(mut section: Section, kind: TagKind, tags: &mut TagStream<'_>) -> Section {
    if kind == TagKind::SelfClosing {
        return section;
    }
    while let Some(tag) = tags.next() {
        if tag.is("section") && tag.kind == TagKind::Close {
            return section;
        }
        if let Some(child) = open_section(&tag) {
            section.subsections.push(build_section(child, tag.kind, tags));
        }
    }
    section
}

fn attribute_text(raw: &str) -> Option<String> {
    let collapsed = collapse_whitespace(raw);
    let text = quick_xml::escape::unescape(&collapsed)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| collapsed.clone());
    (!text.is_empty()).then_some(text)
}

/// Writes sections back as markup that [`parse_sections`] reads.
pub fn to_markup(sections: &[Section]) -> error::Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    for section in sections {
        write_section(&mut writer, section)?;
    }
    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

fn write_section(writer: &mut Writer<Vec<u8>>, section: &Section) -> error::Result<()> {
    let start = BytesStart::new("section")
        .with_attributes([("id", section.id.as_str()), ("title", section.title.as_str())]);
    writer.write_event(Event::Start(start))?;
    for child in &section.subsections {
        write_section(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new("section")))?;
    Ok(())
}

/// Nested bullet list, one line per section.
pub fn to_markdown(sections: &[Section]) -> String {
    fn walk(out: &mut String, sections: &[Section], level: usize) {
        for section in sections {
            out.push_str(&"  ".repeat(level));
            out.push_str(&format!("- {} (`{}`)\n", section.title, section.id));
            walk(out, &section.subsections, level + 1);
        }
    }
    let mut out = String::new();
    walk(&mut out, sections, 0);
    out
}

/// Ids used by more than one section anywhere in the tree.
pub fn duplicate_ids(sections: &[Section]) -> Vec<String> {
    fn walk<'a>(sections: &'a [Section], seen: &mut HashSet<&'a str>, dups: &mut Vec<String>) {
        for section in sections {
            if !seen.insert(section.id.as_str()) && !dups.contains(&section.id) {
                dups.push(section.id.clone());
            }
            walk(&section.subsections, seen, dups);
        }
    }
    let mut dups = Vec::new();
    walk(sections, &mut HashSet::new(), &mut dups);
    dups
}

const OUTLINE_FORMAT: &str = r#"
<section id="id of the section" title="title of the section">
    <section id=..., title=...>...</section>
    <section id=..., title=...>...</section>
</section>
<section id="id of the section" title="title of the section">
    <section id=..., title=...>...</section>
    <section id=..., title=...>...</section>
</section>
...
"#;

/// Outline of a batch of paragraph summaries, as the basis of an article on `topic`.
pub async fn make_outline(model: &dyn ChatModel, summaries: &[SummaryRecord], topic: &str) -> error::Result<Outline> {
    let listing = summaries
        .iter()
        .map(|s| format!("<summary>{}</summary>", s.summary))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "You are a helpful research assistant that goes through batches of text summaries to produce \
         an outline that can be used as the basis of a comprehensive article about a given topic. The \
         topic is given within <topic>...</topic> tags and the summaries as:\n\n\
         <summary>summary 1</summary>\n<summary>summary 2</summary>\n\n\
         Write the outline in this hierarchical format:\n{OUTLINE_FORMAT}\n\
         Each id must be unique, made of lowercase words joined by hyphens. Each title briefly \
         describes the content of its section.\n\n\
         Here is the topic:\n<topic>{topic}</topic>\n\n\
         Here are the text summaries:\n{listing}\n\nProvide your outline below:\n"
    );
    let response = model.respond(&prompt).await?;
    Ok(Outline::from_response(topic, response))
}

/// Asks the model to fold several outlines into one.
///
/// The raw text of each outline goes into the prompt; deduplication is left
/// entirely to the model.
pub async fn merge_outlines(model: &dyn ChatModel, outlines: &[Outline], topic: &str) -> error::Result<Outline> {
    let listing = outlines
        .iter()
        .map(|o| format!("<outline>{}</outline>", o.text))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "To produce a coherent write-up of a given topic, build one comprehensive outline of an \
         article on it. You are given several outlines, each generated from a subset of the text; \
         they may overlap or complement each other. Incorporate them into one single coherent \
         outline. The topic is given within <topic>...</topic> tags.\n\n\
         Each outline is in this format:\n<outline>\n{OUTLINE_FORMAT}\n</outline>\n\n\
         Each id must be unique, made of lowercase words joined by hyphens. Each title briefly \
         describes the content of its section. Write your outline in the same format.\n\n\
         Here is the topic:\n<topic>{topic}</topic>\n\n\
         Here are the outlines:\n{listing}\n\nProvide your best outline below:\n"
    );
    let response = model.respond(&prompt).await?;
    Ok(Outline::from_response(topic, response))
}

/// One outline per batch of summaries, written to `path` after each batch.
/// Batches already in the file are not redone.
pub async fn run(
    model: &dyn ChatModel,
    pacer: &Pacer,
    summaries: &[SummaryRecord],
    topic: &str,
    batch_size: usize,
    path: &Path,
) -> Result<Vec<Outline>> {
    let mut outlines: Vec<Outline> = if path.exists() { read_json(path).await? } else { Vec::new() };
    let batches: Vec<&[SummaryRecord]> = summaries.chunks(batch_size.max(1)).collect();

    for (i, batch) in batches.iter().enumerate().skip(outlines.len()) {
        pacer.ready().await;
        tracing::info!("Processing batch {}/{}", i + 1, batches.len());
        match make_outline(model, batch, topic).await {
            Ok(outline) => {
                outlines.push(outline);
                write_json(path, &outlines).await?;
            }
            Err(e) => {
                // later batches would shift into this slot on resume
                tracing::error!("Batch {}/{} failed: {}", i + 1, batches.len(), e);
                break;
            }
        }
    }
    Ok(outlines)
}
