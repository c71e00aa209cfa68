//! Markdown document: `![alt](url "title")`, reference images and inline
//! `<img>` tags. Code spans and code blocks are left alone.

use std::collections::HashMap;
use std::ops::Range;

use pulldown_cmark::{Event, LinkType, Parser, RefDefs, Tag, TagEnd};
use tracing::trace;

use super::html::{ImageRef, Quoting, drop_overlapping, find_img_tags, splice};
use crate::ports::ImageDocument;

/// Image whose alt text is still being read.
struct OpenImage {
    link_type: LinkType,
    dest_url: String,
    id: String,
    span: Range<usize>,
    alt_end: usize,
}

impl OpenImage {
    /// Source range holding the destination as written.
    fn destination_area(&self, definitions: &RefDefs<'_>) -> Option<Range<usize>> {
        match self.link_type {
            LinkType::Inline => Some(self.alt_end..self.span.end),
            LinkType::Reference | LinkType::Collapsed | LinkType::Shortcut => {
                let def = match definitions.get(&self.id) {
                    Some(def) => def,
                    None => definitions
                        .iter()
                        .map(|(_, def)| def)
                        .find(|def| def.dest.as_ref() == self.dest_url)?,
                };
                Some(def.span.clone())
            }
            _ => None,
        }
    }

    fn locate(self, text: &str, definitions: &RefDefs<'_>) -> Option<ImageRef> {
        let area = self.destination_area(definitions)?;
        let Some(offset) = text[area.clone()].find(&self.dest_url) else {
            trace!(dest_url = %self.dest_url, "image destination not written verbatim, skipped");
            return None;
        };
        let start = area.start + offset;
        Some(ImageRef {
            span: start..start + self.dest_url.len(),
            url: self.dest_url,
            quoting: Quoting::Raw,
        })
    }
}

fn find_images(text: &str) -> Vec<ImageRef> {
    let defs_parser = Parser::new(text);
    let definitions = defs_parser.reference_definitions();

    let mut refs = Vec::new();
    let mut open: Vec<OpenImage> = Vec::new();
    for (event, range) in Parser::new(text).into_offset_iter() {
        match event {
            Event::Start(Tag::Image {
                link_type,
                dest_url,
                id,
                ..
            }) => {
                if let Some(outer) = open.last_mut() {
                    outer.alt_end = outer.alt_end.max(range.end);
                }
                open.push(OpenImage {
                    link_type,
                    dest_url: dest_url.into_string(),
                    id: id.into_string(),
                    alt_end: range.start + 2,
                    span: range,
                });
            }
            Event::End(TagEnd::Image) => {
                if let Some(image) = open.pop() {
                    refs.extend(image.locate(text, definitions));
                }
            }
            other => {
                if matches!(other, Event::Html(_) | Event::InlineHtml(_)) {
                    let base = range.start;
                    refs.extend(find_img_tags(&text[range.clone()]).into_iter().map(|mut image| {
                        image.span = base + image.span.start..base + image.span.end;
                        image
                    }));
                }
                if let Some(image) = open.last_mut() {
                    image.alt_end = image.alt_end.max(range.end);
                }
            }
        }
    }
    drop_overlapping(&mut refs);
    refs
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownDocument {
    text: String,
}

impl MarkdownDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl ImageDocument for MarkdownDocument {
    fn extract_image_refs(&self) -> Vec<String> {
        find_images(&self.text)
            .into_iter()
            .map(|image| image.url)
            .collect()
    }

    fn replace_image_refs(&mut self, replacements: &HashMap<String, String>) {
        let refs = find_images(&self.text);
        if let Some(rewritten) = splice(&self.text, &refs, replacements) {
            self.text = rewritten;
        }
    }
}
