//! HTML document: `<img src="...">` references.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::ports::ImageDocument;

/// `<img ... src=...>`; attribute values before `src` may hold `>`.
static IMG_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<img\b(?:[^>"']|"[^"]*"|'[^']*')*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#,
    )
    .expect("img src pattern is valid")
});

/// How an address is written where it was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Quoting {
    /// Markdown destination, written as is.
    Raw,
    Double,
    Single,
    /// Unquoted HTML attribute value; replacements get double quotes.
    Bare,
}

/// One image address found in a document, with the byte span it occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageRef {
    pub span: Range<usize>,
    pub url: String,
    pub quoting: Quoting,
}

pub(crate) fn find_img_tags(text: &str) -> Vec<ImageRef> {
    IMG_SRC_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let (m, quoting) = match (caps.get(1), caps.get(2), caps.get(3)) {
                (Some(m), _, _) => (m, Quoting::Double),
                (None, Some(m), _) => (m, Quoting::Single),
                (None, None, Some(m)) => (m, Quoting::Bare),
                (None, None, None) => return None,
            };
            Some(ImageRef {
                span: m.range(),
                url: unescape_attr(m.as_str()),
                quoting,
            })
        })
        .collect()
}

/// Sort by position and drop refs nested inside an earlier one.
pub(crate) fn drop_overlapping(refs: &mut Vec<ImageRef>) {
    refs.sort_by_key(|image| image.span.start);
    let mut end = 0;
    refs.retain(|image| {
        if image.span.start < end {
            return false;
        }
        end = image.span.end;
        true
    });
}

/// Rewrite `text`, substituting each ref found in `replacements`.
///
/// `refs` must be sorted by span start; a ref overlapping an earlier one is
/// skipped.
pub(crate) fn splice(
    text: &str,
    refs: &[ImageRef],
    replacements: &HashMap<String, String>,
) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut changed = false;
    for image in refs {
        if image.span.start < cursor {
            continue;
        }
        let Some(destination) = replacements.get(&image.url) else {
            continue;
        };
        out.push_str(&text[cursor..image.span.start]);
        match image.quoting {
            Quoting::Raw => out.push_str(destination),
            Quoting::Double => out.push_str(&escape_attr(destination, '"')),
            Quoting::Single => out.push_str(&escape_attr(destination, '\'')),
            Quoting::Bare => {
                out.push('"');
                out.push_str(&escape_attr(destination, '"'));
                out.push('"');
            }
        }
        cursor = image.span.end;
        changed = true;
    }
    if !changed {
        return None;
    }
    out.push_str(&text[cursor..]);
    Some(out)
}

fn unescape_attr(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn escape_attr(value: &str, quote: char) -> String {
    let escaped = value.replace('&', "&amp;");
    match quote {
        '"' => escaped.replace('"', "&quot;"),
        _ => escaped.replace('\'', "&#39;"),
    }
}

/// HTML fragment or page held as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlDocument {
    html: String,
}

impl HtmlDocument {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.html
    }

    pub fn into_string(self) -> String {
        self.html
    }
}

impl ImageDocument for HtmlDocument {
    fn extract_image_refs(&self) -> Vec<String> {
        find_img_tags(&self.html)
            .into_iter()
            .map(|image| image.url)
            .collect()
    }

    fn replace_image_refs(&mut self, replacements: &HashMap<String, String>) {
        let refs = find_img_tags(&self.html);
        if let Some(rewritten) = splice(&self.html, &refs, replacements) {
            self.html = rewritten;
        }
    }
}
