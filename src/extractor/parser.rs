//! Registry page parser.
//!
//! The result page is a list of blocks (`div.item`, `div.col.box`). A plain block
//! holds a label (`span.label_title` / `div.label_title`) and a value
//! (`span.label_text`). The economic activity block is titled by `div.box_title`
//! and holds a flat run of `span.label_title` elements: an unstyled span opens a
//! subtype (primary / secondary), each styled span after it is a
//! `code - description` entry of that subtype.

use super::normalize::{normalize_key, normalize_value, strip_accents};
use super::types::{ActivityEntry, EconomicActivity, ScrapedRecord};
use crate::error::ExtractorError;

use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Phrases (accent-stripped, lower-case) the registry uses when the tax id is unknown.
const NOT_FOUND_MARKERS: &[&str] = &[
    "nao existe contribuinte",
    "contribuinte nao cadastrado",
    "contribuinte nao encontrado",
    "cnpj nao cadastrado",
    "cnpj nao encontrado",
    "nenhum contribuinte encontrado",
    "nao consta cadastro",
];

static BLOCK: LazyLock<Selector> = LazyLock::new(|| selector("div.item, div.col.box"));
static BOX_TITLE: LazyLock<Selector> = LazyLock::new(|| selector("div.box_title"));
static LABEL: LazyLock<Selector> =
    LazyLock::new(|| selector("span.label_title, div.label_title"));
static LABEL_SPAN: LazyLock<Selector> = LazyLock::new(|| selector("span.label_title"));
static VALUE: LazyLock<Selector> = LazyLock::new(|| selector("span.label_text"));
/// Any element: html5ever drops a stray `<td>` outside a table, keeping only its text.
static NOTICE: LazyLock<Selector> = LazyLock::new(|| selector(".aviso"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ActivityKind {
    Primary,
    Secondary,
}

impl ActivityKind {
    fn from_header(text: &str) -> Option<Self> {
        let key = normalize_key(text);
        if key.contains("principal") {
            Some(ActivityKind::Primary)
        } else if key.contains("secundaria") {
            Some(ActivityKind::Secondary)
        } else {
            None
        }
    }
}

/// Parses a registry result page into a record.
///
/// `requested_tax_id` (punctuated form) is used when the page does not echo the
/// tax id itself, and for the minimal not-registered record.
pub fn parse_registry_page(
    html: &str,
    requested_tax_id: &str,
) -> Result<ScrapedRecord, ExtractorError> {
    let document = Html::parse_document(html);

    if contains_not_found_marker(&document) {
        tracing::debug!("Registry reports {} as not registered", requested_tax_id);
        return Ok(ScrapedRecord::not_registered(requested_tax_id));
    }

    let mut fields = BTreeMap::new();
    let mut activity = EconomicActivity::default();
    let mut recognized = 0usize;

    for block in document.select(&BLOCK) {
        if let Some(title) = block.select(&BOX_TITLE).next() {
            if normalize_key(&element_text(&title)).is_empty() {
                continue;
            }
            parse_activity_block(&block, &mut activity);
            recognized += 1;
            continue;
        }

        let (Some(label), Some(value)) = (block.select(&LABEL).next(), block.select(&VALUE).next())
        else {
            continue;
        };

        let key = normalize_key(&element_text(&label));
        if key.is_empty() {
            continue;
        }
        recognized += 1;

        let value = normalize_value(&element_text(&value));
        if !value.is_empty() {
            fields.insert(key, value);
        }
    }

    if recognized == 0 {
        if let Some(notice) = document.select(&NOTICE).next() {
            let message = normalize_value(&element_text(&notice));
            return Err(ExtractorError::RemoteRejection(message));
        }
        return Err(ExtractorError::Parse(
            "no label/value blocks found in registry response".to_string(),
        ));
    }

    tracing::trace!("Parsed {} registry blocks", recognized);
    Ok(ScrapedRecord::from_fields(requested_tax_id, fields, activity))
}

fn parse_activity_block(block: &ElementRef<'_>, activity: &mut EconomicActivity) {
    let mut cursor: Option<ActivityKind> = None;

    for span in block.select(&LABEL_SPAN) {
        let text = element_text(&span);
        if text.trim().is_empty() {
            continue;
        }

        let styled = span
            .value()
            .attr("style")
            .is_some_and(|style| !style.trim().is_empty());

        if !styled {
            cursor = ActivityKind::from_header(&text);
            if cursor.is_none() {
                tracing::debug!("Ignoring unknown activity subtype {:?}", text.trim());
            }
            continue;
        }

        let Some(kind) = cursor else {
            tracing::debug!("Activity entry outside any subtype: {:?}", text.trim());
            continue;
        };

        let entry = split_activity(&text);
        match kind {
            ActivityKind::Primary => activity.primary.push(entry),
            ActivityKind::Secondary => activity.secondary.push(entry),
        }
    }
}

/// Splits `"4623-1/09 - Description - more"` on the first `" - "`.
fn split_activity(text: &str) -> ActivityEntry {
    let normalized = normalize_value(text);
    match normalized.split_once(" - ") {
        Some((code, description)) => ActivityEntry {
            code: code.trim().to_string(),
            description: description.trim().to_string(),
        },
        None => ActivityEntry {
            code: normalized,
            description: String::new(),
        },
    }
}

fn contains_not_found_marker(document: &Html) -> bool {
    let text: String = document.root_element().text().collect::<Vec<_>>().join(" ");
    let haystack = strip_accents(&text).to_lowercase();
    let haystack = haystack.split_whitespace().collect::<Vec<_>>().join(" ");

    NOT_FOUND_MARKERS
        .iter()
        .any(|marker| haystack.contains(marker))
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>()
}
