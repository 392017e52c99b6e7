//! Cross-reference target collection.
//!
//! Stage 4 of the manual pipeline. Walks the validated book and man-page
//! trees once and records where every `xml:id` will end up in the rendered
//! output. The resulting [`TargetDatabase`] is immutable; both renderers
//! resolve `xref` and `link linkend` through the same snapshot.
//!
//! ## Book placement
//!
//! The [`TocDescriptor`] names the sections that get a page of their own.
//! Every identifier lands on the page of its nearest enclosing named section,
//! or on [`FALLBACK_FILE`] when there is none:
//!
//! ```text
//! book                         index.html
//! ├── chapter#ch-intro         index.html#ch-intro
//! └── appendix#ch-options      options.html#ch-options   (named in the TOC)
//!     └── term#opt-a.enable    options.html#opt-a.enable
//! ```
//!
//! ## Man placement
//!
//! Identifiers inside a `refentry` point at that entry's page,
//! `man<vol>/<title>.<vol>`. Where the same identifier occurs in both trees
//! the book target is kept.
//!
//! HTML pages are installed under `share/doc/<name>/` and man pages under
//! `share/man/`, so an HTML link to a man page climbs two directories and
//! carries no fragment.

use crate::xml::Element;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

/// Page for everything the TOC does not name.
pub const FALLBACK_FILE: &str = "index.html";

/// The man tree, seen from the HTML output directory.
pub const MAN_TREE_FROM_HTML: &str = "../../man/";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{referenced_from}: reference to unknown identifier `{identifier}`")]
pub struct CrossReferenceError {
    pub identifier: String,
    /// `file:line` of the referencing element.
    pub referenced_from: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("table of contents names section `{0}`, which the manual does not contain")]
    MissingSection(String),
    #[error("refentry at {0} has no refentrytitle or manvolnum")]
    UnnamedManPage(String),
}

/// One chunked page: the section it holds and its output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TocEntry {
    pub section: String,
    pub file: String,
}

/// Ordered mapping from section identifier to output file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TocDescriptor {
    entries: Vec<TocEntry>,
}

impl TocDescriptor {
    pub fn new(entries: Vec<TocEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[TocEntry] {
        &self.entries
    }

    pub fn file_for(&self, section: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.section == section)
            .map(|e| e.file.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Book,
    Preface,
    Chapter,
    Appendix,
    Section,
    /// An option term inside a fragment's variable list.
    Option,
    ManPage,
    Other,
}

impl TargetKind {
    fn of(element: &Element) -> Self {
        match element.name.as_str() {
            "book" => TargetKind::Book,
            "preface" => TargetKind::Preface,
            "chapter" => TargetKind::Chapter,
            "appendix" => TargetKind::Appendix,
            "section" | "refsection" => TargetKind::Section,
            "term" | "varlistentry" => TargetKind::Option,
            "refentry" => TargetKind::ManPage,
            _ => TargetKind::Other,
        }
    }
}

/// Which output tree a target is rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputTree {
    Html,
    Man,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    /// Output file, relative to the root of its tree.
    pub file: String,
    pub anchor: String,
    pub kind: TargetKind,
    pub tree: OutputTree,
    /// Text shown when a reference has no text of its own.
    pub title: Option<String>,
}

impl Target {
    /// Link from an HTML page: `file#anchor` for book targets, the man page
    /// file under [`MAN_TREE_FROM_HTML`] for man targets.
    pub fn href(&self) -> String {
        match self.tree {
            OutputTree::Html => format!("{}#{}", self.file, self.anchor),
            OutputTree::Man => format!("{MAN_TREE_FROM_HTML}{}", self.file),
        }
    }

    /// Title, or the bare identifier when the target has none.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.anchor)
    }
}

/// Immutable identifier → target map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetDatabase {
    targets: BTreeMap<String, Target>,
}

impl TargetDatabase {
    pub fn get(&self, id: &str) -> Option<&Target> {
        self.targets.get(id)
    }

    /// Resolve a reference made at `referenced_from`.
    pub fn resolve(&self, id: &str, referenced_from: &Element) -> Result<&Target, CrossReferenceError> {
        self.targets.get(id).ok_or_else(|| CrossReferenceError {
            identifier: id.to_string(),
            referenced_from: referenced_from.origin.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Build the target database from the book and man-page trees.
pub fn collect(book: &Element, man: &Element, toc: &TocDescriptor) -> Result<TargetDatabase, TargetError> {
    let mut targets = BTreeMap::new();
    collect_book(book, FALLBACK_FILE, toc, &mut targets);

    let placed: BTreeSet<&str> = targets.values().map(|t: &Target| t.anchor.as_str()).collect();
    if let Some(missing) = toc
        .entries()
        .iter()
        .find(|e| !placed.contains(e.section.as_str()))
    {
        return Err(TargetError::MissingSection(missing.section.clone()));
    }

    collect_man(man, &mut targets)?;
    debug!(targets = targets.len(), "collected cross-reference targets");
    Ok(TargetDatabase { targets })
}

fn collect_book(element: &Element, file: &str, toc: &TocDescriptor, targets: &mut BTreeMap<String, Target>) {
    let file = element.id().and_then(|id| toc.file_for(id)).unwrap_or(file);
    if let Some(id) = element.id() {
        targets.insert(id.to_string(), target(element, id, file, OutputTree::Html));
    }
    for child in element.elements() {
        collect_book(child, file, toc, targets);
    }
}

fn collect_man(man: &Element, targets: &mut BTreeMap<String, Target>) -> Result<(), TargetError> {
    for entry in man.elements().filter(|e| e.name == "refentry") {
        let file = man_page_path(entry).ok_or_else(|| TargetError::UnnamedManPage(entry.origin.to_string()))?;
        let mut pending = Vec::new();
        entry.walk(&mut |element| {
            if let Some(id) = element.id() {
                pending.push((id, element));
            }
        });
        for (id, element) in pending {
            targets
                .entry(id.to_string())
                .or_insert_with(|| target(element, id, &file, OutputTree::Man));
        }
    }
    Ok(())
}

fn target(element: &Element, id: &str, file: &str, tree: OutputTree) -> Target {
    Target {
        file: file.to_string(),
        anchor: id.to_string(),
        kind: TargetKind::of(element),
        tree,
        title: target_title(element),
    }
}

fn target_title(element: &Element) -> Option<String> {
    match element.name.as_str() {
        "term" => Some(crate::xml::collapse_whitespace(&element.text())),
        "refentry" => {
            let meta = element.child("refmeta")?;
            let title = meta.child("refentrytitle")?.text();
            let volume = meta.child("manvolnum")?.text();
            Some(format!("{}({})", title.trim(), volume.trim()))
        }
        _ => element.title(),
    }
}

/// `man<vol>/<title>.<vol>` for a `refentry`.
pub fn man_page_path(entry: &Element) -> Option<String> {
    let meta = entry.child("refmeta")?;
    let title = meta.child("refentrytitle")?.text();
    let volume = meta.child("manvolnum")?.text();
    let (title, volume) = (title.trim(), volume.trim());
    if title.is_empty() || volume.is_empty() {
        return None;
    }
    Some(format!("man{volume}/{title}.{volume}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse;

    const BOOK: &str = r#"<book xml:id="book">
  <title>Manual</title>
  <chapter xml:id="ch-intro">
    <title>Introduction</title>
    <section xml:id="sec-start"><title>Getting   started</title></section>
  </chapter>
  <appendix xml:id="ch-options">
    <title>Configuration Options</title>
    <variablelist>
      <varlistentry>
        <term xml:id="opt-a.enable"><option>a.enable</option></term>
        <listitem><para>x</para></listitem>
      </varlistentry>
    </variablelist>
  </appendix>
</book>"#;

    const MAN: &str = r#"<reference>
  <refentry xml:id="conf-5">
    <refmeta><refentrytitle>tool.conf</refentrytitle><manvolnum>5</manvolnum></refmeta>
    <refnamediv><refname>tool.conf</refname></refnamediv>
    <refsection xml:id="conf-options"><title>Options</title></refsection>
  </refentry>
</reference>"#;

    fn toc() -> TocDescriptor {
        TocDescriptor::new(vec![TocEntry {
            section: "ch-options".to_string(),
            file: "options.html".to_string(),
        }])
    }

    fn database() -> TargetDatabase {
        collect(&parse("manual.xml", BOOK).unwrap(), &parse("manpages.xml", MAN).unwrap(), &toc()).unwrap()
    }

    #[test]
    fn unnamed_sections_fall_back_to_index() {
        let db = database();
        let intro = db.get("ch-intro").unwrap();
        assert_eq!(intro.file, "index.html");
        assert_eq!(intro.kind, TargetKind::Chapter);
        assert_eq!(intro.title.as_deref(), Some("Introduction"));
        assert_eq!(db.get("sec-start").unwrap().title.as_deref(), Some("Getting started"));
        assert_eq!(db.get("book").unwrap().file, "index.html");
    }

    #[test]
    fn toc_sections_and_their_descendants_get_their_page() {
        let db = database();
        assert_eq!(db.get("ch-options").unwrap().href(), "options.html#ch-options");
        let option = db.get("opt-a.enable").unwrap();
        assert_eq!(option.file, "options.html");
        assert_eq!(option.kind, TargetKind::Option);
        assert_eq!(option.label(), "a.enable");
    }

    #[test]
    fn man_identifiers_point_at_their_page() {
        let db = database();
        let entry = db.get("conf-5").unwrap();
        assert_eq!(entry.file, "man5/tool.conf.5");
        assert_eq!(entry.kind, TargetKind::ManPage);
        assert_eq!(entry.label(), "tool.conf(5)");
        assert_eq!(db.get("conf-options").unwrap().file, "man5/tool.conf.5");
        assert_eq!(db.len(), 7);
    }

    #[test]
    fn man_targets_link_into_the_man_tree() {
        let db = database();
        let entry = db.get("conf-5").unwrap();
        assert_eq!(entry.tree, OutputTree::Man);
        assert_eq!(entry.href(), "../../man/man5/tool.conf.5");
        assert_eq!(db.get("conf-options").unwrap().href(), "../../man/man5/tool.conf.5");
        assert_eq!(db.get("ch-intro").unwrap().tree, OutputTree::Html);
    }

    #[test]
    fn missing_toc_section_is_an_error() {
        let toc = TocDescriptor::new(vec![TocEntry {
            section: "ch-nope".to_string(),
            file: "nope.html".to_string(),
        }]);
        let err = collect(&parse("manual.xml", BOOK).unwrap(), &parse("manpages.xml", MAN).unwrap(), &toc)
            .unwrap_err();
        assert_eq!(err, TargetError::MissingSection("ch-nope".to_string()));
    }

    #[test]
    fn unknown_reference_names_its_origin() {
        let db = database();
        let referrer = parse("manual.xml", "<book>\n<xref linkend=\"nope\"/></book>").unwrap();
        let xref = referrer.child("xref").unwrap();
        let err = db.resolve("nope", xref).unwrap_err();
        assert_eq!(
            err,
            CrossReferenceError {
                identifier: "nope".to_string(),
                referenced_from: "manual.xml:2".to_string(),
            }
        );
    }
}
