//! Chunked HTML rendering of the book tree.
//!
//! Stage 5 of the manual pipeline, next to [`crate::man`]. Produces one page
//! per [`TocDescriptor`] entry plus `index.html` for everything else, and the
//! two static assets.
//!
//! ## Output
//!
//! ```text
//! share/doc/<pathName>/
//! ├── index.html        # book title, contents, unchunked content
//! ├── options.html      # one page per TOC entry
//! ├── style.css
//! └── highlight.js
//! ```
//!
//! A chunked section is rendered only on its own page; wherever it occurs
//! inside another page it is replaced by a link. `xref` and `link linkend`
//! resolve through the [`TargetDatabase`], so an unknown identifier fails the
//! render with a [`CrossReferenceError`].
//!
//! Uses [maud](https://maud.lambda.xyz/) for templating; text nodes are
//! escaped by maud.

use crate::targets::{CrossReferenceError, FALLBACK_FILE, TargetDatabase, TocDescriptor};
use crate::types::RenderedFile;
use crate::xml::{Element, Node};
use maud::{DOCTYPE, Markup, PreEscaped, html};

pub const STYLE_CSS: &str = include_str!("../static/style.css");
pub const HIGHLIGHT_JS: &str = include_str!("../static/highlight.js");

const DIVISIONS: &[&str] = &["preface", "chapter", "appendix", "section", "refsection", "partintro"];

const CODE_INLINES: &[&str] = &[
    "literal",
    "code",
    "option",
    "filename",
    "command",
    "varname",
    "envar",
    "userinput",
    "computeroutput",
    "prompt",
    "replaceable",
    "productname",
    "package",
];

const ADMONITIONS: &[&str] = &["note", "warning", "important", "tip", "caution"];

/// Render every page of the book plus the static assets.
pub fn render(
    book: &Element,
    db: &TargetDatabase,
    toc: &TocDescriptor,
) -> Result<Vec<RenderedFile>, CrossReferenceError> {
    let book_title = book.title().unwrap_or_else(|| "Manual".to_string());
    let mut files = Vec::with_capacity(toc.entries().len() + 3);

    let renderer = Renderer {
        db,
        toc,
        page_root: None,
    };
    let index = render_index(book, &book_title, &renderer)?;
    files.push(RenderedFile::new(FALLBACK_FILE, index.into_string()));

    for entry in toc.entries() {
        let Some(section) = find_by_id(book, &entry.section) else {
            continue;
        };
        let renderer = Renderer {
            page_root: Some(entry.section.as_str()),
            ..renderer
        };
        let page = render_chunk(section, &book_title, &renderer)?;
        files.push(RenderedFile::new(&entry.file, page.into_string()));
    }

    files.push(RenderedFile::new("style.css", STYLE_CSS));
    files.push(RenderedFile::new("highlight.js", HIGHLIGHT_JS));
    Ok(files)
}

fn find_by_id<'a>(root: &'a Element, id: &str) -> Option<&'a Element> {
    let mut found = None;
    root.walk(&mut |element| {
        if found.is_none() && element.id() == Some(id) {
            found = Some(element);
        }
    });
    found
}

// ============================================================================
// Pages
// ============================================================================

fn base_document(title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                link rel="stylesheet" href="style.css";
                script src="highlight.js" defer {}
            }
            body {
                (content)
            }
        }
    }
}

fn render_index(book: &Element, book_title: &str, renderer: &Renderer<'_>) -> Result<Markup, CrossReferenceError> {
    let contents = table_of_contents(book, renderer)?;
    let body = renderer.body(book, 2)?;
    Ok(base_document(
        book_title,
        html! {
            header.book-header {
                h1 { (book_title) }
            }
            (contents)
            main.book {
                (body)
            }
        },
    ))
}

fn render_chunk(section: &Element, book_title: &str, renderer: &Renderer<'_>) -> Result<Markup, CrossReferenceError> {
    let title = section.title().unwrap_or_else(|| book_title.to_string());
    let content = renderer.division(section, 1)?;
    Ok(base_document(
        &format!("{title} - {book_title}"),
        html! {
            nav.page-nav {
                a href=(FALLBACK_FILE) { (book_title) }
            }
            main.chunk {
                (content)
            }
        },
    ))
}

/// Top-level divisions of the book, linked through the target database.
fn table_of_contents(book: &Element, renderer: &Renderer<'_>) -> Result<Markup, CrossReferenceError> {
    let mut items = Vec::new();
    for division in book.elements().filter(|e| DIVISIONS.contains(&e.name.as_str())) {
        let title = division.title().unwrap_or_else(|| division.name.clone());
        let href = match division.id() {
            Some(id) => Some(renderer.db.resolve(id, division)?.href()),
            None => None,
        };
        items.push((title, href));
    }
    Ok(html! {
        nav.toc {
            h2 { "Table of Contents" }
            ul {
                @for (title, href) in &items {
                    li {
                        @match href {
                            Some(href) => a href=(href) { (title) },
                            None => (title),
                        }
                    }
                }
            }
        }
    })
}

// ============================================================================
// DocBook elements
// ============================================================================

#[derive(Clone, Copy)]
struct Renderer<'a> {
    db: &'a TargetDatabase,
    toc: &'a TocDescriptor,
    /// Identifier of the chunk this page holds; `None` for the index.
    page_root: Option<&'a str>,
}

impl Renderer<'_> {
    /// Children of `element` without its title and info.
    fn body(&self, element: &Element, depth: usize) -> Result<Markup, CrossReferenceError> {
        let mut out = String::new();
        for node in &element.children {
            match node {
                Node::Element(e) if matches!(e.name.as_str(), "title" | "info" | "subtitle") => {}
                Node::Element(e) => out.push_str(&self.element(e, depth)?.into_string()),
                Node::Text(t) => out.push_str(&html! { (t) }.into_string()),
            }
        }
        Ok(PreEscaped(out))
    }

    fn inline(&self, element: &Element) -> Result<Markup, CrossReferenceError> {
        self.body(element, 0)
    }

    fn is_foreign_chunk<'e>(&self, element: &'e Element) -> Option<&'e str> {
        let id = element.id()?;
        (self.toc.file_for(id).is_some() && self.page_root != Some(id)).then_some(id)
    }

    fn division(&self, element: &Element, depth: usize) -> Result<Markup, CrossReferenceError> {
        let heading = match element.child("title").or_else(|| element.child("info").and_then(|i| i.child("title"))) {
            Some(title) => Some(self.inline(title)?),
            None => None,
        };
        let body = self.body(element, depth + 1)?;
        let level = depth.clamp(1, 6);
        Ok(html! {
            section class=(element.name) id=[element.id()] {
                @if let Some(heading) = heading {
                    @match level {
                        1 => h1 { (heading) },
                        2 => h2 { (heading) },
                        3 => h3 { (heading) },
                        4 => h4 { (heading) },
                        5 => h5 { (heading) },
                        _ => h6 { (heading) },
                    }
                }
                (body)
            }
        })
    }

    fn element(&self, element: &Element, depth: usize) -> Result<Markup, CrossReferenceError> {
        if let Some(id) = self.is_foreign_chunk(element) {
            let target = self.db.resolve(id, element)?;
            return Ok(html! {
                p.chunk-link { a href=(target.href()) { (target.label()) } }
            });
        }

        let name = element.name.as_str();
        let id = element.id();
        let markup = match name {
            n if DIVISIONS.contains(&n) => self.division(element, depth)?,
            "para" | "simpara" => {
                let body = self.body(element, depth)?;
                html! { p id=[id] { (body) } }
            }
            "programlisting" | "screen" => {
                let language = element.attr("language").map(|l| format!("language-{l}"));
                let body = self.inline(element)?;
                html! { pre class="programlisting" id=[id] { code class=[language] { (body) } } }
            }
            "literallayout" => {
                let body = self.inline(element)?;
                html! { pre class="literallayout" id=[id] { (body) } }
            }
            "variablelist" => {
                let body = self.body(element, depth)?;
                html! { dl class="variablelist" id=[id] { (body) } }
            }
            "varlistentry" => {
                let mut out = String::new();
                for term in element.elements().filter(|e| e.name == "term") {
                    let body = self.inline(term)?;
                    out.push_str(&html! { dt id=[term.id().or(id)] { (body) } }.into_string());
                }
                if let Some(item) = element.child("listitem") {
                    let body = self.body(item, depth)?;
                    out.push_str(&html! { dd { (body) } }.into_string());
                }
                PreEscaped(out)
            }
            "itemizedlist" | "simplelist" => {
                let body = self.body(element, depth)?;
                html! { ul class=(name) id=[id] { (body) } }
            }
            "orderedlist" => {
                let body = self.body(element, depth)?;
                html! { ol id=[id] { (body) } }
            }
            "listitem" | "member" => {
                let body = self.body(element, depth)?;
                html! { li id=[id] { (body) } }
            }
            "blockquote" => {
                let body = self.body(element, depth)?;
                html! { blockquote id=[id] { (body) } }
            }
            n if ADMONITIONS.contains(&n) => {
                let body = self.body(element, depth)?;
                html! { div class={ "admonition " (n) } id=[id] { (body) } }
            }
            "example" | "informalexample" => {
                let body = self.body(element, depth)?;
                html! { div class="example" id=[id] { (body) } }
            }
            "emphasis" => {
                let body = self.inline(element)?;
                if element.attr("role") == Some("strong") {
                    html! { strong id=[id] { (body) } }
                } else {
                    html! { em id=[id] { (body) } }
                }
            }
            n if CODE_INLINES.contains(&n) => {
                let body = self.inline(element)?;
                html! { code class=(n) id=[id] { (body) } }
            }
            "firstterm" => {
                let body = self.inline(element)?;
                html! { em class="firstterm" id=[id] { (body) } }
            }
            "quote" => {
                let body = self.inline(element)?;
                html! { q id=[id] { (body) } }
            }
            "link" => self.link(element)?,
            "xref" => {
                let linkend = element.attr("linkend").unwrap_or_default();
                let target = self.db.resolve(linkend, element)?;
                html! { a class="xref" href=(target.href()) { (target.label()) } }
            }
            "citerefentry" => {
                let title = element.child("refentrytitle").map(Element::text).unwrap_or_default();
                let volume = element.child("manvolnum").map(Element::text).unwrap_or_default();
                html! { span.citerefentry { code { (title) } "(" (volume) ")" } }
            }
            _ => {
                let body = self.body(element, depth)?;
                html! { span class=(name) id=[id] { (body) } }
            }
        };
        Ok(markup)
    }

    fn link(&self, element: &Element) -> Result<Markup, CrossReferenceError> {
        let body = self.inline(element)?;
        let empty = element.children.is_empty();
        if let Some(linkend) = element.attr("linkend") {
            let target = self.db.resolve(linkend, element)?;
            return Ok(html! {
                a href=(target.href()) {
                    @if empty { (target.label()) } @else { (body) }
                }
            });
        }
        let href = element.attr("xlink:href").unwrap_or_default();
        Ok(html! {
            a href=(href) {
                @if empty { (href) } @else { (body) }
            }
        })
    }
}
