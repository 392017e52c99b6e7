//! Man-page rendering of the reference tree.
//!
//! Stage 5 of the manual pipeline, next to [`crate::html`]. Every `refentry`
//! becomes one roff file at `man<vol>/<title>.<vol>`:
//!
//! ```text
//! .TH "tool.conf" "5" "" "Tool" "Tool Reference Pages"
//! .SH "NAME"
//! tool.conf \- configuration file
//! .SH "OPTIONS"
//! .TP
//! \fBservices.foo.enable\fR
//! Whether to enable foo.
//! ```
//!
//! References render as the target's title text, looked up in the same
//! [`TargetDatabase`] the HTML renderer uses; an unknown identifier is a
//! [`CrossReferenceError`].
//!
//! Text is escaped for roff: backslashes become `\e`, hyphens `\-`, and a
//! line starting with `.` or `'` gets a leading `\&`.

use crate::targets::{CrossReferenceError, TargetDatabase, man_page_path};
use crate::types::RenderedFile;
use crate::xml::{Element, Node};
use std::fmt::Write;

const VERBATIM: &[&str] = &["programlisting", "screen", "literallayout"];
const BOLD: &[&str] = &["option", "command", "literal", "code", "varname", "envar", "userinput", "package"];
const ITALIC: &[&str] = &["filename", "replaceable", "firstterm", "emphasis"];

/// Render every `refentry` of the reference tree.
pub fn render(
    reference: &Element,
    db: &TargetDatabase,
    source: &str,
) -> Result<Vec<RenderedFile>, CrossReferenceError> {
    let manual = reference.title().unwrap_or_default();
    let renderer = ManRenderer { db };
    let mut files = Vec::new();
    for entry in reference.elements().filter(|e| e.name == "refentry") {
        let Some(path) = man_page_path(entry) else {
            continue;
        };
        let page = renderer.page(entry, source, &manual)?;
        files.push(RenderedFile::new(path, page));
    }
    Ok(files)
}

/// Escape text for use inside a roff line.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\e"),
            '-' => out.push_str("\\-"),
            c => out.push(c),
        }
    }
    out
}

/// Protect a line that would otherwise be read as a request.
fn protect_line(line: &str) -> String {
    if line.starts_with('.') || line.starts_with('\'') {
        format!("\\&{line}")
    } else {
        line.to_string()
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", escape(text).replace('"', "\\(dq"))
}

struct ManRenderer<'a> {
    db: &'a TargetDatabase,
}

impl ManRenderer<'_> {
    fn page(&self, entry: &Element, source: &str, manual: &str) -> Result<String, CrossReferenceError> {
        let mut out = String::new();
        let (title, volume) = entry
            .child("refmeta")
            .map(|meta| {
                let text = |name: &str| meta.child(name).map(|e| e.text().trim().to_string()).unwrap_or_default();
                (text("refentrytitle"), text("manvolnum"))
            })
            .unwrap_or_default();
        let _ = writeln!(
            out,
            ".TH {} {} \"\" {} {}",
            quote(&title),
            quote(&volume),
            quote(source),
            quote(manual)
        );

        for child in entry.elements() {
            match child.name.as_str() {
                "refnamediv" => self.name_section(child, &mut out)?,
                "refsynopsisdiv" => {
                    out.push_str(".SH \"SYNOPSIS\"\n");
                    self.blocks(child, ".PP", &mut out)?;
                }
                "refsection" | "section" => self.section(child, ".SH", &mut out)?,
                _ => {}
            }
        }
        Ok(out)
    }

    fn name_section(&self, div: &Element, out: &mut String) -> Result<(), CrossReferenceError> {
        let names: Vec<String> = div
            .elements()
            .filter(|e| e.name == "refname")
            .map(|e| escape(e.text().trim()))
            .collect();
        out.push_str(".SH \"NAME\"\n");
        let mut line = names.join(", ");
        if let Some(purpose) = div.child("refpurpose") {
            let _ = write!(line, " \\- {}", self.inline(purpose)?);
        }
        out.push_str(&protect_line(&line));
        out.push('\n');
        Ok(())
    }

    fn section(&self, section: &Element, heading: &str, out: &mut String) -> Result<(), CrossReferenceError> {
        if let Some(title) = section.title() {
            let title = if heading == ".SH" { title.to_uppercase() } else { title };
            let _ = writeln!(out, "{heading} {}", quote(&title));
        }
        for child in section.elements() {
            match child.name.as_str() {
                "title" | "info" => {}
                "refsection" | "section" => self.section(child, ".SS", out)?,
                _ => self.block(child, ".PP", out)?,
            }
        }
        Ok(())
    }

    fn blocks(&self, parent: &Element, para: &str, out: &mut String) -> Result<(), CrossReferenceError> {
        for child in parent.elements() {
            if !matches!(child.name.as_str(), "title" | "info") {
                self.block(child, para, out)?;
            }
        }
        Ok(())
    }

    /// Render one block element. `para` is the macro that starts a paragraph.
    fn block(&self, element: &Element, para: &str, out: &mut String) -> Result<(), CrossReferenceError> {
        match element.name.as_str() {
            "para" | "simpara" => self.paragraph(element, para, out)?,
            n if VERBATIM.contains(&n) => verbatim(element, out),
            "variablelist" => {
                for entry in element.elements().filter(|e| e.name == "varlistentry") {
                    out.push_str(".TP\n");
                    let terms = entry
                        .elements()
                        .filter(|e| e.name == "term")
                        .map(|t| self.inline(t))
                        .collect::<Result<Vec<_>, _>>()?;
                    out.push_str(&protect_line(&terms.join(", ")));
                    out.push('\n');
                    if let Some(item) = entry.child("listitem") {
                        self.item_body(item, out)?;
                    }
                }
            }
            "itemizedlist" | "orderedlist" => {
                let ordered = element.name == "orderedlist";
                for (i, item) in element.elements().filter(|e| e.name == "listitem").enumerate() {
                    if ordered {
                        let _ = writeln!(out, ".IP \"{}.\" 4", i + 1);
                    } else {
                        out.push_str(".IP \\(bu 2\n");
                    }
                    self.item_body(item, out)?;
                }
            }
            "simplelist" => {
                let _ = writeln!(out, "{para}");
                for (i, member) in element.elements().filter(|e| e.name == "member").enumerate() {
                    if i > 0 {
                        out.push_str(".br\n");
                    }
                    out.push_str(&protect_line(&self.inline(member)?));
                    out.push('\n');
                }
            }
            "blockquote" | "example" | "informalexample" => {
                out.push_str(".RS 4\n");
                self.blocks(element, ".PP", out)?;
                out.push_str(".RE\n");
            }
            name @ ("note" | "warning" | "important" | "tip" | "caution") => {
                out.push_str(".RS 4\n");
                let mut label = name.to_string();
                label[..1].make_ascii_uppercase();
                let _ = writeln!(out, "{para}\n\\fB{label}\\fR");
                self.blocks(element, ".PP", out)?;
                out.push_str(".RE\n");
            }
            "section" | "refsection" => self.section(element, ".SS", out)?,
            _ => {
                let text = self.inline(element)?;
                if !text.is_empty() {
                    let _ = writeln!(out, "{para}\n{}", protect_line(&text));
                }
            }
        }
        Ok(())
    }

    /// Body of a list item: the first paragraph continues the item line,
    /// later blocks keep the item indent.
    fn item_body(&self, item: &Element, out: &mut String) -> Result<(), CrossReferenceError> {
        for (i, child) in item.elements().enumerate() {
            if i == 0 && matches!(child.name.as_str(), "para" | "simpara") {
                self.paragraph(child, "", out)?;
            } else {
                self.block(child, ".IP \"\" 4", out)?;
            }
        }
        Ok(())
    }

    /// A paragraph may hold block elements; they split it into several runs.
    fn paragraph(&self, element: &Element, para: &str, out: &mut String) -> Result<(), CrossReferenceError> {
        let mut run = String::new();
        let mut first = true;
        let flush = |run: &mut String, out: &mut String, first: &mut bool| {
            let line = collapse(run);
            run.clear();
            if line.is_empty() {
                return;
            }
            let macro_ = if *first { para } else { ".IP \"\" 4" };
            if !macro_.is_empty() {
                out.push_str(macro_);
                out.push('\n');
            }
            out.push_str(&protect_line(&line));
            out.push('\n');
            *first = false;
        };

        for node in &element.children {
            match node {
                Node::Text(text) => run.push_str(&escape(text)),
                Node::Element(child) if is_block(&child.name) => {
                    flush(&mut run, out, &mut first);
                    self.block(child, ".IP \"\" 4", out)?;
                    first = false;
                }
                Node::Element(child) => run.push_str(&self.inline_element(child)?),
            }
        }
        flush(&mut run, out, &mut first);
        Ok(())
    }

    /// Inline content of `element` on one line, whitespace collapsed.
    fn inline(&self, element: &Element) -> Result<String, CrossReferenceError> {
        let mut run = String::new();
        for node in &element.children {
            match node {
                Node::Text(text) => run.push_str(&escape(text)),
                Node::Element(child) => run.push_str(&self.inline_element(child)?),
            }
        }
        Ok(collapse(&run))
    }

    fn inline_element(&self, element: &Element) -> Result<String, CrossReferenceError> {
        let name = element.name.as_str();
        let text = match name {
            "xref" => {
                let linkend = element.attr("linkend").unwrap_or_default();
                escape(self.db.resolve(linkend, element)?.label())
            }
            "link" => {
                let body = self.inline(element)?;
                if let Some(linkend) = element.attr("linkend") {
                    let target = self.db.resolve(linkend, element)?;
                    if body.is_empty() { escape(target.label()) } else { body }
                } else {
                    let href = escape(element.attr("xlink:href").unwrap_or_default());
                    if body.is_empty() || body == href {
                        href
                    } else {
                        format!("{body} \\%<{href}>")
                    }
                }
            }
            "citerefentry" => {
                let title = element.child("refentrytitle").map(Element::text).unwrap_or_default();
                let volume = element.child("manvolnum").map(Element::text).unwrap_or_default();
                format!("\\fB{}\\fR({})", escape(title.trim()), escape(volume.trim()))
            }
            "emphasis" if element.attr("role") == Some("strong") => {
                format!("\\fB{}\\fR", self.inline(element)?)
            }
            n if BOLD.contains(&n) => format!("\\fB{}\\fR", self.inline(element)?),
            n if ITALIC.contains(&n) => format!("\\fI{}\\fR", self.inline(element)?),
            "quote" => format!("\\(lq{}\\(rq", self.inline(element)?),
            _ => self.inline(element)?,
        };
        Ok(text)
    }
}

fn is_block(name: &str) -> bool {
    VERBATIM.contains(&name)
        || matches!(
            name,
            "para"
                | "simpara"
                | "variablelist"
                | "itemizedlist"
                | "orderedlist"
                | "simplelist"
                | "blockquote"
                | "note"
                | "warning"
                | "important"
                | "tip"
                | "caution"
                | "example"
                | "informalexample"
        )
}

fn verbatim(element: &Element, out: &mut String) {
    out.push_str(".sp\n.RS 4\n.nf\n");
    let text = element.text();
    let text = text.strip_prefix('\n').unwrap_or(&text);
    for line in text.trim_end().lines() {
        out.push_str(&protect_line(&escape(line)));
        out.push('\n');
    }
    out.push_str(".fi\n.RE\n");
}

/// Collapse whitespace runs, keeping a single space between words.
fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
