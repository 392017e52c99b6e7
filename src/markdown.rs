//! Markdown to DocBook conversion for option text tagged as Markdown.
//!
//! Option descriptions are normally DocBook already. Descriptions tagged
//! `{"_type": "mdDoc"}` and `literalMD` defaults/examples are written in a
//! small Markdown dialect instead, which this module converts with
//! [pulldown-cmark](https://docs.rs/pulldown-cmark).
//!
//! ## Supported constructs
//!
//! | Markdown | DocBook |
//! |----------|---------|
//! | paragraph | `<simpara>` |
//! | `` `code` `` | `<literal>` |
//! | fenced block | `<programlisting language="…">` |
//! | `[text](#id)` / `[](#id)` | `<link linkend>` / `<xref linkend>` |
//! | `[text](url)` | `<link xlink:href>` |
//! | `*em*` / `**strong**` | `<emphasis>` / `<emphasis role="strong">` |
//! | `- item` | `<itemizedlist>` |
//! | `> quote` | `<blockquote>` |
//! | `::: {.note}` … `:::` | `<note>` |
//!
//! Inline roles are written as a braced role name directly followed by a code
//! span: ``{command}`ls -l` ``, `{file}`, `{var}`, `{env}`, `{option}` and
//! ``{manpage}`nix.conf(5)` ``.
//!
//! Fenced admonition blocks take one of the classes `.note`, `.warning` or
//! `.important`:
//!
//! ```text
//! ::: {.warning}
//! Changing this option restarts the service.
//! :::
//! ```
//!
//! Ordered lists, headings, tables, images and raw HTML have no counterpart in
//! option descriptions and are rejected.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use quick_xml::escape::escape;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MarkdownError {
    #[error("unsupported markdown construct: {0}")]
    Unsupported(&'static str),
    #[error("raw HTML `{0}` is not supported")]
    Html(String),
    #[error("malformed manpage reference `{0}` (expected `name(section)`)")]
    ManpageReference(String),
    #[error("admonition class `{0}` is not supported")]
    Admonition(String),
}

/// Convert Markdown text to DocBook markup.
///
/// Trailing whitespace of the rendered markup is dropped.
pub fn to_docbook(text: &str) -> Result<String, MarkdownError> {
    let mut out = String::new();
    for block in split_admonitions(text) {
        let rendered = match block {
            Block::Markdown(markdown) => convert(markdown, Converter::default())?,
            Block::Admonition { class, body } => {
                let element = admonition_element(class)?;
                let inner = convert(body, Converter::bare())?;
                format!("<{element}><para>{inner}</para></{element}>")
            }
        };
        if rendered.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&rendered);
    }
    Ok(out)
}

fn convert(text: &str, mut converter: Converter) -> Result<String, MarkdownError> {
    for event in Parser::new_ext(text, Options::empty()) {
        converter.event(event)?;
    }
    converter.flush_text();
    Ok(converter.out.trim_end().to_string())
}

enum Block<'a> {
    Markdown(&'a str),
    Admonition { class: &'a str, body: &'a str },
}

/// Cut `::: {class}` … `:::` blocks out of `text`.
///
/// An opening fence without a closing one is left as ordinary text.
fn split_admonitions(text: &str) -> Vec<Block<'_>> {
    let mut blocks = Vec::new();
    let mut plain_start = 0;
    // Class, fence offset and body offset of the open block.
    let mut open: Option<(&str, usize, usize)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let content = line.trim_end_matches(['\n', '\r']);
        match open {
            None => {
                open = content
                    .strip_prefix("::: {")
                    .and_then(|rest| rest.strip_suffix('}'))
                    .filter(|_| line.ends_with('\n'))
                    .map(|class| (class, start, offset));
            }
            Some((class, fence, body)) if content == ":::" => {
                blocks.push(Block::Markdown(&text[plain_start..fence]));
                blocks.push(Block::Admonition {
                    class,
                    body: &text[body..start],
                });
                plain_start = offset;
                open = None;
            }
            Some(_) => {}
        }
    }
    blocks.push(Block::Markdown(&text[plain_start..]));
    blocks
}

fn admonition_element(class: &str) -> Result<&'static str, MarkdownError> {
    match class.trim() {
        ".warning" => Ok("warning"),
        ".important" => Ok("important"),
        ".note" => Ok("note"),
        other => Err(MarkdownError::Admonition(other.to_string())),
    }
}

/// Remove a single wrapping `<simpara>` element, if present.
///
/// Used where converted text is embedded in a context that disallows
/// `<simpara>` (literal default and example values).
pub fn unwrap_simpara(docbook: &str) -> &str {
    docbook
        .strip_prefix("<simpara>")
        .and_then(|s| s.strip_suffix("</simpara>"))
        .unwrap_or(docbook)
}

#[derive(Default)]
struct Converter {
    out: String,
    /// Text held back until we know whether it ends in a `{role}` prefix.
    pending: String,
    /// Open links: destination and the output length at their start.
    links: Vec<(String, usize)>,
    /// Open list items and block quotes, whose paragraphs share the
    /// enclosing `<para>`. Each records whether a paragraph was seen.
    bare_blocks: Vec<bool>,
    in_code_block: bool,
}

impl Converter {
    /// A converter whose top-level paragraphs are bare.
    fn bare() -> Self {
        Self {
            bare_blocks: vec![false],
            ..Self::default()
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), MarkdownError> {
        match event {
            Event::Text(text) => {
                if self.in_code_block {
                    self.out.push_str(&escape(&*text));
                } else {
                    self.pending.push_str(&text);
                }
                return Ok(());
            }
            Event::Code(code) => {
                self.code_span(&code)?;
                return Ok(());
            }
            _ => self.flush_text(),
        }

        match event {
            Event::Start(tag) => self.start(tag)?,
            Event::End(tag) => self.end(tag),
            Event::SoftBreak => self.out.push('\n'),
            Event::HardBreak => self.out.push_str("<literallayout>\n</literallayout>"),
            Event::Html(raw) | Event::InlineHtml(raw) => {
                return Err(MarkdownError::Html(raw.trim().to_string()));
            }
            Event::Rule => return Err(MarkdownError::Unsupported("horizontal rule")),
            Event::FootnoteReference(_) => return Err(MarkdownError::Unsupported("footnote")),
            Event::TaskListMarker(_) => return Err(MarkdownError::Unsupported("task list")),
            Event::InlineMath(_) | Event::DisplayMath(_) => {
                return Err(MarkdownError::Unsupported("math"));
            }
            _ => {}
        }
        Ok(())
    }

    fn start(&mut self, tag: Tag<'_>) -> Result<(), MarkdownError> {
        match tag {
            Tag::Paragraph => match self.bare_blocks.last_mut() {
                None => self.out.push_str("<simpara>"),
                Some(seen) => {
                    if *seen {
                        self.out.push_str("</para><para>");
                    }
                    *seen = true;
                }
            },
            Tag::CodeBlock(kind) => {
                self.in_code_block = true;
                match kind {
                    CodeBlockKind::Fenced(lang) if !lang.is_empty() => {
                        self.out.push_str(&format!(
                            "<programlisting language=\"{}\">\n",
                            escape(&*lang)
                        ));
                    }
                    _ => self.out.push_str("<programlisting>\n"),
                }
            }
            Tag::List(None) => self.out.push_str("<itemizedlist>\n"),
            Tag::List(Some(_)) => return Err(MarkdownError::Unsupported("ordered list")),
            Tag::Item => {
                self.bare_blocks.push(false);
                self.out.push_str("<listitem><para>");
            }
            Tag::BlockQuote(_) => {
                self.bare_blocks.push(false);
                self.out.push_str("<blockquote><para>");
            }
            // The HTML inside is rejected event by event.
            Tag::HtmlBlock => {}
            Tag::Emphasis => self.out.push_str("<emphasis>"),
            Tag::Strong => self.out.push_str("<emphasis role=\"strong\">"),
            Tag::Link { dest_url, .. } => {
                self.links.push((dest_url.to_string(), self.out.len()));
            }
            Tag::Heading { .. } => return Err(MarkdownError::Unsupported("heading")),
            Tag::Image { .. } => return Err(MarkdownError::Unsupported("image")),
            Tag::Table(_) | Tag::TableHead | Tag::TableRow | Tag::TableCell => {
                return Err(MarkdownError::Unsupported("table"));
            }
            _ => return Err(MarkdownError::Unsupported("extended syntax")),
        }
        Ok(())
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                if self.bare_blocks.is_empty() {
                    self.out.push_str("</simpara>\n");
                }
            }
            TagEnd::CodeBlock => {
                self.in_code_block = false;
                self.out.push_str("</programlisting>");
            }
            TagEnd::List(_) => self.out.push_str("\n</itemizedlist>"),
            TagEnd::Item => {
                self.bare_blocks.pop();
                self.out.push_str("</para></listitem>\n");
            }
            TagEnd::BlockQuote(_) => {
                self.bare_blocks.pop();
                let trimmed = self.out.trim_end().len();
                self.out.truncate(trimmed);
                self.out.push_str("</para></blockquote>");
            }
            TagEnd::Emphasis | TagEnd::Strong => self.out.push_str("</emphasis>"),
            TagEnd::Link => self.close_link(),
            _ => {}
        }
    }

    /// Wrap everything emitted since the link started in the right element.
    fn close_link(&mut self) {
        let Some((dest, start)) = self.links.pop() else {
            return;
        };
        let text = self.out.split_off(start);
        if let Some(id) = dest.strip_prefix('#') {
            if text.is_empty() {
                self.out
                    .push_str(&format!("<xref linkend=\"{}\"/>", escape(id)));
            } else {
                self.out
                    .push_str(&format!("<link linkend=\"{}\">{text}</link>", escape(id)));
            }
        } else if text.is_empty() || text == escape(dest.as_str()) {
            self.out
                .push_str(&format!("<link xlink:href=\"{}\"/>", escape(dest.as_str())));
        } else {
            self.out.push_str(&format!(
                "<link xlink:href=\"{}\">{text}</link>",
                escape(dest.as_str())
            ));
        }
    }

    fn code_span(&mut self, code: &str) -> Result<(), MarkdownError> {
        let role = split_role(&self.pending).map(|(prefix, role)| (prefix.len(), role.to_string()));
        let element = match role.as_ref().map(|(_, role)| role.as_str()) {
            Some("command") => Some(wrap("command", code)),
            Some("file") => Some(wrap("filename", code)),
            Some("var") => Some(wrap("varname", code)),
            Some("env") => Some(wrap("envar", code)),
            Some("option") => Some(wrap("option", code)),
            Some("manpage") => Some(manpage(code)?),
            _ => None,
        };
        match (element, role) {
            (Some(element), Some((prefix_len, _))) => {
                self.pending.truncate(prefix_len);
                self.flush_text();
                self.out.push_str(&element);
            }
            _ => {
                self.flush_text();
                self.out.push_str(&wrap("literal", code));
            }
        }
        Ok(())
    }

    fn flush_text(&mut self) {
        if !self.pending.is_empty() {
            self.out.push_str(&escape(self.pending.as_str()));
            self.pending.clear();
        }
    }
}

/// Split `"see {command}"` into `("see ", "command")`.
fn split_role(text: &str) -> Option<(&str, &str)> {
    let body = text.strip_suffix('}')?;
    let open = body.rfind('{')?;
    let role = &body[open + 1..];
    if role.is_empty() || !role.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((&text[..open], role))
}

fn wrap(element: &str, text: &str) -> String {
    format!("<{element}>{}</{element}>", escape(text))
}

fn manpage(reference: &str) -> Result<String, MarkdownError> {
    let malformed = || MarkdownError::ManpageReference(reference.to_string());
    let (page, rest) = reference.split_once('(').ok_or_else(malformed)?;
    let section = rest.strip_suffix(')').ok_or_else(malformed)?;
    if page.is_empty() || section.is_empty() {
        return Err(malformed());
    }
    Ok(format!(
        "<citerefentry><refentrytitle>{}</refentrytitle><manvolnum>{}</manvolnum></citerefentry>",
        escape(page),
        escape(section)
    ))
}
