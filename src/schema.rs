//! Structural schema for the DocBook subset the manual supports.
//!
//! Every supported element has a [`Content`] model that says which children
//! it may hold and whether it may contain text. Validation walks a resolved
//! tree and reports the first violation with the element's origin.
//!
//! | Model | Children | Text |
//! |-------|----------|------|
//! | `Division` | titles, blocks, nested divisions | no |
//! | `Block` | blocks | no |
//! | `Para` | inlines and blocks | yes |
//! | `Inline` | inlines | yes |
//! | `Verbatim` | inlines | yes, kept as written |
//! | `Empty` | none | no |
//!
//! Lists, reference entries and the two roots have fixed child sets.

use crate::xml::{Element, Node};

/// Root element of the book document.
pub const BOOK_ROOT_ELEMENT: &str = "book";
/// Root element of the man-page reference document.
pub const MAN_ROOT_ELEMENT: &str = "reference";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content {
    Division,
    Block,
    Para,
    Inline,
    Verbatim,
    Empty,
    Fixed(&'static [&'static str]),
}

const DIVISIONS: &[&str] = &["preface", "chapter", "appendix", "section", "refsection"];

const BLOCKS: &[&str] = &[
    "para",
    "simpara",
    "programlisting",
    "screen",
    "literallayout",
    "variablelist",
    "itemizedlist",
    "orderedlist",
    "simplelist",
    "blockquote",
    "note",
    "warning",
    "important",
    "tip",
    "caution",
    "example",
    "informalexample",
];

const INLINES: &[&str] = &[
    "emphasis",
    "literal",
    "option",
    "filename",
    "command",
    "varname",
    "envar",
    "code",
    "replaceable",
    "userinput",
    "computeroutput",
    "prompt",
    "firstterm",
    "quote",
    "productname",
    "package",
    "citerefentry",
    "link",
    "xref",
];

pub fn content_model(name: &str) -> Option<Content> {
    let model = match name {
        "book" => Content::Fixed(&["title", "info", "preface", "chapter", "appendix"]),
        "reference" => Content::Fixed(&["title", "info", "partintro", "refentry"]),
        "info" => Content::Fixed(&["title", "subtitle", "author", "releaseinfo"]),
        "author" => Content::Fixed(&["personname"]),
        "partintro" => Content::Block,
        "refentry" => Content::Fixed(&["info", "refmeta", "refnamediv", "refsynopsisdiv", "refsection"]),
        "refmeta" => Content::Fixed(&["refentrytitle", "manvolnum", "refmiscinfo"]),
        "refnamediv" => Content::Fixed(&["refname", "refpurpose"]),
        "refsynopsisdiv" | "listitem" | "blockquote" | "note" | "warning" | "important"
        | "tip" | "caution" => Content::Block,
        "example" | "informalexample" => Content::Block,
        "preface" | "chapter" | "appendix" | "section" | "refsection" => Content::Division,
        "para" | "simpara" | "member" => Content::Para,
        "programlisting" | "screen" | "literallayout" => Content::Verbatim,
        "variablelist" => Content::Fixed(&["title", "varlistentry"]),
        "varlistentry" => Content::Fixed(&["term", "listitem"]),
        "itemizedlist" | "orderedlist" => Content::Fixed(&["title", "listitem"]),
        "simplelist" => Content::Fixed(&["member"]),
        "citerefentry" => Content::Fixed(&["refentrytitle", "manvolnum"]),
        "xref" => Content::Empty,
        "title" | "subtitle" | "term" | "refentrytitle" | "manvolnum" | "refmiscinfo"
        | "refname" | "refpurpose" | "personname" | "releaseinfo" => Content::Inline,
        n if INLINES.contains(&n) => Content::Inline,
        _ => return None,
    };
    Some(model)
}

/// A violation, positioned at the offending element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub file: String,
    pub line: usize,
    pub message: String,
}

impl Violation {
    fn at(element: &Element, message: String) -> Self {
        Self {
            file: element.origin.file.to_string(),
            line: element.origin.line,
            message,
        }
    }
}

/// Validate a resolved tree whose root must be `root_name`.
pub fn validate(root: &Element, root_name: &str) -> Result<(), Violation> {
    if root.name != root_name {
        return Err(Violation::at(
            root,
            format!("root element must be <{root_name}>, found <{}>", root.name),
        ));
    }
    validate_element(root)
}

fn validate_element(element: &Element) -> Result<(), Violation> {
    let model = content_model(&element.name)
        .ok_or_else(|| Violation::at(element, format!("unknown element <{}>", element.name)))?;

    check_attributes(element)?;

    let text_allowed = matches!(model, Content::Para | Content::Inline | Content::Verbatim);
    for node in &element.children {
        match node {
            Node::Text(text) if !text_allowed && !text.trim().is_empty() => {
                return Err(Violation::at(
                    element,
                    format!("text is not allowed directly inside <{}>", element.name),
                ));
            }
            Node::Text(_) => {}
            Node::Element(child) => {
                if !allows_child(model, &child.name) {
                    return Err(Violation::at(
                        child,
                        format!("<{}> is not allowed inside <{}>", child.name, element.name),
                    ));
                }
                validate_element(child)?;
            }
        }
    }

    check_required_children(element)
}

fn allows_child(model: Content, child: &str) -> bool {
    match model {
        Content::Division => {
            matches!(child, "title" | "info" | "subtitle")
                || DIVISIONS.contains(&child)
                || BLOCKS.contains(&child)
        }
        Content::Block => BLOCKS.contains(&child),
        Content::Para => INLINES.contains(&child) || BLOCKS.contains(&child),
        Content::Inline | Content::Verbatim => INLINES.contains(&child),
        Content::Empty => false,
        Content::Fixed(allowed) => allowed.contains(&child),
    }
}

fn check_attributes(element: &Element) -> Result<(), Violation> {
    match element.name.as_str() {
        "xref" if element.attr("linkend").is_none() => Err(Violation::at(
            element,
            "<xref> requires a linkend attribute".to_string(),
        )),
        "link" if element.attr("linkend").is_none() && element.attr("xlink:href").is_none() => {
            Err(Violation::at(
                element,
                "<link> requires a linkend or xlink:href attribute".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

fn check_required_children(element: &Element) -> Result<(), Violation> {
    let required: &[&str] = match element.name.as_str() {
        "varlistentry" => &["term", "listitem"],
        "refentry" => &["refmeta", "refnamediv"],
        "refmeta" => &["refentrytitle", "manvolnum"],
        "refnamediv" => &["refname"],
        "citerefentry" => &["refentrytitle"],
        _ => &[],
    };
    for name in required {
        if element.child(name).is_none() {
            return Err(Violation::at(
                element,
                format!("<{}> requires a <{name}> child", element.name),
            ));
        }
    }
    Ok(())
}
