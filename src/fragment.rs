//! DocBook fragment rendering.
//!
//! Stage 2 of the manual pipeline. Renders the normalized option list of one
//! module set into a self-contained DocBook document that the combiner later
//! overlays as `<id>.xml`.
//!
//! ## Shape
//!
//! ```xml
//! <appendix xml:id="module-opts">
//!   <title>Configuration Options</title>
//!   <variablelist>
//!     <varlistentry>
//!       <term xml:id="opt-services.foo.enable"><option>services.foo.enable</option></term>
//!       <listitem>
//!         <para>Enable foo.</para>
//!         <para><emphasis>Type:</emphasis> boolean</para>
//!         …
//!       </listitem>
//!     </varlistentry>
//!   </variablelist>
//! </appendix>
//! ```
//!
//! The root element follows the document type: `appendix` for books,
//! `section` for articles and `refsection` for man pages.
//!
//! Rendering is a pure function of its inputs. The same option list and
//! parameters always give byte-identical content, which the fragment cache
//! relies on.

use crate::types::{Declaration, OptionDoc, PackageRef};
use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};

/// Anchor prefix used when a module set does not configure one.
pub const DEFAULT_ID_PREFIX: &str = "opt";

/// Title of every options fragment.
pub const FRAGMENT_TITLE: &str = "Configuration Options";

pub const DOCBOOK_NS: &str = "http://docbook.org/ns/docbook";
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    #[default]
    Book,
    Article,
    Manpage,
}

impl DocumentType {
    /// Root element of a fragment rendered for this document type.
    pub fn root_element(self) -> &'static str {
        match self {
            DocumentType::Book => "appendix",
            DocumentType::Article => "section",
            DocumentType::Manpage => "refsection",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentType::Book => "book",
            DocumentType::Article => "article",
            DocumentType::Manpage => "manpage",
        })
    }
}

/// Everything besides the options that a fragment depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentParams<'a> {
    pub id: &'a str,
    pub id_prefix: Option<&'a str>,
    pub channel_name: &'a str,
    pub document_type: DocumentType,
}

impl FragmentParams<'_> {
    pub fn id_prefix(&self) -> &str {
        self.id_prefix.unwrap_or(DEFAULT_ID_PREFIX)
    }
}

/// A rendered fragment, ready to be overlaid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub id: String,
    pub id_prefix: String,
    pub document_type: DocumentType,
    pub content: String,
}

impl Fragment {
    /// Name under which the combiner overlays this fragment.
    pub fn file_name(&self) -> String {
        format!("{}.xml", self.id)
    }

    /// SHA-256 of the content, as lowercase hex.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Anchor of one option: `{prefix}-{dotted path}`, made a valid XML name.
pub fn option_anchor(prefix: &str, loc: &[String]) -> String {
    format!("{prefix}-{}", loc.join("."))
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn render(options: &[OptionDoc], params: &FragmentParams<'_>) -> Fragment {
    let root = params.document_type.root_element();
    let prefix = params.id_prefix();
    let mut out = String::with_capacity(256 + options.len() * 512);

    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        r#"<{root} xmlns="{DOCBOOK_NS}" xmlns:xlink="{XLINK_NS}" xml:id="{}">"#,
        escape(params.id)
    );
    let _ = writeln!(out, "  <title>{FRAGMENT_TITLE}</title>");
    let _ = writeln!(
        out,
        "  <para>Options provided by <literal>{}</literal>.</para>",
        escape(params.channel_name)
    );

    if !options.is_empty() {
        out.push_str("  <variablelist>\n");
        for option in options {
            render_option(&mut out, option, prefix);
        }
        out.push_str("  </variablelist>\n");
    }

    let _ = writeln!(out, "</{root}>");

    Fragment {
        id: params.id.to_string(),
        id_prefix: prefix.to_string(),
        document_type: params.document_type,
        content: out,
    }
}

fn render_option(out: &mut String, option: &OptionDoc, prefix: &str) {
    let name = escape(option.name()).into_owned();
    out.push_str("    <varlistentry>\n");
    let _ = writeln!(
        out,
        r#"      <term xml:id="{}"><option>{name}</option></term>"#,
        option_anchor(prefix, &option.loc)
    );
    out.push_str("      <listitem>\n");

    // Normalized descriptions are always block markup.
    if let Some(description) = &option.description {
        let _ = writeln!(out, "        {}", description.trim());
    }

    let _ = writeln!(
        out,
        "        <para><emphasis>Type:</emphasis> {}</para>",
        escape(option.option_type.as_str())
    );
    if let Some(default) = &option.default {
        let _ = writeln!(
            out,
            "        <para><emphasis>Default:</emphasis> {}</para>",
            render_value(default)
        );
    }
    if let Some(example) = &option.example {
        let _ = writeln!(
            out,
            "        <para><emphasis>Example:</emphasis> {}</para>",
            render_value(example)
        );
    }
    if let Some(packages) = option.related_packages.as_deref().filter(|p| !p.is_empty()) {
        render_related_packages(out, packages);
    }
    if !option.declarations.is_empty() {
        render_declarations(out, &option.declarations);
    }

    out.push_str("      </listitem>\n");
    out.push_str("    </varlistentry>\n");
}

/// Render a default or example value.
///
/// `literalExpression` text becomes a program listing, `literalDocBook` text
/// is embedded as markup, anything else is shown as JSON.
fn render_value(value: &Value) -> String {
    let tagged_text = |tag: &str| match value {
        Value::Object(map) if map.get("_type").and_then(Value::as_str) == Some(tag) => {
            map.get("text").and_then(Value::as_str)
        }
        _ => None,
    };

    if let Some(text) = tagged_text("literalExpression") {
        format!("<programlisting>{}</programlisting>", escape(text))
    } else if let Some(text) = tagged_text("literalDocBook") {
        text.to_string()
    } else {
        format!("<literal>{}</literal>", escape(value.to_string()))
    }
}

fn render_related_packages(out: &mut String, packages: &[PackageRef]) {
    out.push_str("        <para><emphasis>Related packages:</emphasis></para>\n");
    out.push_str("        <itemizedlist>\n");
    for package in packages {
        let _ = write!(
            out,
            "          <listitem><para><literal>{}</literal> (<literal>{}</literal>)",
            escape(package.attr_name.as_str()),
            escape(package.package_name.as_str())
        );
        if !package.available {
            out.push_str(" [unavailable]");
        }
        if let Some(description) = &package.description {
            let _ = write!(out, ": {}", escape(description.as_str()));
        }
        if let Some(comment) = &package.comment {
            let _ = write!(out, " {}", escape(comment.as_str()));
        }
        out.push_str("</para>");
        if let Some(long) = &package.long_description {
            let _ = write!(out, "<para>{}</para>", escape(long.as_str()));
        }
        out.push_str("</listitem>\n");
    }
    out.push_str("        </itemizedlist>\n");
}

fn render_declarations(out: &mut String, declarations: &[Declaration]) {
    out.push_str("        <para><emphasis>Declared by:</emphasis></para>\n");
    out.push_str("        <simplelist>\n");
    for declaration in declarations {
        let _ = writeln!(
            out,
            r#"          <member><link xlink:href="{}"><filename>{}</filename></link></member>"#,
            escape(declaration.url.as_str()),
            escape(declaration.channel_path.as_str())
        );
    }
    out.push_str("        </simplelist>\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use serde_json::json;

    fn params(id: &str) -> FragmentParams<'_> {
        FragmentParams {
            id,
            id_prefix: None,
            channel_name: "modules",
            document_type: DocumentType::Book,
        }
    }

    #[test]
    fn root_element_follows_document_type() {
        let options = vec![option_doc(&["a"], "int")];
        for (document_type, root) in [
            (DocumentType::Book, "<appendix "),
            (DocumentType::Article, "<section "),
            (DocumentType::Manpage, "<refsection "),
        ] {
            let fragment = render(
                &options,
                &FragmentParams {
                    document_type,
                    ..params("opts")
                },
            );
            assert!(fragment.content.contains(root), "{document_type}: {}", fragment.content);
            assert!(fragment.content.contains(r#"xml:id="opts""#));
        }
    }

    #[test]
    fn options_are_anchored_with_prefix() {
        let options = vec![option_doc(&["services", "foo", "enable"], "boolean")];
        let fragment = render(&options, &params("module-opts"));
        assert!(fragment.content.contains(
            r#"<term xml:id="opt-services.foo.enable"><option>services.foo.enable</option></term>"#
        ));
        assert_eq!(fragment.id_prefix, "opt");

        let custom = render(
            &options,
            &FragmentParams {
                id_prefix: Some("hm-opt"),
                ..params("module-opts")
            },
        );
        assert!(custom.content.contains(r#"xml:id="hm-opt-services.foo.enable""#));
    }

    #[test]
    fn anchors_are_sanitized() {
        let loc = vec!["users".to_string(), "<name>".to_string(), "home dir".to_string()];
        assert_eq!(option_anchor("opt", &loc), "opt-users._name_.home_dir");
    }

    #[test]
    fn rendering_is_deterministic() {
        let options = sample_options();
        let a = render(&options, &params("module-opts"));
        let b = render(&options, &params("module-opts"));
        assert_eq!(a.content, b.content);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn digest_changes_with_content() {
        let options = sample_options();
        let a = render(&options, &params("one"));
        let b = render(&options, &params("two"));
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn markup_description_is_embedded_as_is() {
        let mut option = option_doc(&["a"], "int");
        option.description = Some("<simpara>Already markup.</simpara>".to_string());
        let fragment = render(&[option], &params("x"));
        assert!(fragment.content.contains("        <simpara>Already markup.</simpara>\n"));
        assert!(!fragment.content.contains("<para><simpara>"));
    }

    #[test]
    fn description_starting_with_markup_validates() {
        let raw = raw_option_from_json(json!({
            "loc": ["services", "foo", "listen"],
            "type": "null or string",
            "description": "<literal>null</literal> disables the listener."
        }));
        let fixture = NormalizeFixture::new();
        let normalized = crate::normalize::normalize(vec![raw], &fixture.context()).unwrap();
        let fragment = render(&normalized.options, &params("module-opts"));
        assert!(fragment.content.contains(
            "        <para><literal>null</literal> disables the listener.</para>\n"
        ));

        let root = crate::xml::parse("module-opts.xml", &fragment.content).unwrap();
        crate::schema::validate(&root, "appendix").unwrap();
    }

    #[test]
    fn values_render_by_kind() {
        assert_eq!(render_value(&json!(false)), "<literal>false</literal>");
        assert_eq!(
            render_value(&json!("a<b")),
            "<literal>&quot;a&lt;b&quot;</literal>"
        );
        assert_eq!(
            render_value(&json!({ "_type": "literalExpression", "text": "pkgs.hello" })),
            "<programlisting>pkgs.hello</programlisting>"
        );
        assert_eq!(
            render_value(&json!({ "_type": "literalDocBook", "text": "<literal>x</literal>" })),
            "<literal>x</literal>"
        );
    }

    #[test]
    fn declarations_link_to_channel_paths() {
        let mut option = option_doc(&["a"], "int");
        option.declarations = vec![Declaration {
            path: "modules/a.nix".to_string(),
            url: "https://example.org/src/modules/a.nix".to_string(),
            channel_path: "<modules/modules/a.nix>".to_string(),
        }];
        let fragment = render(&[option], &params("x"));
        assert!(fragment.content.contains(
            r#"<link xlink:href="https://example.org/src/modules/a.nix"><filename>&lt;modules/modules/a.nix&gt;</filename></link>"#
        ));
    }

    #[test]
    fn related_packages_are_listed() {
        let mut option = option_doc(&["a"], "int");
        option.related_packages = Some(vec![PackageRef {
            attr_name: "hello".to_string(),
            package_name: "hello-2.10".to_string(),
            available: true,
            description: Some("A friendly program".to_string()),
            long_description: None,
            comment: None,
        }]);
        let fragment = render(&[option], &params("x"));
        assert!(fragment.content.contains(
            "<literal>hello</literal> (<literal>hello-2.10</literal>): A friendly program"
        ));
    }

    #[test]
    fn file_name_is_id() {
        let fragment = render(&[], &params("module-opts"));
        assert_eq!(fragment.file_name(), "module-opts.xml");
        assert!(!fragment.content.contains("variablelist"));
    }
}
