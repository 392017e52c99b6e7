//! Shared test utilities for the optdoc test suite.
//!
//! Provides fixture setup, a ready-made normalization context and builders
//! for raw and normalized option records.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let fixture = NormalizeFixture::new();
//! let normalized = normalize(vec![typed(&["a", "enable"])], &fixture.context()).unwrap();
//!
//! let tmp = setup_fixtures();
//! let overlay = Overlay::load(&tmp.path().join("docs")).unwrap();
//! ```

use std::path::Path;
use tempfile::TempDir;

use crate::normalize::{NormalizeContext, RawOption, RootPrefixes, TemplateLinks};
use crate::packages::{PackageMeta, StaticRepository};
use crate::types::{Declaration, OptionDoc, PackageRef};
use crate::value::RawValue;
use serde_json::{Value, json};

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/` to a temp directory and return it.
///
/// Tests get an isolated copy they can mutate without affecting other tests
/// or the source fixtures.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

// =========================================================================
// Normalization context
// =========================================================================

/// Owns everything a [`NormalizeContext`] borrows.
///
/// - root prefix `/build/src/`
/// - URL template `https://example.org/src/{path}`
/// - channel template `<modules/{path}>`
/// - one package, `hello` → `hello-2.10`
pub struct NormalizeFixture {
    pub roots: RootPrefixes,
    pub links: TemplateLinks,
    pub packages: StaticRepository,
}

impl NormalizeFixture {
    pub fn new() -> Self {
        let mut packages = StaticRepository::new();
        packages.insert(
            "hello",
            PackageMeta {
                name: "hello-2.10".to_string(),
                available: true,
                description: Some("A friendly program".to_string()),
                long_description: None,
            },
        );
        Self {
            roots: RootPrefixes::new(["/build/src/"]).unwrap(),
            links: TemplateLinks::new("https://example.org/src/{path}", "<modules/{path}>"),
            packages,
        }
    }

    pub fn context(&self) -> NormalizeContext<'_> {
        NormalizeContext {
            roots: &self.roots,
            links: &self.links,
            packages: &self.packages,
        }
    }
}

// =========================================================================
// Raw options
// =========================================================================

/// Deserialize one raw option the way the evaluator export is read.
/// Panics on a malformed record.
pub fn raw_option_from_json(value: Value) -> RawOption {
    serde_json::from_value(value.clone())
        .unwrap_or_else(|e| panic!("invalid raw option {value}: {e}"))
}

/// A raw option with type `string` and nothing else.
pub fn typed(loc: &[&str]) -> RawOption {
    RawOption {
        option_type: Some(RawValue::from("string")),
        ..RawOption::new(loc)
    }
}

// =========================================================================
// Normalized options
// =========================================================================

/// A normalized option with only a path and a type.
pub fn option_doc(loc: &[&str], option_type: &str) -> OptionDoc {
    OptionDoc {
        loc: loc.iter().map(|s| s.to_string()).collect(),
        option_type: option_type.to_string(),
        default: None,
        example: None,
        description: None,
        declarations: Vec::new(),
        related_packages: None,
    }
}

/// A small normalized list exercising every field.
pub fn sample_options() -> Vec<OptionDoc> {
    let declaration = Declaration {
        path: "modules/programs/hello.nix".to_string(),
        url: "https://example.org/src/modules/programs/hello.nix".to_string(),
        channel_path: "<modules/modules/programs/hello.nix>".to_string(),
    };

    let mut enable = option_doc(&["programs", "hello", "enable"], "boolean");
    enable.default = Some(json!(false));
    enable.example = Some(json!(true));
    enable.description = Some("<para>Whether to enable <command>hello</command>.</para>".to_string());
    enable.declarations = vec![declaration.clone()];
    enable.related_packages = Some(vec![PackageRef {
        attr_name: "hello".to_string(),
        package_name: "hello-2.10".to_string(),
        available: true,
        description: Some("A friendly program".to_string()),
        long_description: None,
        comment: None,
    }]);

    let mut package = option_doc(&["programs", "hello", "package"], "package");
    package.default = Some(json!({ "_type": "literalExpression", "text": "pkgs.hello" }));
    package.description = Some("<para>The <package>hello</package> package to use.</para>".to_string());
    package.declarations = vec![declaration.clone()];

    let mut greeting = option_doc(&["programs", "hello", "greeting"], "string");
    greeting.default = Some(json!("Hello, world!"));
    greeting.description = Some("<simpara>Greeting to print.</simpara>".to_string());
    greeting.declarations = vec![declaration];

    vec![enable, package, greeting]
}
