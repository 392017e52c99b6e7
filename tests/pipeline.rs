//! End-to-end tests of the manual pipeline on the `fixtures/` project.

use optdoc::combine::CombineError;
use optdoc::config::ModuleSetConfig;
use optdoc::normalize::NormalizeError;
use optdoc::pipeline::{BuildError, Project, RenderError, run_build, run_check, run_export};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn setup_project() -> (TempDir, Project) {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures");
    copy_dir(&fixtures, tmp.path());
    let project = Project::load(&tmp.path().join("optdoc.toml")).unwrap();
    (tmp, project)
}

fn copy_dir(src: &Path, dst: &Path) {
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.unwrap();
        let target = dst.join(entry.path().strip_prefix(src).unwrap());
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).unwrap();
        } else {
            fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// Replace the fixture option list with `options`.
fn write_options(tmp: &TempDir, options: Value) {
    fs::write(tmp.path().join("options.json"), options.to_string()).unwrap();
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn build_writes_html_man_pages_and_json() {
    let (tmp, project) = setup_project();
    let output = tmp.path().join("result");
    let work = tmp.path().join(".optdoc");

    let summary = run_build(&project, &output, &work, true).unwrap();
    assert_eq!(summary.sets.len(), 1);
    assert_eq!(summary.sets[0].options, 3);
    assert_eq!(summary.sets[0].dropped, 1);

    let doc = output.join("share/doc/tool");
    for file in ["index.html", "options.html", "style.css", "highlight.js"] {
        assert!(doc.join(file).is_file(), "missing {file}");
    }
    let man_page = output.join("share/man/man5/tool.conf.5");
    assert!(man_page.is_file());

    let index = fs::read_to_string(doc.join("index.html")).unwrap();
    assert!(index.contains("Tool Manual"));
    assert!(index.contains(r#"href="options.html#opt-programs.hello.enable""#));
    assert!(index.contains(r#"href="options.html#module-opts""#));

    let options = fs::read_to_string(doc.join("options.html")).unwrap();
    assert!(options.contains("programs.hello.enable"));
    assert!(options.contains("hello-2.10"));
    assert!(options.contains(r#"href="index.html#ch-intro""#));

    let page = fs::read_to_string(man_page).unwrap();
    assert!(page.starts_with(".TH \"tool.conf\" \"5\""));
    assert!(page.contains("Configuration Options"));
    assert!(page.contains("\\fBprograms.hello.enable\\fR"));
}

#[test]
fn canonical_json_matches_the_normalized_options() {
    let (tmp, project) = setup_project();
    let output = tmp.path().join("result");
    run_export(&project, &output).unwrap();

    let exported = read_json(&output.join("share/doc/tool/options/module-opts.json"));
    let keys: Vec<&str> = exported.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec!["programs.hello.enable", "programs.hello.greeting", "programs.hello.package"]
    );

    // Function values are replaced by a marker.
    assert_eq!(exported["programs.hello.greeting"]["example"], json!("<function>"));
    assert_eq!(
        exported["programs.hello.package"]["description"],
        json!("<simpara>The <command>hello</command> package to use.</simpara>")
    );
    assert!(exported["programs.hello.enable"].get("visible").is_none());
}

#[test]
fn declarations_are_stripped_and_linked() {
    let (tmp, project) = setup_project();
    write_options(
        &tmp,
        json!([{
            "loc": ["services", "foo", "enable"],
            "type": "boolean",
            "default": false,
            "description": "Enable foo.",
            "declarations": ["/build/src/modules/services/foo.nix"],
            "visible": true,
            "internal": false
        }]),
    );
    let output = tmp.path().join("result");
    run_export(&project, &output).unwrap();

    let exported = read_json(&output.join("share/doc/tool/options/module-opts.json"));
    assert_eq!(
        exported["services.foo.enable"],
        json!({
            "type": "boolean",
            "default": false,
            "description": "<para>Enable foo.</para>",
            "declarations": [{
                "path": "modules/services/foo.nix",
                "url": "https://example.org/src/modules/services/foo.nix",
                "channelPath": "<modules/modules/services/foo.nix>"
            }]
        })
    );
}

#[test]
fn enable_and_package_sort_first() {
    let (tmp, project) = setup_project();
    write_options(
        &tmp,
        json!([
            { "loc": ["services", "foo", "extraConfig"], "type": "lines" },
            { "loc": ["services", "foo", "enable"], "type": "boolean" },
            { "loc": ["services", "foo", "package"], "type": "package" }
        ]),
    );
    let sets = optdoc::pipeline::export_module_sets(&project).unwrap();
    let names: Vec<String> = sets[0].options.iter().map(|o| o.name()).collect();
    assert_eq!(
        names,
        vec!["services.foo.enable", "services.foo.package", "services.foo.extraConfig"]
    );
}

#[test]
fn related_packages_are_resolved_from_the_repository() {
    let (tmp, project) = setup_project();
    let output = tmp.path().join("result");
    run_export(&project, &output).unwrap();

    let exported = read_json(&output.join("share/doc/tool/options/module-opts.json"));
    assert_eq!(
        exported["programs.hello.enable"]["relatedPackages"],
        json!([{
            "attrName": "hello",
            "packageName": "hello-2.10",
            "available": true,
            "description": "A friendly program"
        }])
    );
}

#[test]
fn unresolvable_package_fails_the_build() {
    let (tmp, project) = setup_project();
    write_options(
        &tmp,
        json!([{
            "loc": ["programs", "py", "enable"],
            "type": "boolean",
            "relatedPackages": [["python3Packages", "doesnotexist"]]
        }]),
    );
    let output = tmp.path().join("result");
    let err = run_build(&project, &output, &tmp.path().join(".optdoc"), true).unwrap_err();
    match err {
        BuildError::Normalize {
            set,
            source: NormalizeError::Package { source, .. },
        } => {
            assert_eq!(set, "core");
            assert_eq!(source.path, vec!["python3Packages", "doesnotexist"]);
        }
        other => panic!("expected package resolution error, got {other:?}"),
    }
    assert!(!output.exists());
}

#[test]
fn duplicate_fragment_ids_conflict_without_output() {
    let (tmp, mut project) = setup_project();
    project.config.module_sets.push(ModuleSetConfig {
        name: "extra".to_string(),
        ..project.config.module_sets[0].clone()
    });
    let output = tmp.path().join("result");
    let err = run_build(&project, &output, &tmp.path().join(".optdoc"), true).unwrap_err();
    match err {
        BuildError::Combine(CombineError::Conflict(conflict)) => {
            assert_eq!(conflict.id, "module-opts");
            assert!(conflict.first.contains("`core`"));
            assert!(conflict.second.contains("`extra`"));
        }
        other => panic!("expected identifier conflict, got {other:?}"),
    }
    assert!(!output.exists());
}

#[test]
fn dangling_reference_fails_without_output() {
    let (tmp, project) = setup_project();
    let intro = tmp.path().join("docs/chapters/intro.xml");
    let text = fs::read_to_string(&intro)
        .unwrap()
        .replace(r#"<xref linkend="module-opts"/>"#, r#"<xref linkend="ch-missing"/>"#);
    fs::write(&intro, text).unwrap();

    let output = tmp.path().join("result");
    let err = run_build(&project, &output, &tmp.path().join(".optdoc"), true).unwrap_err();
    match err {
        BuildError::Render(RenderError::CrossReference(err)) => {
            assert_eq!(err.identifier, "ch-missing");
            assert!(err.referenced_from.starts_with("chapters/intro.xml:"));
        }
        other => panic!("expected cross-reference error, got {other:?}"),
    }
    assert!(!output.exists());
}

#[test]
fn schema_violation_reports_position() {
    let (tmp, project) = setup_project();
    let intro = tmp.path().join("docs/chapters/intro.xml");
    let text = fs::read_to_string(&intro)
        .unwrap()
        .replace("<title>Getting started</title>", "<title>Getting started</title>\n    <blink/>");
    fs::write(&intro, text).unwrap();

    let err = run_check(&project, &tmp.path().join(".optdoc")).unwrap_err();
    match err {
        BuildError::Validation(err) => {
            assert_eq!(err.file, "chapters/intro.xml");
            assert!(err.message.contains("<blink>"));
            assert!(err.context.contains("> "));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn check_collects_targets_without_writing_output() {
    let (tmp, project) = setup_project();
    let summary = run_check(&project, &tmp.path().join(".optdoc")).unwrap();
    assert_eq!(summary.inputs, 4);
    assert!(summary.targets >= 8);
    assert!(!tmp.path().join("result").exists());
}

#[test]
fn rebuild_reuses_cached_fragments() {
    let (tmp, project) = setup_project();
    let output = tmp.path().join("result");
    let work = tmp.path().join(".optdoc");

    let first = run_build(&project, &output, &work, true).unwrap();
    assert_eq!(first.cache.misses, 1);
    let index = fs::read_to_string(output.join("share/doc/tool/index.html")).unwrap();

    let second = run_build(&project, &output, &work, true).unwrap();
    assert_eq!(second.cache.hits, 1);
    assert_eq!(second.cache.misses, 0);
    assert_eq!(fs::read_to_string(output.join("share/doc/tool/index.html")).unwrap(), index);

    let forced = run_build(&project, &output, &work, false).unwrap();
    assert_eq!(forced.cache.misses, 1);
}
