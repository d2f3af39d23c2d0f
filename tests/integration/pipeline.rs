//! End-to-end processing of templates laid out on disk.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tmpldeps::addons::StaticAddonLoader;
use tmpldeps::compiler::precompile;
use tmpldeps::core::LoaderError;
use tmpldeps::process::{ProcessOptions, Processor};
use tmpldeps::resolver::FsProbe;
use tmpldeps::template::{Environment, EnvironmentOptions, TagExtension, TagSyntax};

use crate::common::TestProject;

fn options(project: &TestProject) -> ProcessOptions {
    ProcessOptions {
        search_paths: vec![project.join("templates")],
        assets_paths: vec![project.join("assets")],
        ..ProcessOptions::default()
    }
}

const PAGE: &str = r#"{% extends "base.njk" %}
{% import "macros.njk" as m %}
{% block body %}
{% include "partials/nav.njk" %}
<img src="{{ static("img/logo.png") }}" alt="{{ siteName }}">
{% for icon in icons %}<i data-src="{{ static("icons/" + icon + ".svg") }}"></i>{% endfor %}
<footer>{{ year() | upper }} {{ static("img/logo.png") }}</footer>
{% endblock %}
"#;

#[tokio::test]
async fn test_full_page_manifest() -> Result<()> {
    let project = TestProject::new()?;
    project.write("templates/base.njk", "<html>{% block body %}{% endblock %}</html>")?;
    project.write("templates/macros.njk", "{% macro field(name) %}<input name=\"{{ name }}\">{% endmacro %}")?;
    project.write("templates/partials/nav.njk", "<nav></nav>")?;
    project.write("assets/img/logo.png", "png")?;
    project.dir("assets/icons")?;

    let mut opts = options(&project);
    opts.globals.insert("year".into(), serde_json::json!("fn"));
    opts.globals.insert("siteName".into(), serde_json::json!("Example"));

    let processor = Processor::new(FsProbe, StaticAddonLoader::new());
    let manifest = processor.process("page.njk", PAGE, &opts).await?;

    let deps: Vec<_> = manifest.dependencies.iter().map(|d| (d.name.as_str(), d.path.clone())).collect();
    assert_eq!(
        deps,
        vec![
            ("base.njk", project.join("templates/base.njk")),
            ("macros.njk", project.join("templates/macros.njk")),
            ("partials/nav.njk", project.join("templates/partials/nav.njk")),
        ]
    );
    // `siteName` is only read, never called
    assert_eq!(manifest.globals, vec!["year"]);

    assert_eq!(manifest.assets.len(), 2);
    assert_eq!(manifest.assets[0].path, project.join("assets/img/logo.png"));
    assert_eq!(manifest.assets[1].path, project.join("assets/icons"));
    assert_eq!(manifest.assets[1].reference.expression(), r#""icons/" + icon + ".svg""#);

    let pre = &manifest.precompiled;
    assert!(pre.starts_with("var template = (function() {"));
    assert_eq!(pre.matches(&format!("__tmpldepsAssets.get(\"{}\")", manifest.assets[0].id)).count(), 2);
    assert!(pre.contains(&format!("__tmpldepsAssets.get(\"{}\", t_", manifest.assets[1].id)));
    assert!(!pre.contains("\"img/logo.png\""));
    assert!(!pre.contains("\"icons/\" + "));
    Ok(())
}

#[tokio::test]
async fn test_template_without_references_is_plain_precompile() -> Result<()> {
    let project = TestProject::new()?;
    project.dir("templates")?;
    let source = "{% set greeting = \"hi\" %}<p>{{ greeting | capitalize }}, {{ user.name }}</p>";

    let processor = Processor::new(FsProbe, StaticAddonLoader::new());
    let manifest = processor.process("plain.njk", source, &options(&project)).await?;

    assert!(manifest.dependencies.is_empty());
    assert!(manifest.assets.is_empty());
    let expected = precompile("plain.njk", source, &Environment::builder().build(), "template")?;
    assert_eq!(manifest.precompiled, expected);
    Ok(())
}

#[tokio::test]
async fn test_custom_delimiters() -> Result<()> {
    let project = TestProject::new()?;
    project.write("templates/head.html", "<head></head>")?;
    project.write("assets/site.css", "body {}")?;

    let mut opts = options(&project);
    opts.environment = EnvironmentOptions {
        tags: TagSyntax {
            block_start: "<%".into(),
            block_end: "%>".into(),
            variable_start: "<$".into(),
            variable_end: "$>".into(),
            ..TagSyntax::default()
        },
        ..EnvironmentOptions::default()
    };
    let source = r#"<% include "head.html" %><link href="<$ static("site.css") $>"> {{ not_a_tag }}"#;

    let processor = Processor::new(FsProbe, StaticAddonLoader::new());
    let manifest = processor.process("custom.html", source, &opts).await?;
    assert_eq!(manifest.dependencies[0].path, project.join("templates/head.html"));
    assert_eq!(manifest.assets[0].path, project.join("assets/site.css"));
    Ok(())
}

#[tokio::test]
async fn test_module_var_names_the_output() -> Result<()> {
    let project = TestProject::new()?;
    let mut opts = options(&project);
    opts.module_var = "pageTemplate".into();

    let processor = Processor::new(FsProbe, StaticAddonLoader::new());
    let manifest = processor.process("t", "x", &opts).await?;
    assert!(manifest.precompiled.starts_with("var pageTemplate = (function() {"));

    opts.module_var = "not valid".into();
    let err = processor.process("t", "x", &opts).await.unwrap_err();
    assert!(matches!(err, LoaderError::Compile { .. }));
    Ok(())
}

#[tokio::test]
async fn test_extensions_do_not_leak_between_calls() -> Result<()> {
    let project = TestProject::new()?;
    let mut loader = StaticAddonLoader::new();
    loader.register_extension("ext/badge", Arc::new(TagExtension::new("badge")));
    let processor = Processor::new(FsProbe, loader);

    let mut with_ext = options(&project);
    with_ext.extensions.insert("badge".into(), PathBuf::from("ext/badge"));
    let manifest = processor.process("a.njk", "{% badge \"new\" %}", &with_ext).await?;
    assert_eq!(manifest.extensions.len(), 1);

    let err = processor.process("b.njk", "{% badge \"new\" %}", &options(&project)).await.unwrap_err();
    match err {
        LoaderError::Parse {
            template,
            message,
            ..
        } => {
            assert_eq!(template, "b.njk");
            assert!(message.contains("badge"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_unsupported_asset_expression() -> Result<()> {
    let project = TestProject::new()?;
    let processor = Processor::new(FsProbe, StaticAddonLoader::new());
    let err = processor
        .process("t.njk", "line one\n{{ static(\"img/\" + user.avatar) }}", &options(&project))
        .await
        .unwrap_err();
    match err {
        LoaderError::UnsupportedExpression {
            template,
            line,
            ..
        } => {
            assert_eq!(template, "t.njk");
            assert_eq!(line, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}
