//! The `tmpldeps process` binary.

use anyhow::Result;
use predicates::prelude::*;

use crate::common::TestProject;

fn site(project: &TestProject) -> Result<()> {
    project.write("templates/base.njk", "<html>{% block main %}{% endblock %}</html>")?;
    project.write(
        "templates/page.njk",
        r#"{% extends "base.njk" %}{% block main %}<img src="{{ static("logo.svg") }}"> {{ year() }}{% endblock %}"#,
    )?;
    project.write("assets/logo.svg", "<svg/>")?;
    project.config(
        r#"
search_paths = ["templates"]
assets_paths = ["assets"]

[globals]
year = 2024
"#,
    )?;
    Ok(())
}

#[test]
fn test_process_prints_manifest() -> Result<()> {
    let project = TestProject::new()?;
    site(&project)?;

    let output = project.run_tmpldeps(&["process", "templates/page.njk"])?;
    output.assert_success();
    let json = output.json();

    assert_eq!(json["template"], "templates/page.njk");
    assert_eq!(json["dependencies"][0]["name"], "base.njk");
    assert!(json["dependencies"][0]["path"].as_str().unwrap_or_default().ends_with("templates/base.njk"));
    assert_eq!(json["globals"], serde_json::json!(["year"]));
    assert_eq!(json["assets"][0]["expression"], "\"logo.svg\"");

    let id = json["assets"][0]["id"].as_str().unwrap_or_default().to_string();
    let precompiled = json["precompiled"].as_str().unwrap_or_default();
    assert!(precompiled.contains(&format!("__tmpldepsAssets.get(\"{id}\")")));
    Ok(())
}

#[test]
fn test_manifest_only_omits_source() -> Result<()> {
    let project = TestProject::new()?;
    site(&project)?;

    let output = project.run_tmpldeps(&["process", "templates/page.njk", "--manifest-only", "-q"])?;
    output.assert_success();
    assert!(output.json().get("precompiled").is_none());
    Ok(())
}

#[test]
fn test_command_line_directories_take_priority() -> Result<()> {
    let project = TestProject::new()?;
    site(&project)?;
    project.write("override/base.njk", "<main>{% block main %}{% endblock %}</main>")?;

    let output =
        project.run_tmpldeps(&["process", "templates/page.njk", "--search-path", "override", "-q"])?;
    output.assert_success();
    let path = output.json()["dependencies"][0]["path"].as_str().unwrap_or_default().to_string();
    assert!(path.ends_with("override/base.njk"), "{path}");
    Ok(())
}

#[test]
fn test_template_directory_is_default_search_path() -> Result<()> {
    let project = TestProject::new()?;
    project.write("views/main.njk", r#"{% include "part.njk" %}"#)?;
    project.write("views/part.njk", "part")?;

    let output = project.run_tmpldeps(&["process", "views/main.njk", "--module-var", "view", "-q"])?;
    output.assert_success();
    let json = output.json();
    assert!(json["dependencies"][0]["path"].as_str().unwrap_or_default().ends_with("views/part.njk"));
    assert!(json["precompiled"].as_str().unwrap_or_default().starts_with("var view = "));
    Ok(())
}

#[test]
fn test_config_from_environment_variable() -> Result<()> {
    let project = TestProject::new()?;
    project.write("conf/custom.toml", "search_paths = [\"../shared\"]\n")?;
    project.write("shared/layout.njk", "")?;
    project.write("page.njk", r#"{% extends "layout.njk" %}"#)?;

    project
        .command()
        .env("TMPLDEPS_CONFIG", project.join("conf/custom.toml"))
        .args(["-q", "process", "page.njk"])
        .assert()
        .success()
        .stdout(predicate::str::contains("layout.njk"));
    Ok(())
}

#[test]
fn test_missing_dependency_fails_with_message() -> Result<()> {
    let project = TestProject::new()?;
    project.write("page.njk", r#"{% include "missing.njk" %}"#)?;

    project
        .command()
        .args(["process", "page.njk", "-q"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Template 'missing.njk' not found in any search path"));
    Ok(())
}

#[test]
fn test_parse_error_reports_location() -> Result<()> {
    let project = TestProject::new()?;
    project.write("broken.njk", "ok\n{% if %}")?;

    let output = project.run_tmpldeps(&["-q", "process", "broken.njk"])?;
    output.assert_failure();
    assert!(output.stderr.contains("Failed to parse template 'broken.njk' at line 2"), "{}", output.stderr);
    Ok(())
}

#[test]
fn test_unreadable_template() -> Result<()> {
    let project = TestProject::new()?;
    project
        .command()
        .args(["process", "nope.njk"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read template nope.njk"));
    Ok(())
}

#[test]
fn test_invalid_config_is_reported() -> Result<()> {
    let project = TestProject::new()?;
    project.write("page.njk", "x")?;
    project.config("search_paths = \"not a list\"\n")?;

    project
        .command()
        .args(["process", "page.njk"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
    Ok(())
}
