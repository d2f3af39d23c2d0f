//! Search path priority and missing references.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tmpldeps::addons::StaticAddonLoader;
use tmpldeps::core::{LoaderError, ReferenceKind};
use tmpldeps::process::{ProcessOptions, Processor};
use tmpldeps::resolver::FsProbe;
use tmpldeps::test_utils::ScriptedProbe;

use crate::common::TestProject;

fn two_dirs(project: &TestProject) -> ProcessOptions {
    ProcessOptions {
        search_paths: vec![project.join("first"), project.join("second")],
        assets_paths: vec![project.join("static"), project.join("vendor")],
        ..ProcessOptions::default()
    }
}

#[tokio::test]
async fn test_first_directory_wins() -> Result<()> {
    let project = TestProject::new()?;
    project.write("first/a.njk", "first")?;
    project.write("second/a.njk", "second")?;
    project.write("second/b.njk", "second")?;
    project.write("vendor/lib.js", "")?;

    let processor = Processor::new(FsProbe, StaticAddonLoader::new());
    let manifest = processor
        .process(
            "page.njk",
            r#"{% include "a.njk" %}{% include "b.njk" %}{{ static("lib.js") }}"#,
            &two_dirs(&project),
        )
        .await?;

    assert_eq!(manifest.dependencies[0].path, project.join("first/a.njk"));
    assert_eq!(manifest.dependencies[1].path, project.join("second/b.njk"));
    assert_eq!(manifest.assets[0].path, project.join("vendor/lib.js"));
    Ok(())
}

#[tokio::test]
async fn test_missing_template_lists_every_candidate() -> Result<()> {
    let project = TestProject::new()?;
    let processor = Processor::new(FsProbe, StaticAddonLoader::new());
    let err = processor
        .process("page.njk", r#"{% from "forms.njk" import field %}"#, &two_dirs(&project))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Template 'forms.njk' not found in any search path");
    match err {
        LoaderError::NotFound {
            kind,
            searched,
            ..
        } => {
            assert_eq!(kind, ReferenceKind::Template);
            assert_eq!(searched, vec![project.join("first/forms.njk"), project.join("second/forms.njk")]);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_asset_is_asset_kind() -> Result<()> {
    let project = TestProject::new()?;
    let processor = Processor::new(FsProbe, StaticAddonLoader::new());
    let err = processor
        .process("page.njk", r#"{{ static("img/none.png") }}"#, &two_dirs(&project))
        .await
        .unwrap_err();
    assert!(matches!(err, LoaderError::NotFound { kind: ReferenceKind::Asset, .. }));
    Ok(())
}

#[tokio::test]
async fn test_slow_high_priority_directory_still_wins() -> Result<()> {
    let probe = ScriptedProbe::new()
        .present_after("/t1/a.njk", Duration::from_millis(60))
        .present("/t2/a.njk");
    let opts = ProcessOptions {
        search_paths: vec![PathBuf::from("/t1"), PathBuf::from("/t2")],
        ..ProcessOptions::default()
    };
    let processor = Processor::new(probe, StaticAddonLoader::new());
    let manifest = processor.process("p", r#"{% include "a.njk" %}"#, &opts).await?;
    assert_eq!(manifest.dependencies[0].path, PathBuf::from("/t1/a.njk"));
    Ok(())
}

#[tokio::test]
async fn test_one_missing_reference_fails_without_waiting_for_others() {
    let probe = ScriptedProbe::new().hang("/t/slow.njk");
    let opts = ProcessOptions {
        search_paths: vec![PathBuf::from("/t")],
        ..ProcessOptions::default()
    };
    let processor = Processor::new(probe, StaticAddonLoader::new());

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        processor.process("p", r#"{% include "slow.njk" %}{% include "gone.njk" %}"#, &opts),
    )
    .await
    .expect("processing waited on a hung probe");
    assert!(matches!(result, Err(LoaderError::NotFound { ref name, .. }) if name == "gone.njk"));
}

#[tokio::test]
async fn test_each_distinct_name_is_probed_once() -> Result<()> {
    let probe = ScriptedProbe::new().present("/t/a.njk");
    let probed = probe.clone();
    let opts = ProcessOptions {
        search_paths: vec![PathBuf::from("/t")],
        ..ProcessOptions::default()
    };
    let processor = Processor::new(probe, StaticAddonLoader::new());
    processor
        .process("p", r#"{% include "a.njk" %}{% include "a.njk" %}{% extends "a.njk" %}"#, &opts)
        .await?;
    assert_eq!(probed.probed(), vec![PathBuf::from("/t/a.njk")]);
    Ok(())
}
