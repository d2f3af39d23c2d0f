//! Extensions and filters declared through descriptor files.

use anyhow::Result;
use std::path::PathBuf;
use tmpldeps::addons::{DescriptorFileLoader, ExtensionRef};
use tmpldeps::core::{AddonKind, LoaderError};
use tmpldeps::process::{ProcessOptions, Processor};
use tmpldeps::resolver::FsProbe;
use tmpldeps::template::{NodeCategory, NodeKind};

use crate::common::TestProject;

fn declare(project: &TestProject) -> Result<ProcessOptions> {
    project.write("addons/badge.toml", "tags = [\"badge\", \"pill\"]\n")?;
    project.write("addons/card.toml", "body = true\nidentity = \"instance\"\n")?;
    project.write("addons/fetch.toml", "async = true\n")?;
    project.write("addons/shout.toml", "")?;

    let mut opts = ProcessOptions::default();
    opts.extensions.insert("badge".into(), PathBuf::from("addons/badge.toml"));
    opts.extensions.insert("card".into(), PathBuf::from("addons/card.toml"));
    opts.filters.insert("fetch".into(), PathBuf::from("addons/fetch.toml"));
    opts.filters.insert("shout".into(), PathBuf::from("addons/shout.toml"));
    Ok(opts)
}

#[tokio::test]
async fn test_used_addons_from_descriptors() -> Result<()> {
    let project = TestProject::new()?;
    let opts = declare(&project)?;
    let processor = Processor::new(FsProbe, DescriptorFileLoader::new(project.path()));

    let manifest = processor
        .process("t.njk", "{% pill \"beta\" %}{% card %}<p>{{ title }}</p>{% endcard %}", &opts)
        .await?;
    let names: Vec<_> = manifest.extensions.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["badge", "card"]);
    assert!(manifest.filters.is_empty());
    assert!(manifest.precompiled.contains("env.getExtension(\"card\")"));
    assert!(manifest.precompiled.contains("function root("));
    assert!(!manifest.precompiled.contains("async function"));
    Ok(())
}

#[tokio::test]
async fn test_async_filter_makes_render_functions_async() -> Result<()> {
    let project = TestProject::new()?;
    let opts = declare(&project)?;
    let processor = Processor::new(FsProbe, DescriptorFileLoader::new(project.path()));

    let manifest = processor.process("t.njk", "{{ url | fetch | shout }}", &opts).await?;
    let names: Vec<_> = manifest.filters.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["fetch", "shout"]);
    assert!(manifest.precompiled.contains("async function root("));
    assert!(manifest.precompiled.contains("await env.getFilter(\"fetch\")"));
    Ok(())
}

#[tokio::test]
async fn test_instance_identity_reaches_call_site() -> Result<()> {
    let project = TestProject::new()?;
    let opts = declare(&project)?;
    let loader = DescriptorFileLoader::new(project.path());

    let extensions = tmpldeps::addons::load_extensions(&loader, &opts.extensions).await?;
    let card = extensions.iter().find(|d| d.name == "card").expect("card is declared").clone();
    let env = tmpldeps::template::Environment::builder().extensions(extensions).build();
    let tree = env.parse("t", "{% card %}x{% endcard %}")?;

    let sites: Vec<_> = tree
        .find_all(NodeCategory::ExtensionCall)
        .into_iter()
        .filter_map(|n| match &n.kind {
            NodeKind::CallExtension { ext, .. } => Some(ext.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(sites, vec![ExtensionRef::ByInstance(card.handle)]);
    Ok(())
}

#[tokio::test]
async fn test_broken_descriptor_names_the_addon() -> Result<()> {
    let project = TestProject::new()?;
    project.write("addons/bad.toml", "tag = \"typo\"\n")?;
    let mut opts = ProcessOptions::default();
    opts.extensions.insert("bad".into(), PathBuf::from("addons/bad.toml"));

    let processor = Processor::new(FsProbe, DescriptorFileLoader::new(project.path()));
    let err = processor.process("t.njk", "text", &opts).await.unwrap_err();
    match err {
        LoaderError::AddonLoad {
            kind,
            name,
            module_path,
            ..
        } => {
            assert_eq!(kind, AddonKind::Extension);
            assert_eq!(name, "bad");
            assert_eq!(module_path, "addons/bad.toml");
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_filter_module() -> Result<()> {
    let project = TestProject::new()?;
    let mut opts = ProcessOptions::default();
    opts.filters.insert("ghost".into(), PathBuf::from("addons/ghost.toml"));

    let processor = Processor::new(FsProbe, DescriptorFileLoader::new(project.path()));
    let err = processor.process("t.njk", "{{ x | ghost }}", &opts).await.unwrap_err();
    assert!(err.to_string().starts_with("Failed to load filter 'ghost'"), "{err}");
    Ok(())
}
