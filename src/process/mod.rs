//! Dependency orchestration: one template in, one manifest out.
//!
//! [`Processor::process`] runs the whole pipeline for a single template:
//!
//! 1. Load declared extensions and filters (concurrently). Extensions must be
//!    known before parsing because they add tags to the grammar.
//! 2. Build a fresh [`Environment`] and parse the source once.
//! 3. Precompile the tree and resolve sub-template references concurrently.
//!    Compilation needs only the raw search paths, not the resolved ones.
//! 4. Collect the globals, extensions and filters the tree actually uses.
//! 5. Extract asset references, deduplicate them, resolve them against the
//!    asset directories and give each a fresh id.
//! 6. Rewrite asset expressions in the precompiled text into table lookups.
//!
//! Any failure fails the whole call; a partial manifest is never returned.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use uuid::Uuid;

use crate::addons::{
    AddonHandle, AddonLoader, ExtensionDescriptor, FilterDescriptor, load_extensions, load_filters,
};
use crate::compiler::compile_template;
use crate::core::{LoaderError, ReferenceKind};
use crate::extract::{AssetPath, get_assets, get_extensions, get_filters, get_globals, get_templates};
use crate::resolver::{PathProbe, get_possible_paths, resolve_all};
use crate::rewrite::{AssetEntry, rewrite};
use crate::template::{Environment, EnvironmentOptions};

/// Default name of the variable the precompiled module is bound to.
pub const DEFAULT_MODULE_VAR: &str = "template";

/// Inputs of one [`Processor::process`] call besides the source itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOptions {
    /// Directories searched for sub-templates, highest priority first
    pub search_paths: Vec<PathBuf>,
    /// Directories searched for assets, highest priority first
    pub assets_paths: Vec<PathBuf>,
    /// Declared globals
    pub globals: BTreeMap<String, serde_json::Value>,
    /// Extension name to module path
    pub extensions: BTreeMap<String, PathBuf>,
    /// Filter name to module path
    pub filters: BTreeMap<String, PathBuf>,
    /// Parser and output options
    pub environment: EnvironmentOptions,
    /// Variable the precompiled module is bound to
    pub module_var: String,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            assets_paths: Vec::new(),
            globals: BTreeMap::new(),
            extensions: BTreeMap::new(),
            filters: BTreeMap::new(),
            environment: EnvironmentOptions::default(),
            module_var: DEFAULT_MODULE_VAR.to_string(),
        }
    }
}

/// A resolved sub-template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateDependency {
    /// Name as written in the template
    pub name: String,
    pub path: PathBuf,
}

/// Everything a template references, plus its rewritten precompiled source.
#[derive(Debug, Clone)]
pub struct DependencyManifest {
    pub precompiled: String,
    pub dependencies: Vec<TemplateDependency>,
    pub globals: Vec<String>,
    pub extensions: Vec<ExtensionDescriptor>,
    pub filters: Vec<FilterDescriptor>,
    pub assets: Vec<AssetEntry>,
}

/// Serializable view of a [`DependencyManifest`].
#[derive(Debug, Clone, Serialize)]
pub struct ManifestReport {
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precompiled: Option<String>,
    pub dependencies: Vec<TemplateDependency>,
    pub globals: Vec<String>,
    pub extensions: Vec<AddonReport>,
    pub filters: Vec<AddonReport>,
    pub assets: Vec<AssetReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddonReport {
    pub name: String,
    pub module_path: PathBuf,
    pub handle: AddonHandle,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetReport {
    pub path: PathBuf,
    pub id: Uuid,
    pub expression: String,
}

impl DependencyManifest {
    /// Build the serializable view. `include_source` controls whether the
    /// precompiled text is part of it.
    #[must_use]
    pub fn report(&self, template: &str, include_source: bool) -> ManifestReport {
        fn addon<T: ?Sized>(d: &crate::addons::AddonDescriptor<T>) -> AddonReport {
            AddonReport {
                name: d.name.clone(),
                module_path: d.module_path.clone(),
                handle: d.handle,
            }
        }

        ManifestReport {
            template: template.to_string(),
            precompiled: include_source.then(|| self.precompiled.clone()),
            dependencies: self.dependencies.clone(),
            globals: self.globals.clone(),
            extensions: self.extensions.iter().map(addon).collect(),
            filters: self.filters.iter().map(addon).collect(),
            assets: self
                .assets
                .iter()
                .map(|a| AssetReport {
                    path: a.path.clone(),
                    id: a.id,
                    expression: a.reference.expression(),
                })
                .collect(),
        }
    }
}

/// Runs the pipeline with a given filesystem probe and addon loader.
pub struct Processor {
    probe: Box<dyn PathProbe>,
    loader: Box<dyn AddonLoader>,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor").finish_non_exhaustive()
    }
}

fn dedupe_by<T, K: std::hash::Hash + Eq>(items: &mut Vec<T>, key: impl Fn(&T) -> K) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(key(item)));
}

impl Processor {
    pub fn new(probe: impl PathProbe + 'static, loader: impl AddonLoader + 'static) -> Self {
        Self {
            probe: Box::new(probe),
            loader: Box::new(loader),
        }
    }

    /// Process one template.
    ///
    /// # Errors
    ///
    /// - [`LoaderError::AddonLoad`] if a declared extension or filter fails to load
    /// - [`LoaderError::Parse`] if the source is malformed
    /// - [`LoaderError::Compile`] if the precompiler rejects the tree
    /// - [`LoaderError::NotFound`] if a template or asset exists in no search path
    /// - [`LoaderError::UnsupportedExpression`] for an unsupported asset expression
    pub async fn process(
        &self,
        resource_path: &str,
        source: &str,
        options: &ProcessOptions,
    ) -> Result<DependencyManifest, LoaderError> {
        tracing::info!("Processing template '{}'", resource_path);

        let (extensions, filters) = futures::try_join!(
            load_extensions(self.loader.as_ref(), &options.extensions),
            load_filters(self.loader.as_ref(), &options.filters),
        )?;

        let env = Environment::builder()
            .options(options.environment.clone())
            .search_paths(options.search_paths.iter().cloned())
            .extensions(extensions)
            .filters(filters)
            .globals(options.globals.clone())
            .build();
        let tree = env.parse(resource_path, source)?;

        let mut names = get_templates(&tree);
        dedupe_by(&mut names, String::clone);
        let references = get_possible_paths(&names, env.search_paths());

        let (precompiled, resolved) = futures::try_join!(
            async { compile_template(&tree, &env, &options.module_var) },
            resolve_all(self.probe.as_ref(), ReferenceKind::Template, &references),
        )?;

        let globals = get_globals(&tree, env.globals());
        let used_extensions = get_extensions(&tree, env.extensions());
        let used_filters = get_filters(&tree, env.filters());

        let mut assets = get_assets(&tree)?;
        dedupe_by(&mut assets, AssetPath::expression);
        let lookup_names: Vec<String> = assets.iter().map(AssetPath::lookup_name).collect();
        let mut asset_refs = get_possible_paths(&lookup_names, &options.assets_paths);
        for (reference, asset) in asset_refs.iter_mut().zip(&assets) {
            if let AssetPath::Dynamic(_) = asset {
                reference.name = asset.expression();
            }
        }
        let asset_paths = resolve_all(self.probe.as_ref(), ReferenceKind::Asset, &asset_refs).await?;

        let entries: Vec<AssetEntry> = assets
            .into_iter()
            .zip(asset_paths)
            .map(|(reference, (_, path))| AssetEntry {
                path,
                id: Uuid::new_v4(),
                reference,
            })
            .collect();
        let precompiled = rewrite(&precompiled, &entries);

        tracing::debug!(
            "Template '{}': {} dependencies, {} globals, {} extensions, {} filters, {} assets",
            resource_path,
            resolved.len(),
            globals.len(),
            used_extensions.len(),
            used_filters.len(),
            entries.len()
        );

        Ok(DependencyManifest {
            precompiled,
            dependencies: resolved
                .into_iter()
                .map(|(name, path)| TemplateDependency {
                    name,
                    path,
                })
                .collect(),
            globals,
            extensions: used_extensions,
            filters: used_filters,
            assets: entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::{FilterSpec, StaticAddonLoader};
    use crate::compiler::precompile;
    use crate::template::TagExtension;
    use crate::test_utils::ScriptedProbe;
    use std::sync::Arc;

    fn options() -> ProcessOptions {
        ProcessOptions {
            search_paths: vec![PathBuf::from("/d1"), PathBuf::from("/d2")],
            assets_paths: vec![PathBuf::from("/assets")],
            ..ProcessOptions::default()
        }
    }

    #[tokio::test]
    async fn test_template_without_references() {
        let processor = Processor::new(ScriptedProbe::new(), StaticAddonLoader::new());
        let source = "<p>Hello {{ name | upper }}</p>";
        let manifest = processor.process("plain.njk", source, &options()).await.unwrap();

        assert!(manifest.dependencies.is_empty());
        assert!(manifest.globals.is_empty());
        assert!(manifest.extensions.is_empty());
        assert!(manifest.filters.is_empty());
        assert!(manifest.assets.is_empty());
        let unrewritten =
            precompile("plain.njk", source, &Environment::builder().build(), "template").unwrap();
        assert_eq!(manifest.precompiled, unrewritten);
    }

    #[tokio::test]
    async fn test_include_resolves_to_second_directory() {
        let probe = ScriptedProbe::new().present("/d2/a");
        let processor = Processor::new(probe, StaticAddonLoader::new());
        let manifest = processor
            .process("page.njk", r#"{% include "a" %}{% include "a" %}"#, &options())
            .await
            .unwrap();
        assert_eq!(
            manifest.dependencies,
            vec![TemplateDependency {
                name: "a".into(),
                path: PathBuf::from("/d2/a"),
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_include_fails_with_template_kind() {
        let processor = Processor::new(ScriptedProbe::new(), StaticAddonLoader::new());
        let err = processor.process("page.njk", r#"{% include "a" %}"#, &options()).await.unwrap_err();
        assert!(matches!(
            err,
            LoaderError::NotFound { kind: ReferenceKind::Template, ref name, .. } if name == "a"
        ));
    }

    #[tokio::test]
    async fn test_globals_usage() {
        let mut opts = options();
        opts.globals.insert("myGlobal".into(), serde_json::json!("fn"));
        let processor = Processor::new(ScriptedProbe::new(), StaticAddonLoader::new());

        let used = processor.process("t", "{{ myGlobal() }}", &opts).await.unwrap();
        assert_eq!(used.globals, vec!["myGlobal"]);
        let unused = processor.process("t", "{{ myGlobal }}", &opts).await.unwrap();
        assert!(unused.globals.is_empty());
    }

    #[tokio::test]
    async fn test_assets_are_deduplicated_and_rewritten() {
        let probe = ScriptedProbe::new().present("/assets/img/logo.png").present("/assets/img");
        let processor = Processor::new(probe, StaticAddonLoader::new());
        let source = r#"{{ static("img/logo.png") }}{{ static("img/logo.png") }}{{ static("img/" + name + ".png") }}"#;
        let manifest = processor.process("t", source, &options()).await.unwrap();

        assert_eq!(manifest.assets.len(), 2);
        assert_eq!(manifest.assets[0].path, PathBuf::from("/assets/img/logo.png"));
        assert_eq!(manifest.assets[1].path, PathBuf::from("/assets/img"));
        assert_ne!(manifest.assets[0].id, manifest.assets[1].id);

        let lookup = format!("__tmpldepsAssets.get(\"{}\")", manifest.assets[0].id);
        assert_eq!(manifest.precompiled.matches(&lookup).count(), 2);
        assert!(manifest.precompiled.contains(&format!("__tmpldepsAssets.get(\"{}\", ", manifest.assets[1].id)));
    }

    #[tokio::test]
    async fn test_absolute_asset_paths_resolve_under_asset_dir() {
        let existing = ScriptedProbe::new().present("/assets/img/a.png").present("/assets");
        let processor = Processor::new(existing, StaticAddonLoader::new());
        let source = r#"{{ static("/img/a.png") }}{{ static("/" + file) }}"#;
        let manifest = processor.process("t", source, &options()).await.unwrap();

        assert_eq!(manifest.assets[0].path, PathBuf::from("/assets/img/a.png"));
        assert_eq!(manifest.assets[1].path, PathBuf::from("/assets"));
        assert!(!manifest.precompiled.contains("\"/img/a.png\""));
    }

    #[tokio::test]
    async fn test_macro_parameter_asset_is_rewritten() {
        let existing = ScriptedProbe::new().present("/assets/icons");
        let processor = Processor::new(existing, StaticAddonLoader::new());
        let source = r#"{% macro icon(name) %}{{ static("icons/" + name + ".svg") }}{% endmacro %}{{ icon("x") }}"#;
        let manifest = processor.process("t", source, &options()).await.unwrap();

        let lookup = format!("__tmpldepsAssets.get(\"{}\", l_name)", manifest.assets[0].id);
        assert!(manifest.precompiled.contains(&lookup), "{}", manifest.precompiled);
        assert!(!manifest.precompiled.contains("\"icons/\" + "));
    }

    #[tokio::test]
    async fn test_missing_dynamic_asset_names_expression() {
        let processor = Processor::new(ScriptedProbe::new(), StaticAddonLoader::new());
        let err = processor.process("t", r#"{{ static("img/" + n) }}"#, &options()).await.unwrap_err();
        assert_eq!(err.to_string(), r#"Asset '"img/" + n' not found in any search path"#);
    }

    #[tokio::test]
    async fn test_manifest_lists_only_used_addons() {
        let mut loader = StaticAddonLoader::new();
        loader.register_extension("ext/badge", Arc::new(TagExtension::new("badge")));
        loader.register_extension("ext/unused", Arc::new(TagExtension::new("unused")));
        loader.register_filter("f/shout", Arc::new(FilterSpec::default()));
        loader.register_filter("f/quiet", Arc::new(FilterSpec::default()));

        let mut opts = options();
        opts.extensions.insert("badge".into(), PathBuf::from("ext/badge"));
        opts.extensions.insert("unused".into(), PathBuf::from("ext/unused"));
        opts.filters.insert("shout".into(), PathBuf::from("f/shout"));
        opts.filters.insert("quiet".into(), PathBuf::from("f/quiet"));

        let processor = Processor::new(ScriptedProbe::new(), loader);
        let manifest = processor.process("t", "{% badge %}{{ x | shout }}", &opts).await.unwrap();

        let names = |ds: &[ExtensionDescriptor]| ds.iter().map(|d| d.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&manifest.extensions), vec!["badge"]);
        assert_eq!(manifest.filters.len(), 1);
        assert_eq!(manifest.filters[0].name, "shout");
    }

    #[tokio::test]
    async fn test_addon_failure_aborts_before_parsing() {
        let mut opts = options();
        opts.extensions.insert("ghost".into(), PathBuf::from("nowhere"));
        let processor = Processor::new(ScriptedProbe::new(), StaticAddonLoader::new());
        let err = processor.process("t", "{% ghost %}", &opts).await.unwrap_err();
        assert!(matches!(err, LoaderError::AddonLoad { .. }));
    }

    #[tokio::test]
    async fn test_parse_error_carries_template_and_line() {
        let processor = Processor::new(ScriptedProbe::new(), StaticAddonLoader::new());
        let err = processor.process("broken.njk", "ok\n{% for %}", &options()).await.unwrap_err();
        match err {
            LoaderError::Parse {
                template,
                line,
                ..
            } => {
                assert_eq!(template, "broken.njk");
                assert_eq!(line, Some(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let probe = ScriptedProbe::new().present("/assets/a.css");
        let processor = Processor::new(probe, StaticAddonLoader::new());
        let manifest = processor.process("t", r#"{{ static("a.css") }}"#, &options()).await.unwrap();
        let json = serde_json::to_value(manifest.report("t", false)).unwrap();
        assert!(json.get("precompiled").is_none());
        assert_eq!(json["assets"][0]["expression"], "\"a.css\"");
        assert_eq!(json["assets"][0]["path"], "/assets/a.css");
    }
}
