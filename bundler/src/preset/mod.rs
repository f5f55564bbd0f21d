//! Presets and the transformer registry.
//!
//! A preset bundles everything template-specific: default entry-point
//! candidates, the default HTML body, whether hot replacement is enabled,
//! runtime modules evaluated before the user entry, the registered
//! transformers, and the extension rules that map a file to its ordered
//! transform chain. Chains are validated when rules are registered, so a
//! mismatched config never reaches a compile.

mod react;
mod vanilla;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use sandpit_registry::DependencySet;
use sandpit_vfs::path;

use crate::error::BundleError;
use crate::transform::{Transformer, TransformerConfig, TransformFailure};

pub use react::react;
pub use vanilla::vanilla;

#[derive(Debug, Clone, Copy)]
pub struct RuntimeModule {
    pub path: &'static str,
    pub source: &'static str,
}

struct TransformRule {
    extensions: &'static [&'static str],
    chain: Vec<(&'static str, TransformerConfig)>,
}

pub struct Preset {
    name: &'static str,
    entry_candidates: &'static [&'static str],
    default_html: &'static str,
    hmr_enabled: bool,
    template_extension: Option<&'static str>,
    runtimes: Vec<RuntimeModule>,
    augment: fn(&mut DependencySet),
    transformers: FxHashMap<&'static str, Arc<dyn Transformer>>,
    rules: Vec<TransformRule>,
}

impl Preset {
    pub fn builder(name: &'static str) -> PresetBuilder {
        PresetBuilder {
            name,
            entry_candidates: &[],
            default_html: "",
            hmr_enabled: false,
            template_extension: None,
            runtimes: Vec::new(),
            augment: |_| {},
            transformers: FxHashMap::default(),
            rules: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn entry_candidates(&self) -> &'static [&'static str] {
        self.entry_candidates
    }

    pub fn default_html(&self) -> &'static str {
        self.default_html
    }

    pub fn hmr_enabled(&self) -> bool {
        self.hmr_enabled
    }

    pub fn template_extension(&self) -> Option<&'static str> {
        self.template_extension
    }

    pub fn runtimes(&self) -> &[RuntimeModule] {
        &self.runtimes
    }

    /// Inject framework packages with default versions into the project's
    /// dependency set.
    pub fn augment_dependencies(&self, deps: &mut DependencySet) {
        (self.augment)(deps)
    }

    /// The ordered transform chain for a module. Packager-transpiled files
    /// bypass the extension rules and pass through raw.
    pub fn map_transformers(
        &self,
        module_path: &str,
        transpiled: bool,
        known_deps: Vec<String>,
    ) -> Result<Vec<(Arc<dyn Transformer>, TransformerConfig)>, TransformFailure> {
        if transpiled {
            let raw = self.transformers.get("raw").ok_or_else(|| {
                TransformFailure::new("no raw transformer registered for transpiled files")
            })?;
            return Ok(vec![(raw.clone(), TransformerConfig::Raw { known_deps })]);
        }
        let extension = path::extension(module_path).ok_or_else(|| {
            TransformFailure::new(format!(
                "no transformer for '{module_path}' (the file has no extension)"
            ))
        })?;
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.extensions.contains(&extension.as_str()))
            .ok_or_else(|| {
                TransformFailure::new(format!(
                    "no transformer registered for '.{extension}' files in the {} preset",
                    self.name
                ))
            })?;
        Ok(rule
            .chain
            .iter()
            .map(|(name, config)| {
                let transformer = self.transformers[name].clone();
                (transformer, config.clone())
            })
            .collect())
    }
}

pub struct PresetBuilder {
    name: &'static str,
    entry_candidates: &'static [&'static str],
    default_html: &'static str,
    hmr_enabled: bool,
    template_extension: Option<&'static str>,
    runtimes: Vec<RuntimeModule>,
    augment: fn(&mut DependencySet),
    transformers: FxHashMap<&'static str, Arc<dyn Transformer>>,
    rules: Vec<TransformRule>,
    errors: Vec<String>,
}

impl PresetBuilder {
    pub fn entries(mut self, candidates: &'static [&'static str]) -> Self {
        self.entry_candidates = candidates;
        self
    }

    pub fn default_html(mut self, html: &'static str) -> Self {
        self.default_html = html;
        self
    }

    pub fn hmr(mut self, enabled: bool) -> Self {
        self.hmr_enabled = enabled;
        self
    }

    pub fn template_extension(mut self, extension: &'static str) -> Self {
        self.template_extension = Some(extension);
        self
    }

    pub fn runtime(mut self, path: &'static str, source: &'static str) -> Self {
        self.runtimes.push(RuntimeModule { path, source });
        self
    }

    pub fn augment(mut self, augment: fn(&mut DependencySet)) -> Self {
        self.augment = augment;
        self
    }

    pub fn register(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformers.insert(transformer.name(), transformer);
        self
    }

    /// Map extensions to an ordered chain. Validated against the registered
    /// transformers and their config variants.
    pub fn rule(
        mut self,
        extensions: &'static [&'static str],
        chain: Vec<(&'static str, TransformerConfig)>,
    ) -> Self {
        for (name, config) in &chain {
            match self.transformers.get(name) {
                None => self
                    .errors
                    .push(format!("rule references unregistered transformer '{name}'")),
                Some(transformer) if !transformer.accepts(config) => self.errors.push(format!(
                    "transformer '{name}' cannot take a '{}' config",
                    config.kind()
                )),
                Some(_) => {}
            }
        }
        self.rules.push(TransformRule { extensions, chain });
        self
    }

    pub fn build(self) -> Result<Preset, BundleError> {
        if let Some(first) = self.errors.into_iter().next() {
            return Err(BundleError::Transform {
                path: format!("<{} preset>", self.name),
                message: first,
            });
        }
        Ok(Preset {
            name: self.name,
            entry_candidates: self.entry_candidates,
            default_html: self.default_html,
            hmr_enabled: self.hmr_enabled,
            template_extension: self.template_extension,
            runtimes: self.runtimes,
            augment: self.augment,
            transformers: self.transformers,
            rules: self.rules,
        })
    }
}

/// Look up the preset for a compile request's template name.
pub fn preset_for(template: &str) -> Result<Arc<Preset>, BundleError> {
    match template {
        "" | "vanilla" => Ok(Arc::new(vanilla()?)),
        "react" => Ok(Arc::new(react()?)),
        other => Err(BundleError::UnknownTemplate(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vanilla_maps_extensions_to_chains() {
        let preset = vanilla().unwrap();
        let chain = preset.map_transformers("/index.js", false, vec![]).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].0.name(), "js");

        let chain = preset.map_transformers("/app.ts", false, vec![]).unwrap();
        let names: Vec<&str> = chain.iter().map(|(t, _)| t.name()).collect();
        assert_eq!(names, vec!["ts", "js"]);
    }

    #[test]
    fn unmatched_extensions_fail_with_a_descriptive_error() {
        let preset = vanilla().unwrap();
        let err = preset
            .map_transformers("/logo.svg", false, vec![])
            .unwrap_err();
        assert!(err.message.contains(".svg"));
        assert!(err.message.contains("vanilla"));
    }

    #[test]
    fn transpiled_files_pass_through_raw() {
        let preset = vanilla().unwrap();
        let chain = preset
            .map_transformers(
                "/node_modules/dep/index.js",
                true,
                vec!["./lib".to_string()],
            )
            .unwrap();
        assert_eq!(chain[0].0.name(), "raw");
    }

    #[test]
    fn react_augments_framework_dependencies() {
        let preset = react().unwrap();
        let mut deps = DependencySet::default();
        preset.augment_dependencies(&mut deps);
        assert!(deps.contains_key("react"));
        assert!(deps.contains_key("react-dom"));
        assert!(preset.hmr_enabled());
    }

    #[test]
    fn unknown_templates_are_rejected() {
        assert!(matches!(
            preset_for("angularjs"),
            Err(BundleError::UnknownTemplate(_))
        ));
    }
}
