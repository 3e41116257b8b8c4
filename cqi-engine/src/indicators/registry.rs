//! Template registry
//!
//! Loaded once at process start and immutable afterwards. Catalog entries
//! keep catalog order; templates the catalog doesn't know are appended in id
//! order so every template a source offers is runnable.

use cqi_common::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::binder::{ParameterSet, TemplateStyle};
use super::catalog::{builtin_definitions, IndicatorDefinition};
use super::source::TemplateSource;

struct RegisteredIndicator {
    definition: IndicatorDefinition,
    template: String,
    style: TemplateStyle,
}

/// Indicator templates keyed by indicator id, in registration order
pub struct TemplateRegistry {
    entries: Vec<RegisteredIndicator>,
    index: HashMap<String, usize>,
}

impl TemplateRegistry {
    /// Load templates for the built-in catalog plus any extra ids the source offers
    pub fn load(source: &dyn TemplateSource) -> Result<Self> {
        Self::load_with_catalog(source, builtin_definitions())
    }

    /// Load templates for `catalog` plus any extra ids the source offers
    pub fn load_with_catalog(
        source: &dyn TemplateSource,
        catalog: Vec<IndicatorDefinition>,
    ) -> Result<Self> {
        let mut registry = Self {
            entries: Vec::new(),
            index: HashMap::new(),
        };

        let mut missing = 0usize;
        for definition in catalog {
            match source.load_template(&definition.id)? {
                Some(template) => registry.register(definition, template),
                None => {
                    warn!(indicator_id = %definition.id, "No template found for catalog indicator");
                    missing += 1;
                }
            }
        }

        for id in source.list_ids()? {
            if registry.index.contains_key(&id) {
                continue;
            }
            if let Some(template) = source.load_template(&id)? {
                debug!(indicator_id = %id, "Registering uncatalogued template");
                registry.register(IndicatorDefinition::uncatalogued(&id), template);
            }
        }

        info!(
            registered = registry.entries.len(),
            missing, "Template registry loaded"
        );
        Ok(registry)
    }

    fn register(&mut self, definition: IndicatorDefinition, template: String) {
        let style = TemplateStyle::detect(&template);
        self.index
            .insert(definition.id.clone(), self.entries.len());
        self.entries.push(RegisteredIndicator {
            definition,
            template,
            style,
        });
    }

    /// Registered definitions in registration order
    pub fn definitions(&self) -> impl Iterator<Item = &IndicatorDefinition> {
        self.entries.iter().map(|e| &e.definition)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.definition.id.clone())
            .collect()
    }

    pub fn definition(&self, indicator_id: &str) -> Option<&IndicatorDefinition> {
        self.index
            .get(indicator_id)
            .map(|&i| &self.entries[i].definition)
    }

    pub fn contains(&self, indicator_id: &str) -> bool {
        self.index.contains_key(indicator_id)
    }

    pub fn template(&self, indicator_id: &str) -> Result<&str> {
        self.entry(indicator_id).map(|e| e.template.as_str())
    }

    pub fn style(&self, indicator_id: &str) -> Result<TemplateStyle> {
        self.entry(indicator_id).map(|e| e.style)
    }

    /// Resolve `params` against the indicator's template
    pub fn bind(&self, indicator_id: &str, params: &ParameterSet) -> Result<String> {
        let entry = self.entry(indicator_id)?;
        Ok((entry.style.binder())(&entry.template, params))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, indicator_id: &str) -> Result<&RegisteredIndicator> {
        self.index
            .get(indicator_id)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| Error::TemplateNotFound(indicator_id.to_string()))
    }
}
