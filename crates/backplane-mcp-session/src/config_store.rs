//! Per-provider runtime settings.
//!
//! Each provider type has its own schema and its own lock, so updates to one
//! provider never wait on another. Updates are validated in full before any
//! field changes.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::info;

use backplane_mcp_protocol::{BackplaneError, ConfigSchema, ProviderSettings, ProviderType};

struct ConfigEntry {
    schema: ConfigSchema,
    settings: RwLock<ProviderSettings>,
}

#[derive(Default)]
pub struct ConfigStore {
    entries: HashMap<ProviderType, ConfigEntry>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider schema with every option at its default.
    pub fn with_provider(mut self, provider_type: ProviderType, schema: ConfigSchema) -> Self {
        let settings = RwLock::new(schema.defaults());
        self.entries
            .insert(provider_type, ConfigEntry { schema, settings });
        self
    }

    fn entry(&self, provider_type: ProviderType) -> Result<&ConfigEntry, BackplaneError> {
        self.entries
            .get(&provider_type)
            .ok_or_else(|| BackplaneError::Validation {
                field: "provider".to_string(),
                reason: format!("provider '{}' is not enabled", provider_type),
            })
    }

    pub fn provider_types(&self) -> Vec<ProviderType> {
        let mut types: Vec<_> = self.entries.keys().copied().collect();
        types.sort();
        types
    }

    pub fn schema(&self, provider_type: ProviderType) -> Result<&ConfigSchema, BackplaneError> {
        Ok(&self.entry(provider_type)?.schema)
    }

    /// Current settings snapshot.
    pub fn get(&self, provider_type: ProviderType) -> Result<ProviderSettings, BackplaneError> {
        Ok(self.entry(provider_type)?.settings.read().clone())
    }

    /// Validate every field of `patch`, then apply all of them. Returns the new settings.
    pub fn update(
        &self,
        provider_type: ProviderType,
        patch: &Map<String, Value>,
    ) -> Result<ProviderSettings, BackplaneError> {
        let entry = self.entry(provider_type)?;
        let mut settings = entry.settings.write();
        entry.schema.validate_patch(patch)?;
        settings.apply(patch);
        info!(
            provider = %provider_type,
            fields = ?patch.keys().collect::<Vec<_>>(),
            "Settings updated"
        );
        Ok(settings.clone())
    }

    /// Apply `patch` restricted to the options this provider declares.
    ///
    /// Used for process-wide switches (e.g. `disable_delete`) that only some
    /// providers understand. Returns `Ok(false)` when nothing applied.
    pub fn update_known(
        &self,
        provider_type: ProviderType,
        patch: &Map<String, Value>,
    ) -> Result<bool, BackplaneError> {
        let schema = self.schema(provider_type)?;
        let known: Map<String, Value> = patch
            .iter()
            .filter(|(name, _)| schema.contains(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if known.is_empty() {
            return Ok(false);
        }
        self.update(provider_type, &known)?;
        Ok(true)
    }
}
