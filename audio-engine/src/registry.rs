//! Process-wide table of authored commands, keyed by [`CommandId`].
//!
//! Only triggers carry a real definition; switches, states and parameters
//! are registered by name and dispatched as not-implemented.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::error;

use crate::command::{ActionKind, CommandId, CommandKind, TriggerCommand};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("command name '{0}' is already registered")]
    DuplicateName(String),
    #[error("command name '{new}' collides with '{existing}' (CRC-32 {id})")]
    HashCollision {
        new: String,
        existing: String,
        id: CommandId,
    },
}

#[derive(Default)]
struct Tables {
    triggers: HashMap<CommandId, TriggerCommand>,
    switches: HashMap<CommandId, String>,
    states: HashMap<CommandId, String>,
    parameters: HashMap<CommandId, String>,
}

impl Tables {
    /// Name already occupying `id` in the table for `kind`, if any.
    fn existing_name(&self, kind: CommandKind, id: CommandId) -> Option<&str> {
        match kind {
            CommandKind::Trigger => self.triggers.get(&id).map(|t| t.debug_name.as_str()),
            CommandKind::Switch => self.switches.get(&id).map(String::as_str),
            CommandKind::State => self.states.get(&id).map(String::as_str),
            CommandKind::Parameter => self.parameters.get(&id).map(String::as_str),
        }
    }
}

/// Mutex-guarded command tables. Readers may be on any thread; the realtime
/// path never touches this.
#[derive(Default)]
pub struct CommandRegistry {
    tables: Mutex<Tables>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_insertable(
        tables: &Tables,
        kind: CommandKind,
        name: &str,
        id: CommandId,
    ) -> Result<(), RegistryError> {
        if let Some(existing) = tables.existing_name(kind, id) {
            let err = if existing == name {
                RegistryError::DuplicateName(name.to_string())
            } else {
                // Two distinct names hashing to one CRC is an authoring error.
                RegistryError::HashCollision {
                    new: name.to_string(),
                    existing: existing.to_string(),
                    id,
                }
            };
            error!(target: "audio::registry", "{err}");
            return Err(err);
        }
        Ok(())
    }

    pub fn add_trigger(
        &self,
        name: &str,
        mut command: TriggerCommand,
    ) -> Result<CommandId, RegistryError> {
        let id = CommandId::from_name(name);
        let mut tables = self.tables.lock();
        Self::check_insertable(&tables, CommandKind::Trigger, name, id)?;
        command.debug_name = name.to_string();
        tables.triggers.insert(id, command);
        Ok(id)
    }

    pub fn add_switch(&self, name: &str) -> Result<CommandId, RegistryError> {
        let id = CommandId::from_name(name);
        let mut tables = self.tables.lock();
        Self::check_insertable(&tables, CommandKind::Switch, name, id)?;
        tables.switches.insert(id, name.to_string());
        Ok(id)
    }

    pub fn add_state(&self, name: &str) -> Result<CommandId, RegistryError> {
        let id = CommandId::from_name(name);
        let mut tables = self.tables.lock();
        Self::check_insertable(&tables, CommandKind::State, name, id)?;
        tables.states.insert(id, name.to_string());
        Ok(id)
    }

    pub fn add_parameter(&self, name: &str) -> Result<CommandId, RegistryError> {
        let id = CommandId::from_name(name);
        let mut tables = self.tables.lock();
        Self::check_insertable(&tables, CommandKind::Parameter, name, id)?;
        tables.parameters.insert(id, name.to_string());
        Ok(id)
    }

    pub fn remove_trigger(&self, id: CommandId) -> bool {
        self.tables.lock().triggers.remove(&id).is_some()
    }

    pub fn remove_switch(&self, id: CommandId) -> bool {
        self.tables.lock().switches.remove(&id).is_some()
    }

    pub fn remove_state(&self, id: CommandId) -> bool {
        self.tables.lock().states.remove(&id).is_some()
    }

    pub fn remove_parameter(&self, id: CommandId) -> bool {
        self.tables.lock().parameters.remove(&id).is_some()
    }

    pub fn trigger_exists(&self, id: CommandId) -> bool {
        self.tables.lock().triggers.contains_key(&id)
    }

    /// Clone of a trigger definition. The clone shares its action targets,
    /// so pointer identity of sound configs survives.
    pub fn trigger(&self, id: CommandId) -> Option<TriggerCommand> {
        self.tables.lock().triggers.get(&id).cloned()
    }

    /// Stable snapshot of all registered triggers.
    pub fn triggers(&self) -> Vec<(CommandId, TriggerCommand)> {
        self.tables
            .lock()
            .triggers
            .iter()
            .map(|(id, command)| (*id, command.clone()))
            .collect()
    }

    pub fn trigger_count(&self) -> usize {
        self.tables.lock().triggers.len()
    }

    /// Every audio asset referenced by a Play action of any trigger.
    pub fn all_referenced_assets(&self) -> HashSet<u64> {
        let tables = self.tables.lock();
        let mut assets = HashSet::new();
        for trigger in tables.triggers.values() {
            for action in &trigger.actions {
                if action.kind == ActionKind::Play {
                    if let Some(target) = &action.target {
                        assets.insert(target.data_source_asset);
                    }
                }
            }
        }
        assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ActionContext, TriggerAction};
    use crate::config::SoundConfig;
    use std::sync::Arc;

    fn play_trigger(asset: u64) -> TriggerCommand {
        let config = Arc::new(SoundConfig {
            data_source_asset: asset,
            ..Default::default()
        });
        TriggerCommand::new(
            "",
            vec![TriggerAction::new(
                ActionKind::Play,
                Some(config),
                ActionContext::Object,
            )],
        )
    }

    #[test]
    fn add_lookup_remove() {
        let registry = CommandRegistry::new();
        let id = registry.add_trigger("explode", play_trigger(42)).unwrap();
        assert_eq!(id, CommandId::from_name("explode"));
        assert!(registry.trigger_exists(id));
        assert_eq!(registry.trigger(id).unwrap().debug_name, "explode");
        assert!(registry.remove_trigger(id));
        assert!(!registry.trigger_exists(id));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = CommandRegistry::new();
        registry.add_trigger("explode", play_trigger(1)).unwrap();
        assert!(matches!(
            registry.add_trigger("explode", play_trigger(2)),
            Err(RegistryError::DuplicateName(_))
        ));
    }

    #[test]
    fn kinds_use_separate_tables() {
        let registry = CommandRegistry::new();
        registry.add_trigger("volume", play_trigger(1)).unwrap();
        // Same name in another kind's table is fine.
        registry.add_parameter("volume").unwrap();
        assert!(registry.add_parameter("volume").is_err());
    }

    #[test]
    fn snapshot_is_stable_against_later_mutation() {
        let registry = CommandRegistry::new();
        registry.add_trigger("a", play_trigger(1)).unwrap();
        let snapshot = registry.triggers();
        registry.add_trigger("b", play_trigger(2)).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.trigger_count(), 2);
    }

    #[test]
    fn referenced_assets_collects_play_targets() {
        let registry = CommandRegistry::new();
        registry.add_trigger("a", play_trigger(10)).unwrap();
        registry.add_trigger("b", play_trigger(20)).unwrap();
        let assets = registry.all_referenced_assets();
        assert!(assets.contains(&10) && assets.contains(&20));
    }
}
