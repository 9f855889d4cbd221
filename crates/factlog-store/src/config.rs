//! Engine configuration.

use crate::error::{KbError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// First physical allocation for entity-indexed bit vectors. Grows by
    /// doubling afterwards.
    pub initial_entity_capacity: usize,
    /// Default evaluation mode for `apply_rules`: semi-naive fixpoint when
    /// `true`, one naive pass otherwise.
    pub delta: bool,
    /// Upper bound on semi-naive rounds. `None` runs to fixpoint.
    pub max_rounds: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_entity_capacity: 64,
            delta: true,
            max_rounds: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| KbError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == Some(0) {
            return Err(KbError::Config("max_rounds must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{"max_rounds": 16}"#).unwrap();
        assert_eq!(config.max_rounds, Some(16));
        assert!(config.delta);
        assert_eq!(config.initial_entity_capacity, 64);
    }

    #[test]
    fn zero_round_bound_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{"max_rounds": 0}"#).unwrap_err();
        assert!(matches!(err, KbError::Config(_)));
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}
