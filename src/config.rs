use crate::core::{MapError, Result};
use serde::Deserialize;

/// Entity manager configuration
///
/// Built with the setters below or read from JSON:
///
/// ```
/// use rowmapper::MapperConfig;
///
/// let config = MapperConfig::from_json(r#"{ "max_cascade_depth": 8 }"#).unwrap();
/// assert_eq!(config.max_cascade_depth, 8);
/// assert!(!config.flush_empty_mutators);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapperConfig {
    /// Deepest chain of join references one operation may walk
    pub max_cascade_depth: usize,

    /// Flush mutators that accumulated nothing when a batch ends
    pub flush_empty_mutators: bool,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 32,
            flush_empty_mutators: false,
        }
    }
}

impl MapperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cascade depth limit
    pub fn max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    /// Set whether empty mutators are flushed
    pub fn flush_empty_mutators(mut self, flush: bool) -> Self {
        self.flush_empty_mutators = flush;
        self
    }

    /// Parse and validate a JSON document. Absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MapperConfig =
            serde_json::from_str(json).map_err(|e| MapError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cascade_depth == 0 {
            return Err(MapError::Config(
                "max_cascade_depth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MapperConfig::default();
        assert_eq!(config.max_cascade_depth, 32);
        assert!(!config.flush_empty_mutators);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let config = MapperConfig::new()
            .max_cascade_depth(4)
            .flush_empty_mutators(true);
        assert_eq!(config.max_cascade_depth, 4);
        assert!(config.flush_empty_mutators);
    }

    #[test]
    fn test_from_json() {
        let config = MapperConfig::from_json(r#"{ "flush_empty_mutators": true }"#).unwrap();
        assert_eq!(config.max_cascade_depth, 32);
        assert!(config.flush_empty_mutators);

        assert!(matches!(
            MapperConfig::from_json(r#"{ "max_cascade_depth": 0 }"#),
            Err(MapError::Config(_))
        ));
        assert!(matches!(
            MapperConfig::from_json(r#"{ "eager": true }"#),
            Err(MapError::Config(_))
        ));
        assert!(matches!(MapperConfig::from_json("not json"), Err(MapError::Config(_))));
    }
}
