//! Operator configuration: the serde-facing [`WindowOperatorConfig`] and the
//! validated [`WindowDefinition`] the operator is built from.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use slicewise_core::id::{OperatorId, OriginId};
use slicewise_core::measure::WindowMeasure;
use slicewise_core::schema::{DataType, Field, Schema};
use slicewise_core::types::{KeyValue, RowBatch};

use crate::action::ActionDescriptor;
use crate::aggregation::Aggregation;
use crate::assigner::WindowAssigner;
use crate::error::{Result, WindowError};
use crate::slice::StateLayout;
use crate::trigger::TriggerPolicy;

/// What happens to open windows when the operator's workers close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Hand over every open slice and fire every window that has data.
    #[default]
    Flush,
    /// Drop open slices; only windows already closed by the watermark are emitted.
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub function: Aggregation,
    #[serde(default)]
    pub alias: Option<String>,
}

impl AggregateSpec {
    pub fn new(function: Aggregation) -> Self {
        Self {
            function,
            alias: None,
        }
    }

    pub fn with_alias(function: Aggregation, alias: impl Into<String>) -> Self {
        Self {
            function,
            alias: Some(alias.into()),
        }
    }

    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| self.function.default_alias())
    }
}

fn default_origins() -> Vec<u64> {
    vec![0]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowOperatorConfig {
    #[serde(default)]
    pub operator_id: u64,
    pub window_size_ms: u64,
    /// Defaults to the size (tumbling windows).
    #[serde(default)]
    pub window_slide_ms: Option<u64>,
    #[serde(default)]
    pub allowed_lateness_ms: u64,
    #[serde(default)]
    pub trigger: TriggerPolicy,
    /// Defaults to the cheapest action valid for the window shape.
    #[serde(default)]
    pub action: Option<ActionDescriptor>,
    pub timestamp_field: String,
    #[serde(default)]
    pub key_field: Option<String>,
    pub aggregates: Vec<AggregateSpec>,
    #[serde(default = "default_origins")]
    pub origins: Vec<u64>,
    #[serde(default)]
    pub emit_empty_windows: bool,
    #[serde(default)]
    pub shutdown: ShutdownPolicy,
}

impl WindowOperatorConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            WindowError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            other => Err(WindowError::Config(format!(
                "unsupported config extension {:?} for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Validate into a definition.
    pub fn build(self) -> Result<WindowDefinition> {
        WindowDefinition::from_config(self)
    }
}

type KeyFn = dyn Fn(&RowBatch, usize) -> Option<KeyValue> + Send + Sync;

/// How a record's grouping key is obtained.
#[derive(Clone)]
pub enum KeyExtractor {
    /// Value of the named column.
    Field(String),
    /// Arbitrary function of (batch, row). `None` is a buffer access error.
    Custom { name: String, extract: Arc<KeyFn> },
}

impl KeyExtractor {
    pub fn custom(
        name: impl Into<String>,
        extract: impl Fn(&RowBatch, usize) -> Option<KeyValue> + Send + Sync + 'static,
    ) -> Self {
        KeyExtractor::Custom {
            name: name.into(),
            extract: Arc::new(extract),
        }
    }

    /// Output column name for the key.
    pub fn name(&self) -> &str {
        match self {
            KeyExtractor::Field(f) => f,
            KeyExtractor::Custom { name, .. } => name,
        }
    }
}

impl fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyExtractor::Field(name) => f.debug_tuple("Field").field(name).finish(),
            KeyExtractor::Custom { name, .. } => f.debug_tuple("Custom").field(name).finish(),
        }
    }
}

/// A validated window operator definition.
#[derive(Debug, Clone)]
pub struct WindowDefinition {
    pub operator_id: OperatorId,
    pub assigner: WindowAssigner,
    pub allowed_lateness: WindowMeasure,
    pub trigger: TriggerPolicy,
    pub action: ActionDescriptor,
    pub timestamp_field: String,
    pub key: Option<KeyExtractor>,
    pub aggregates: Vec<AggregateSpec>,
    pub origins: Vec<OriginId>,
    pub emit_empty_windows: bool,
    pub shutdown: ShutdownPolicy,
}

impl WindowDefinition {
    pub fn from_config(cfg: WindowOperatorConfig) -> Result<Self> {
        let size = WindowMeasure::milliseconds(cfg.window_size_ms);
        let slide = WindowMeasure::milliseconds(cfg.window_slide_ms.unwrap_or(cfg.window_size_ms));
        let assigner = WindowAssigner::new(size, slide)?;
        let def = Self {
            operator_id: OperatorId::new(cfg.operator_id),
            assigner,
            allowed_lateness: WindowMeasure::milliseconds(cfg.allowed_lateness_ms),
            trigger: cfg.trigger,
            action: cfg
                .action
                .unwrap_or_else(|| ActionDescriptor::default_for(&assigner)),
            timestamp_field: cfg.timestamp_field,
            key: cfg.key_field.map(KeyExtractor::Field),
            aggregates: cfg.aggregates,
            origins: cfg.origins.into_iter().map(OriginId::new).collect(),
            emit_empty_windows: cfg.emit_empty_windows,
            shutdown: cfg.shutdown,
        };
        def.validate()?;
        Ok(def)
    }

    /// Replace the key extraction, e.g. with a custom function.
    pub fn with_key_extractor(mut self, key: KeyExtractor) -> Self {
        self.key = Some(key);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.trigger.validate()?;
        self.action.validate(&self.assigner)?;
        if self.timestamp_field.is_empty() {
            return Err(WindowError::Config("timestamp_field must be set".into()));
        }
        if self.aggregates.is_empty() {
            return Err(WindowError::Config("at least one aggregate is required".into()));
        }
        if self.origins.is_empty() {
            return Err(WindowError::Config("at least one origin is required".into()));
        }
        let mut seen = HashSet::with_capacity(self.origins.len());
        if let Some(dup) = self.origins.iter().find(|o| !seen.insert(**o)) {
            return Err(WindowError::Config(format!("{dup} listed twice in origins")));
        }
        self.output_schema()
            .check_unique_names()
            .map_err(|e| WindowError::Config(e.to_string()))?;
        Ok(())
    }

    pub fn is_keyed(&self) -> bool {
        self.key.is_some()
    }

    pub fn layout(&self) -> StateLayout {
        StateLayout::new(
            self.aggregates.iter().map(|a| a.function.clone()).collect(),
            self.is_keyed(),
        )
    }

    pub fn output_names(&self) -> Vec<String> {
        self.aggregates.iter().map(AggregateSpec::output_name).collect()
    }

    /// Schema of the result batches produced by `WindowResult::to_row_batch`.
    pub fn output_schema(&self) -> Schema {
        let mut fields = vec![
            Field::new("window_start", DataType::UInt64, false),
            Field::new("window_end", DataType::UInt64, false),
            Field::new("sequence_number", DataType::UInt64, false),
        ];
        if let Some(key) = &self.key {
            fields.push(Field::new(key.name(), DataType::Utf8, true));
        }
        for a in &self.aggregates {
            fields.push(Field::new(a.output_name(), a.function.output_type(), true));
        }
        Schema::new(fields)
    }
}
