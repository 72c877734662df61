//! Workflow templates and the template registry.
//!
//! A template is data, not code: an ordered list of stage descriptors with
//! dependencies, a parallel-allowed flag and default config. The registry
//! validates each template's dependency graph at registration time and is
//! read-only once the orchestrator is built.
//!
//! Four templates ship by default, mirroring the product pipeline:
//! `complete_dropshipping`, `sourcing_only`, `processing_only` and
//! `registration_only`.

mod builder;

pub use builder::{StageGraph, StageIndex};

use crate::errors::WorkflowError;
use crate::model::StageKind;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Descriptor for one stage of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub kind: StageKind,
    /// Names of stages that must complete before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Whether per-item work inside this stage may fan out in parallel.
    #[serde(default)]
    pub parallel: bool,
    /// Continue (skipping this stage) when a predecessor failed.
    #[serde(default)]
    pub on_failure_skip: bool,
    /// Stage defaults, merged under run config at execution time.
    #[serde(default = "empty_object")]
    pub default_config: Value,
}

fn empty_object() -> Value {
    json!({})
}

impl StageSpec {
    pub fn new(name: impl Into<String>, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            kind,
            depends_on: Vec::new(),
            parallel: false,
            on_failure_skip: false,
            default_config: json!({}),
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_on_failure_skip(mut self, skip: bool) -> Self {
        self.on_failure_skip = skip;
        self
    }

    pub fn with_default_config(mut self, config: Value) -> Self {
        self.default_config = config;
        self
    }
}

/// An immutable, validated workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    pub stages: Vec<StageSpec>,
}

impl WorkflowTemplate {
    /// Validate the stage graph and create the template.
    pub fn new(name: impl Into<String>, stages: Vec<StageSpec>) -> Result<Self, WorkflowError> {
        StageGraph::build(&stages)?;
        Ok(Self {
            name: name.into(),
            stages,
        })
    }

    /// Build the validated dependency graph for this template.
    ///
    /// Construction already validated it, so this cannot fail for a
    /// template obtained through `new`.
    pub fn graph(&self) -> Result<StageGraph, WorkflowError> {
        StageGraph::build(&self.stages)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Registry of workflow templates. Written during initialisation, read-only
/// afterwards.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, WorkflowTemplate>,
}

impl TemplateRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in pipeline templates.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for template in default_templates() {
            registry
                .register(template)
                .expect("built-in templates are valid");
        }
        registry
    }

    /// Register a template. The stage graph was validated at template
    /// construction; registration only rejects name collisions.
    pub fn register(&mut self, template: WorkflowTemplate) -> Result<(), WorkflowError> {
        if self.templates.contains_key(&template.name) {
            return Err(WorkflowError::DuplicateTemplate {
                name: template.name,
            });
        }
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowTemplate> {
        self.templates.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }
}

/// The built-in templates shipped with the pipeline.
pub fn default_templates() -> Vec<WorkflowTemplate> {
    let complete = WorkflowTemplate::new(
        "complete_dropshipping",
        vec![
            StageSpec::new("data_preparation", StageKind::Preparation)
                .with_default_config(json!({"validate_items": true, "check_inventory": true})),
            StageSpec::new("ai_sourcing", StageKind::Sourcing)
                .with_dependencies(vec!["data_preparation".into()])
                .with_default_config(json!({"score_threshold": 7.0})),
            StageSpec::new("product_processing", StageKind::Processing)
                .with_dependencies(vec!["ai_sourcing".into()])
                .with_default_config(
                    json!({"generate_names": true, "process_images": true, "optimize_content": true}),
                ),
            StageSpec::new("multi_platform_registration", StageKind::Registration)
                .with_dependencies(vec!["product_processing".into()])
                .with_parallel(true)
                .with_default_config(json!({"platforms": ["coupang", "naver", "11st"]})),
            StageSpec::new("post_registration_monitoring", StageKind::Monitoring)
                .with_dependencies(vec!["multi_platform_registration".into()])
                .with_default_config(json!({"check_status": true})),
            StageSpec::new("performance_analysis", StageKind::Analysis)
                .with_dependencies(vec!["post_registration_monitoring".into()]),
        ],
    )
    .expect("complete_dropshipping template is valid");

    let sourcing = WorkflowTemplate::new(
        "sourcing_only",
        vec![
            StageSpec::new("data_preparation", StageKind::Preparation)
                .with_default_config(json!({"validate_items": true})),
            StageSpec::new("ai_sourcing", StageKind::Sourcing)
                .with_dependencies(vec!["data_preparation".into()])
                .with_default_config(json!({"score_threshold": 7.0, "detailed_analysis": true})),
            StageSpec::new("sourcing_analysis", StageKind::Analysis)
                .with_dependencies(vec!["ai_sourcing".into()]),
        ],
    )
    .expect("sourcing_only template is valid");

    let processing = WorkflowTemplate::new(
        "processing_only",
        vec![
            StageSpec::new("product_processing", StageKind::Processing)
                .with_default_config(json!({"generate_names": true, "process_images": true})),
            StageSpec::new("quality_validation", StageKind::Validation)
                .with_dependencies(vec!["product_processing".into()])
                .with_default_config(json!({"score_threshold": 8.0})),
        ],
    )
    .expect("processing_only template is valid");

    let registration = WorkflowTemplate::new(
        "registration_only",
        vec![
            StageSpec::new("pre_registration_check", StageKind::Validation),
            StageSpec::new("multi_platform_registration", StageKind::Registration)
                .with_dependencies(vec!["pre_registration_check".into()])
                .with_parallel(true)
                .with_default_config(json!({"retry_failures": true})),
            StageSpec::new("registration_validation", StageKind::Validation)
                .with_dependencies(vec!["multi_platform_registration".into()])
                .with_default_config(json!({"check_all_platforms": true})),
        ],
    )
    .expect("registration_only template is valid");

    vec![complete, sourcing, processing, registration]
}

/// Merge config layers: template stage defaults, then run config, then
/// per-stage run config. Later layers win on key conflicts; only top-level
/// object keys are merged.
pub fn merge_config(stage_defaults: &Value, run_config: &Value, stage_config: &Value) -> Value {
    let mut merged = serde_json::Map::new();
    for layer in [stage_defaults, run_config, stage_config] {
        if let Value::Object(map) = layer {
            for (k, v) in map {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_templates_register_cleanly() {
        let registry = TemplateRegistry::with_defaults();
        assert_eq!(
            registry.names(),
            vec![
                "complete_dropshipping",
                "processing_only",
                "registration_only",
                "sourcing_only"
            ]
        );
        let complete = registry.get("complete_dropshipping").unwrap();
        assert_eq!(complete.stage_count(), 6);
        assert!(complete.stages[3].parallel);
    }

    #[test]
    fn template_rejects_cyclic_stages() {
        let result = WorkflowTemplate::new(
            "bad",
            vec![
                StageSpec::new("a", StageKind::Validation)
                    .with_dependencies(vec!["b".into()]),
                StageSpec::new("b", StageKind::Validation)
                    .with_dependencies(vec!["a".into()]),
            ],
        );
        assert!(matches!(result, Err(WorkflowError::DependencyCycle { .. })));
    }

    #[test]
    fn registry_rejects_name_collision() {
        let mut registry = TemplateRegistry::with_defaults();
        let duplicate = WorkflowTemplate::new(
            "registration_only",
            vec![StageSpec::new("only", StageKind::Validation)],
        )
        .unwrap();
        assert!(registry.register(duplicate).is_err());
    }

    #[test]
    fn merge_config_later_layers_win() {
        let merged = merge_config(
            &json!({"a": 1, "b": 1}),
            &json!({"b": 2, "c": 2}),
            &json!({"c": 3}),
        );
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
        assert_eq!(merged["c"], 3);
    }

    #[test]
    fn merge_config_ignores_non_object_layers() {
        let merged = merge_config(&json!({"a": 1}), &Value::Null, &json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }
}
