//! Save-time validation of workflow definitions.

use crate::definition::Workflow;
use crate::error::ValidationError;
use crate::registry::StepRegistry;
use crate::rich_text::RichTextBlock;
use crate::spec::{DataType, StepSpec};
use crate::template::{self, TRIGGER_NAMESPACE, Token};
use std::collections::{BTreeMap, HashSet};

/// Checks a workflow against the step registry.
///
/// Returns every problem found; an empty list means the workflow can be
/// saved. Output references must point at the `trigger` namespace or at a
/// declared output of an earlier step.
#[must_use]
pub fn validate_workflow(workflow: &Workflow, registry: &StepRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut earlier: BTreeMap<&str, &StepSpec> = BTreeMap::new();

    for step in &workflow.steps {
        if !seen.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStepId {
                step_id: step.id.clone(),
            });
        }

        let Some(registered) = registry.get(&step.type_id) else {
            errors.push(ValidationError::UnknownStepType {
                step_id: step.id.clone(),
                type_id: step.type_id.clone(),
            });
            continue;
        };
        let spec = &registered.spec;

        for (key, io) in &spec.inputs {
            let raw = step.input(key);
            if raw.trim().is_empty() {
                if io.required {
                    errors.push(ValidationError::MissingRequiredInput {
                        step_id: step.id.clone(),
                        input: key.clone(),
                    });
                }
                continue;
            }

            if io.data_type == DataType::RichText
                && serde_json::from_str::<RichTextBlock>(raw).is_err()
            {
                errors.push(ValidationError::MalformedRichText {
                    step_id: step.id.clone(),
                    input: key.clone(),
                });
            }

            for (wire, token) in template::scan_tokens(raw) {
                if !reference_resolves(token.as_ref(), &earlier) {
                    errors.push(ValidationError::UnknownReference {
                        step_id: step.id.clone(),
                        input: key.clone(),
                        token: wire,
                    });
                }
            }
        }

        earlier.insert(step.id.as_str(), spec);
    }

    errors
}

fn reference_resolves(token: Option<&Token>, earlier: &BTreeMap<&str, &StepSpec>) -> bool {
    match token {
        None => false,
        Some(Token::TriggerUserId | Token::TriggerUserPing) => true,
        Some(Token::Output(key)) => {
            let Some((step_id, output)) = key.split_once('.') else {
                return false;
            };
            step_id == TRIGGER_NAMESPACE
                || earlier.get(step_id).is_some_and(|spec| spec.produces(output))
        }
    }
}
