use crate::EnforcementAction;
use admission_policy_controller_core::{
    k8s::PolicyContent, CompiledConstraint, ConstraintScope, ProviderError,
};
use kube::core::{ApiResource, GroupVersionKind};
use serde_json::{json, Map, Value};

pub const TEMPLATE_GROUP: &str = "templates.gatekeeper.sh";
pub const TEMPLATE_VERSION: &str = "v1";
pub const TEMPLATE_KIND: &str = "ConstraintTemplate";

pub const CONSTRAINT_GROUP: &str = "constraints.gatekeeper.sh";
pub const CONSTRAINT_VERSION: &str = "v1beta1";

/// Compiles policy content into a `ConstraintTemplate`.
pub fn compile(content: &PolicyContent) -> Result<CompiledConstraint, ProviderError> {
    let kind = content.spec.names.name.trim();
    if kind.is_empty() {
        return Err(invalid("policy content does not name a constraint kind"));
    }
    if content.targets.is_empty() {
        return Err(invalid(format_args!(
            "policy content for {kind} has no targets"
        )));
    }

    let mut names = Map::new();
    names.insert("kind".to_string(), kind.into());
    if !content.spec.names.short_names.is_empty() {
        names.insert(
            "shortNames".to_string(),
            content.spec.names.short_names.clone().into(),
        );
    }

    let mut crd = Map::new();
    crd.insert("names".to_string(), names.into());
    if let Some(validation) = content.spec.parameters.validation.as_ref() {
        let validation = serde_json::to_value(validation)
            .map_err(|e| ProviderError::Invalid(e.into()))?;
        crd.insert("validation".to_string(), validation);
    }

    let targets = content
        .targets
        .iter()
        .map(|t| {
            let mut target = json!({
                "target": t.target,
                "rego": t.expression,
            });
            if !t.import.is_empty() {
                target["libs"] = t.import.clone().into();
            }
            target
        })
        .collect::<Vec<_>>();

    Ok(CompiledConstraint {
        kind: kind.to_string(),
        template: json!({
            "apiVersion": format!("{TEMPLATE_GROUP}/{TEMPLATE_VERSION}"),
            "kind": TEMPLATE_KIND,
            "metadata": { "name": kind.to_lowercase() },
            "spec": {
                "crd": { "spec": crd },
                "targets": targets,
            },
        }),
    })
}

/// Builds the constraint instance registered for `scope`.
pub fn constraint(scope: &ConstraintScope, action: EnforcementAction) -> Value {
    let mut spec = Map::new();
    spec.insert("enforcementAction".to_string(), action.as_str().into());
    if !scope.namespaces.is_empty() {
        spec.insert("match".to_string(), json!({ "namespaces": scope.namespaces }));
    }
    if let Some(parameters) = scope.parameters.as_ref().filter(|p| !p.is_null()) {
        spec.insert("parameters".to_string(), parameters.clone());
    }

    json!({
        "apiVersion": format!("{CONSTRAINT_GROUP}/{CONSTRAINT_VERSION}"),
        "kind": scope.kind,
        "metadata": { "name": scope.name() },
        "spec": spec,
    })
}

pub fn template_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        TEMPLATE_GROUP,
        TEMPLATE_VERSION,
        TEMPLATE_KIND,
    ))
}

/// Gatekeeper names each constraint CRD's plural after the lowercased kind.
pub fn constraint_resource(kind: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(CONSTRAINT_GROUP, CONSTRAINT_VERSION, kind),
        &kind.to_lowercase(),
    )
}

fn invalid(msg: impl std::fmt::Display) -> ProviderError {
    ProviderError::Invalid(anyhow::anyhow!("{msg}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use admission_policy_controller_core::k8s::{
        Names, Parameters, PolicyContentSpec, PolicyContentTarget, Validation,
    };
    use pretty_assertions::assert_eq;

    fn content() -> PolicyContent {
        PolicyContent {
            spec: PolicyContentSpec {
                names: Names {
                    name: "K8sRequiredLabels".to_string(),
                    short_names: vec![],
                },
                parameters: Parameters {
                    validation: Some(Validation {
                        open_api_v3_schema: Some(json!({
                            "type": "object",
                            "properties": { "labels": { "type": "array" } },
                        })),
                        legacy_schema: None,
                    }),
                    values: None,
                },
            },
            targets: vec![PolicyContentTarget {
                target: "admission.k8s.gatekeeper.sh".to_string(),
                expression: "package k8srequiredlabels".to_string(),
                import: vec!["package lib.helpers".to_string()],
            }],
        }
    }

    #[test]
    fn compiles_constraint_template() {
        let compiled = compile(&content()).unwrap();
        assert_eq!(compiled.kind, "K8sRequiredLabels");
        assert_eq!(
            compiled.template,
            json!({
                "apiVersion": "templates.gatekeeper.sh/v1",
                "kind": "ConstraintTemplate",
                "metadata": { "name": "k8srequiredlabels" },
                "spec": {
                    "crd": {
                        "spec": {
                            "names": { "kind": "K8sRequiredLabels" },
                            "validation": {
                                "openAPIV3Schema": {
                                    "type": "object",
                                    "properties": { "labels": { "type": "array" } },
                                },
                            },
                        },
                    },
                    "targets": [{
                        "target": "admission.k8s.gatekeeper.sh",
                        "rego": "package k8srequiredlabels",
                        "libs": ["package lib.helpers"],
                    }],
                },
            })
        );
    }

    #[test]
    fn rejects_incomplete_content() {
        let mut unnamed = content();
        unnamed.spec.names.name = String::new();
        assert!(matches!(compile(&unnamed), Err(ProviderError::Invalid(_))));

        let mut untargeted = content();
        untargeted.targets.clear();
        assert!(matches!(compile(&untargeted), Err(ProviderError::Invalid(_))));
    }

    #[test]
    fn rule_constraints_are_scoped() {
        let scope = ConstraintScope::rule("K8sRequiredLabels", "np-1", "r-ns-prod")
            .with_namespaces(vec!["prod".to_string()])
            .with_parameters(Some(json!({ "labels": ["owner"] })));
        assert_eq!(
            constraint(&scope, EnforcementAction::Deny),
            json!({
                "apiVersion": "constraints.gatekeeper.sh/v1beta1",
                "kind": "K8sRequiredLabels",
                "metadata": { "name": "np-1.r-ns-prod" },
                "spec": {
                    "enforcementAction": "deny",
                    "match": { "namespaces": ["prod"] },
                    "parameters": { "labels": ["owner"] },
                },
            })
        );
    }

    #[test]
    fn policy_constraints_are_cluster_wide() {
        let scope = ConstraintScope::policy("K8sRequiredLabels", "NP-1");
        assert_eq!(
            constraint(&scope, EnforcementAction::Dryrun),
            json!({
                "apiVersion": "constraints.gatekeeper.sh/v1beta1",
                "kind": "K8sRequiredLabels",
                "metadata": { "name": "np-1" },
                "spec": { "enforcementAction": "dryrun" },
            })
        );
    }

    #[test]
    fn constraint_plural_is_the_lowercased_kind() {
        assert_eq!(
            constraint_resource("K8sRequiredLabels").plural,
            "k8srequiredlabels"
        );
        assert_eq!(template_resource().plural, "constrainttemplates");
    }
}
