use admission_policy_controller_core::{
    api::{PostPolicy, Warning},
    k8s::{
        Parameters, Policy, PolicyContent, PolicyContentSpec, PolicyContentTarget, PolicySpec,
        PolicyTemplate, ResourceExt, Stateful,
    },
    validation::SchemaValidator,
    Error, Result,
};

/// A policy built from a template, with any warnings raised while building it.
#[derive(Clone, Debug)]
pub struct Translated {
    pub policy: Policy,
    pub warnings: Vec<Warning>,
}

/// Instantiates `template` for the provider and parameters requested by `post`.
///
/// Only the template's targets for the requested provider are carried into the policy. When
/// there are none the request fails with [`Error::TemplateProviderMismatch`], unless
/// `allow_empty` is set, in which case the policy is built without targets and a
/// [`Warning::NoMatchingTargets`] is returned.
pub fn build_policy(
    template: &PolicyTemplate,
    post: &PostPolicy,
    validator: &dyn SchemaValidator,
    allow_empty: bool,
) -> Result<Translated> {
    let template_name = template.name_any();
    let display_name = if post.name.is_empty() {
        template_name.clone()
    } else {
        post.name.clone()
    };

    let content = &template.spec.content;
    let targets = content
        .targets
        .iter()
        .filter(|t| t.provider == post.provider)
        .map(PolicyContentTarget::from)
        .collect::<Vec<_>>();

    let mut warnings = vec![];
    if targets.is_empty() {
        if !allow_empty {
            return Err(Error::TemplateProviderMismatch {
                template: template_name,
                provider: post.provider.clone(),
            });
        }
        warnings.push(Warning::NoMatchingTargets {
            template: template_name.clone(),
            provider: post.provider.clone(),
        });
    }

    let values = post.parameters.clone().filter(|v| !v.is_null());
    if let Some(values) = values.as_ref() {
        let schema = content
            .spec
            .parameters
            .validation
            .as_ref()
            .and_then(|v| v.open_api_v3_schema.as_ref());
        if let Some(schema) = schema {
            validator.validate(schema, values).map_err(Error::invalid)?;
        }
    }

    let description = if post.description.is_empty() {
        template.spec.description.clone()
    } else {
        post.description.clone()
    };

    let mut policy = Policy::new(
        &display_name.to_lowercase(),
        PolicySpec {
            name: display_name,
            policy_template: template_name,
            provider: post.provider.clone(),
            description,
            content: PolicyContent {
                spec: PolicyContentSpec {
                    names: content.spec.names.clone(),
                    parameters: Parameters {
                        validation: content.spec.parameters.validation.clone(),
                        values,
                    },
                },
                targets,
            },
        },
    );
    policy.set_state(post.state.unwrap_or_default());

    Ok(Translated { policy, warnings })
}
