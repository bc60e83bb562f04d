//! Domain types shared by the admission policy controller.
//!
//! Three resource kinds are managed:
//!
//! ```text
//! [ PolicyTemplate ] <- [ Policy ] <- [ Rule ]*
//!                           |
//!                           v
//!                     [ Provider ] -> constraint engine
//! ```
//!
//! A `Policy` instantiates one `PolicyTemplate` for one provider. Each `Rule` scopes its parent
//! policy to a set of namespaces. Activating either registers a constraint with the provider
//! through the [`ProviderRegistry`], which is assembled once at startup.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod api;
mod error;
pub mod provider;
pub mod query;
pub mod store;
pub mod validation;

pub use self::{
    error::{DeleteStep, Error, ErrorKind, Result},
    provider::{
        CompiledConstraint, ConstraintScope, Provider, ProviderError, ProviderRegistry,
    },
    query::{ListResult, Query},
};
pub use admission_policy_controller_k8s_api as k8s;
pub use k8s::State;
