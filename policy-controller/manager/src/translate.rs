//! Pure conversions from requests into resources.

mod policy;
mod rule;

pub use self::{
    policy::{build_policy, Translated},
    rule::build_rule,
};
