pub use admission_policy_controller_core as core;
pub use admission_policy_controller_gatekeeper as gatekeeper;
pub use admission_policy_controller_k8s_api as k8s;
pub use admission_policy_controller_k8s_index as index;
pub use admission_policy_controller_k8s_store as store;
pub use admission_policy_controller_manager as manager;

mod admission;
mod args;

pub use self::args::Args;
