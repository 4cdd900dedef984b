//! Route resolution: definitions, path templates, and the local snapshot.

mod definition;
mod resolver;
mod template;

pub use definition::{AuthKind, Backend, RouteDefinition, RouteStatus};
pub use resolver::{RouteMatch, RouteTable, spawn_reload_task};
pub use template::{PathTemplate, normalize_path, specificity_cmp};
