//! Resource graph construction and dependency resolution.

mod builder;
mod node;
mod resolver;

pub use builder::{GraphBuilder, ResourceGraph};
pub use node::{OutputMap, ResolvedAttrs, ResourceId, ResourceNode};
pub use resolver::DependencyResolver;
