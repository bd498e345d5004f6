//! Configuration parsing, validation, and hashing.
//!
//! The declaration file (`stratus.yaml`) fully describes the desired
//! state; this module turns it into typed declarations ready for graph
//! construction.

mod hash;
mod parser;
pub mod spec;
mod validator;

pub use hash::SpecHasher;
pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES};
pub use spec::{
    ApplyConfig, AttrExpr, OutputRef, ProjectConfig, ReplaceStrategy, ResourceDecl, StateBackend,
    StateConfig, StratusConfig,
};
pub use validator::{ConfigValidator, ValidationIssue, ValidationResult};
