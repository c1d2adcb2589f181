//! Declarative URL and content rewriting for API gateway pipelines.
//!
//! A descriptor of match-and-replace rules is compiled once and shared by all
//! requests. At request time the engine:
//!
//! - rewrites URLs matched by path templates such as `/webhdfs/v1/{path=**}`
//! - rewrites scalar nodes of XML and JSON bodies selected by node paths
//! - evaluates templates that substitute captured parameters and call named
//!   functions, e.g. resolving a logical service to its backend URL
//!
//! ## Descriptor Example
//!
//! ```yaml
//! rules:
//!   - name: "webhdfs"
//!     scope: url
//!     pattern: "/gateway/webhdfs/v1/{path=**}"
//!     template: "{$serviceUrl(NAMENODE)}/webhdfs/v1/{path}"
//!   - name: "oozie-config"
//!     direction: inbound
//!     scope: xml
//!     selector: "/configuration/property/value"
//!     value: "\\$(?P<service>[A-Z]+)"
//!     template: "{$serviceUrl({service})}"
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod function;
pub mod matcher;
pub mod rule;
pub mod template;
pub mod transformer;

pub use config::{DescriptorConfig, Direction, Scope, ServicesConfig};
pub use context::{EvaluationContext, Principal};
pub use engine::{load_descriptor, EngineError, EngineStats, Exchange, RewriteEngine};
pub use function::{
    Function, FunctionError, FunctionRegistry, ServiceDirectory, StaticServiceDirectory,
};
pub use rule::{Descriptor, RuleError};
pub use template::{EvalError, Template, TemplateError};
pub use transformer::{rewrite_body, rewrite_url, RewriteError, UrlOutcome};
