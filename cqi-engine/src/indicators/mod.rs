//! Indicator templates: catalog, sources, registry and parameter binding

pub mod binder;
pub mod catalog;
pub mod registry;
pub mod source;

pub use binder::{bind, ParamValue, ParameterSet, TemplateStyle};
pub use catalog::{builtin_definitions, IndicatorDefinition};
pub use registry::TemplateRegistry;
pub use source::{FileTemplateSource, MemoryTemplateSource, TemplateSource};
