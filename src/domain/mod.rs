//! Domain selection and effective configuration resolution.

pub mod effective;
pub mod resolver;

pub use effective::EffectiveConfig;
pub use resolver::{list_domains, resolve, resolve_global, select_domain, validate, Resolution};
