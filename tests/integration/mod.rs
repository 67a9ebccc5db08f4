//! Cross-module integration tests driving the public API end to end:
//! pattern compilation through matching, template rendering, substitution
//! application, rule catalogs, and on-disk rewrites.

mod patterns;
mod pipeline;
mod properties;
