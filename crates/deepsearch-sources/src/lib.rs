//! Source provenance for a research session.
//!
//! [`SourceRegistry`] owns the `url -> SourceRecord` mapping and hands out
//! stable short ids; [`render_citations`] checks an answer's inline `[n]`
//! markers against it.

mod citations;
mod registry;

pub use citations::{render_citations, CitationRender};
pub use registry::SourceRegistry;
