//! External collaborators: presentation export and PDF/A conformance.
//!
//! Both are blocking, time-bounded child processes. The pipeline only sees
//! the traits below, so tests substitute in-process implementations.

pub mod keynote;
pub mod pdfa;
pub mod process;

use std::path::Path;

use crate::error::ExportFailure;

pub use keynote::KeynoteExporter;
pub use pdfa::GhostscriptConformer;

/// Produces the initial paginated document from a source file.
///
/// On `Ok(())` the caller still verifies that `dest` exists; a tool that
/// claims success without writing anything is reported as
/// [`ExportFailure::NoOutput`].
pub trait Exporter: Send + Sync {
    fn export(&self, source: &Path, dest: &Path) -> Result<(), ExportFailure>;
}

/// Rewrites a finished document into a PDF/A conformant one.
pub trait Conformer: Send + Sync {
    fn to_conformant(&self, input: &Path, output: &Path) -> crate::error::Result<()>;
}
