//! ClickHouse DDL/DCL statement AST, rendering and synthesis.
//!
//! Build statements as a typed AST (usually via [`Synthesizer`]), then render
//! them to SQL text with [`render`]. Rendering is deterministic: the same
//! statement always produces byte-identical text.
//!
//! Names, comments, passwords and queries are interpolated verbatim. Nothing
//! is escaped, so callers must not feed untrusted input through here.

use std::fmt;

mod render;
pub use render::*;

mod stmt;
pub use stmt::*;

mod synth;
pub use synth::*;

/// A ClickHouse string literal wrapper.
///
/// Display writes the value between single quotes, unescaped.
///
/// # Example
/// ```
/// use chdecl_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.0.as_ref())
    }
}

/// An optional ` ON CLUSTER name` clause, with its leading space.
///
/// # Example
/// ```
/// use chdecl_sql::OnCluster;
/// assert_eq!(format!("x{}", OnCluster(Some("c1"))), "x ON CLUSTER c1");
/// assert_eq!(format!("x{}", OnCluster(None)), "x");
/// ```
pub struct OnCluster<'a>(pub Option<&'a str>);

impl fmt::Display for OnCluster<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(cluster) if !cluster.is_empty() => write!(f, " ON CLUSTER {cluster}"),
            _ => Ok(()),
        }
    }
}

/// Comma-joined list, `sep` between items.
pub(crate) struct Joined<'a, T: fmt::Display>(pub &'a [T], pub &'a str);

impl<T: fmt::Display> fmt::Display for Joined<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(self.1)?;
            }
            write!(f, "{item}")?;
        }
        Ok(())
    }
}
