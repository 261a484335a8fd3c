//! Source Layer
//!
//! A source is one query file. [`SourceEntry`] tracks the file's modification
//! time and the collector currently registered for it.
//!
//! - [`SourceEntry`]: modification check plus register/unregister/update lifecycle
//! - [`ModifiedStamp`]: mtime tracker shared with configuration reloads
//! - [`TemplateVars`]: placeholder substitution applied to query text

mod entry;
mod stamp;
mod template;

pub use entry::{SourceEntry, SourceError, source_name};
pub use stamp::ModifiedStamp;
pub use template::{REFRESH_RATE_SEC, TemplateVars, UNIX_START_TIME};
