mod error;
mod resolver;
mod source;

pub use error::ResolveError;
pub use resolver::{Resolver, StandardResolver, validate};
pub use source::{DefinitionSource, FsDefinitionSource, MemoryDefinitionSource};
