//! Attribute-driven splitting of one source file into cpu and gpu outputs.

pub mod attribute;
pub mod buffer;
pub mod driver;
pub mod kernel;
pub mod range;

pub use attribute::Restriction;
pub use buffer::{DualRewriter, EditBuffer, Target};
pub use driver::{SplitOutput, TranslationDriver};
pub use kernel::{KernelDescriptor, KernelHandle};
