//! Regenerates portable source text from a compiled module.
//!
//! A [`session::RegenerationSession`] resolves the target, builds a pass
//! pipeline through the process-wide [`registry::Environment`] and runs it;
//! the final pass is the source writer in [`cwriter`].

pub mod cwriter;
pub mod ir;
pub mod passes;
pub mod reader;
pub mod registry;
pub mod session;
pub mod target;

pub use ir::Module;
pub use reader::read_module;
pub use registry::Environment;
pub use session::{regenerate, RegenerationSession, SessionState};
