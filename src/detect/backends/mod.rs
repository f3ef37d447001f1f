pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{ScriptedBackend, ScriptedCall};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
