mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, DEFAULT_EDIT_MODEL};
pub use selectors::{ModelSelection, ModelSelector, SelectionError, EDIT_CAPABILITY};
