pub mod error;
pub mod bindings;
pub mod expression;
pub mod var_range;
pub mod template;
pub mod expander;

// Scene model
pub mod geometry;
pub mod ray;
pub mod objects;
pub mod module_def;
pub mod module_instance;
pub mod scene_object;
pub mod registry;
pub mod scene;
pub mod diagnostics;

pub mod cli;

pub use error::{ExpansionError, SceneError};
pub use module_def::ModuleDefinition;
pub use module_instance::ModuleInstance;
pub use scene::{Scene, SceneDocument};
pub use scene_object::SceneObject;
