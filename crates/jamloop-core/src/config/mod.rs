//! Engine configuration
//!
//! [`EngineConfig`] sizes every pre-allocated structure in the core (queues,
//! scratch buffers, effect/processor stacks, event pools) and sets the
//! musical defaults (crossfade length, permutation change rate, consensus
//! parameters). It is read once at startup; nothing here is touched by the
//! audio thread.
//!
//! ```ignore
//! use jamloop_core::config::{default_config_path, load_config, EngineConfig};
//!
//! let path = default_config_path("engine.yaml");
//! let config: EngineConfig = load_config(&path);
//! ```

mod engine;
mod io;
mod paths;

pub use engine::{EngineConfig, PermutationChangeRate};
pub use io::{load_config, load_engine_config, save_config};
pub use paths::{config_dir, default_config_path};
