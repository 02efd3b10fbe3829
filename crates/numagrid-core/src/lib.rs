pub mod config;
pub mod cpuset;
pub mod types;

pub use config::{EffectivePinning, MatcherKind, NumagridConfig};
pub use cpuset::{format_cpu_spec, parse_cpu_spec};
pub use types::*;
