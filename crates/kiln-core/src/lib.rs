pub mod config;
pub mod error;
pub mod expression;
pub mod globals;
pub mod params;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{KilnError, Result};
pub use globals::{GlobalTable, GlobalValue};
pub use params::{ParamType, ParamValue, Parameter, ParameterStore, TypedValue};
pub use types::*;
