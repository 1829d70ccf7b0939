pub mod error;
pub mod side_effect;

pub use error::{AppError, Result};
pub use side_effect::non_critical;
