pub mod mask;
pub mod mixture;
pub mod traits;

pub use mixture::{MixtureBackground, MixtureParams};
pub use traits::ForegroundFilter;
