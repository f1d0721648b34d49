pub mod price;
pub mod size;

pub use price::Price;
pub use size::Size;
