pub mod enums;
pub mod translation;

pub use enums::*;
pub use translation::*;
