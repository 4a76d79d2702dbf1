pub mod cube;
pub mod integration;
pub mod time;

pub use cube::*;
pub use integration::*;
pub use time::*;
