mod lifecycle;
mod logs;

pub use lifecycle::*;
pub use logs::*;
