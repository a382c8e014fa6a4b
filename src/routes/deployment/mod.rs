mod create;
mod status;

pub use create::*;
pub use status::*;
