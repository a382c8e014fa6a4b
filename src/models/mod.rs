mod deploy_attempt;
mod deploy_step;
mod environment;
mod module;
mod request;

pub use deploy_attempt::*;
pub use deploy_step::*;
pub use environment::*;
pub use module::*;
pub use request::*;
