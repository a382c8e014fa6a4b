pub mod deploy_attempt;
pub mod deploy_step;
