pub(crate) mod deployment;
pub mod health_checks;
pub(crate) mod module;

pub use health_checks::*;

use actix_web::web;

/// Mounts every endpoint. Shared state is registered by the caller.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/health_check").service(health_check))
        .service(
            web::scope("/api/v1")
                .service(
                    web::scope("/deployments")
                        .service(deployment::create_handler)
                        .service(deployment::active_handler)
                        .service(deployment::item_handler),
                )
                .service(
                    web::scope("/modules")
                        .service(module::restart_handler)
                        .service(module::stop_handler)
                        .service(module::logs_handler),
                ),
        );
}
