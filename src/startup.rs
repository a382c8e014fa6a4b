use crate::configuration::{DeployerSettings, Settings};
use crate::deploy::DeploymentOrchestrator;
use crate::helpers::JsonResponse;
use crate::ledger::{PgStepLedger, StepLedger};
use crate::remote::{ConnectionModeFactory, ExecutorFactory};
use crate::routes;
use crate::services::{AccessPolicy, CatalogAccessPolicy, ConfigResolver, LogTailer, StaticCatalog};
use actix_cors::Cors;
use actix_web::{dev::Server, error, web, App, HttpServer};
use sqlx::{Pool, Postgres};
use std::net::TcpListener;
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

/// Shared state handed to every worker.
#[derive(Clone)]
pub struct AppServices {
    orchestrator: web::Data<DeploymentOrchestrator>,
    ledger: web::Data<Arc<dyn StepLedger>>,
    access: web::Data<Arc<dyn AccessPolicy>>,
    tailer: web::Data<LogTailer>,
    settings: web::Data<DeployerSettings>,
}

impl AppServices {
    pub fn new(
        catalog: Arc<dyn ConfigResolver>,
        ledger: Arc<dyn StepLedger>,
        executors: Arc<dyn ExecutorFactory>,
        settings: DeployerSettings,
    ) -> Self {
        let access: Arc<dyn AccessPolicy> = Arc::new(CatalogAccessPolicy::new(catalog.clone()));
        let orchestrator = DeploymentOrchestrator::new(
            catalog.clone(),
            ledger.clone(),
            executors.clone(),
            settings.clone(),
        );
        Self {
            orchestrator: web::Data::new(orchestrator),
            ledger: web::Data::new(ledger),
            access: web::Data::new(access),
            tailer: web::Data::new(LogTailer::new(catalog, executors)),
            settings: web::Data::new(settings),
        }
    }

    /// Registers state, the JSON error handler and all routes.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        let json_config = web::JsonConfig::default().error_handler(|err, _req| {
            let message = match &err {
                error::JsonPayloadError::Deserialize(err) => format!(
                    "Invalid JSON at line {}, column {}: {}",
                    err.line(),
                    err.column(),
                    err
                ),
                _ => err.to_string(),
            };
            JsonResponse::<()>::build().bad_request(message)
        });

        cfg.app_data(json_config)
            .app_data(self.orchestrator.clone())
            .app_data(self.ledger.clone())
            .app_data(self.access.clone())
            .app_data(self.tailer.clone())
            .app_data(self.settings.clone())
            .configure(routes::configure);
    }
}

pub async fn run(
    listener: TcpListener,
    pg_pool: Pool<Postgres>,
    settings: Settings,
) -> Result<Server, std::io::Error> {
    if settings.deployer.upload_dir.is_none() {
        tracing::warn!("deployer.upload_dir is not set, deploys accept any readable local path");
    }
    let catalog: Arc<dyn ConfigResolver> = Arc::new(StaticCatalog::new(settings.catalog));
    let ledger: Arc<dyn StepLedger> = Arc::new(PgStepLedger::new(pg_pool));
    let executors: Arc<dyn ExecutorFactory> = Arc::new(ConnectionModeFactory::new(
        settings.deployer.executor_options(),
    ));
    let services = AppServices::new(catalog, ledger, executors, settings.deployer);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Cors::permissive())
            .configure(|cfg| services.configure(cfg))
    })
    .listen(listener)?
    .run();

    Ok(server)
}
