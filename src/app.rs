use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use migration_api::{create_app, AppState};
use migration_core::{
    config::{AppConfig, MigrationEndpointConfig, PagingMode},
    traits::MigrationQueue,
    MigrationResult,
};
use migration_dispatcher::{
    MigrationCoordinator, MigrationDefinition, MigrationRegistry, PagingStrategy,
};
use migration_infrastructure::{
    DatabaseManager, HttpMappingClient, HttpSourceAdapter, HttpTargetAdapter,
    MessageQueueFactory, TracingTelemetry,
};
use migration_worker::WorkerServiceBuilder;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅消费队列消息
    Worker,
    /// 仅提供管理API
    Api,
    All,
}

impl AppMode {
    pub fn parse(mode: &str, config: &AppConfig) -> Result<Self> {
        match mode {
            "worker" => {
                if !config.worker.enabled {
                    return Err(anyhow::anyhow!("Worker模式被禁用，请检查配置"));
                }
                Ok(AppMode::Worker)
            }
            "api" => {
                if !config.api.enabled {
                    return Err(anyhow::anyhow!("API模式被禁用，请检查配置"));
                }
                Ok(AppMode::Api)
            }
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
        }
    }

    fn runs_worker(&self, config: &AppConfig) -> bool {
        match self {
            AppMode::Worker => true,
            AppMode::Api => false,
            AppMode::All => config.worker.enabled,
        }
    }

    fn runs_api(&self, config: &AppConfig) -> bool {
        match self {
            AppMode::Api => true,
            AppMode::Worker => false,
            AppMode::All => config.api.enabled,
        }
    }
}

/// 根据配置中的端点为每个迁移类型注册 HTTP 适配器
pub fn build_registry(config: &AppConfig) -> MigrationResult<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();
    for endpoint in &config.migrations {
        registry.register(build_definition(
            endpoint,
            config.coordinator.default_page_size,
        )?);
    }
    Ok(registry)
}

fn build_definition(
    endpoint: &MigrationEndpointConfig,
    default_page_size: i64,
) -> MigrationResult<MigrationDefinition> {
    let timeout = Duration::from_secs(endpoint.request_timeout_seconds);
    let paging = match endpoint.paging {
        PagingMode::PageNumber => PagingStrategy::ByPageNumber {
            page_size: endpoint.page_size.unwrap_or(default_page_size),
        },
        PagingMode::Explicit => PagingStrategy::ByExplicitDivision,
    };

    Ok(MigrationDefinition::new(
        endpoint.migration_type,
        Arc::new(HttpSourceAdapter::new(&endpoint.source_url, timeout)?),
        Arc::new(HttpTargetAdapter::new(&endpoint.target_url, timeout)?),
        Arc::new(HttpMappingClient::new(&endpoint.mapping_url, timeout)?),
    )
    .with_paging(paging))
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    database: DatabaseManager,
    queue: Arc<dyn MigrationQueue>,
    coordinator: Arc<MigrationCoordinator>,
    metrics_handle: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(
        config: AppConfig,
        mode: AppMode,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("初始化迁移历史表失败")?;

        let registry = Arc::new(build_registry(&config).context("创建迁移插件失败")?);
        if registry.is_empty() {
            warn!("未配置任何迁移类型");
        }

        let queue = MessageQueueFactory::create(&config.message_queue, &registry.migration_types())
            .await
            .context("创建消息队列失败")?;

        let coordinator = Arc::new(MigrationCoordinator::new(
            registry,
            Arc::clone(&queue),
            database.history_repository(),
            Arc::new(TracingTelemetry::new()),
            &config.coordinator,
        ));

        Ok(Self {
            config,
            mode,
            database,
            queue,
            coordinator,
            metrics_handle,
        })
    }

    pub fn coordinator(&self) -> Arc<MigrationCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        let worker = self.mode.runs_worker(&self.config);
        let api = self.mode.runs_api(&self.config);

        match (worker, api) {
            (true, true) => {
                let worker_rx = shutdown_rx.resubscribe();
                let (worker_result, api_result) =
                    tokio::join!(self.run_worker(worker_rx), self.run_api(shutdown_rx));
                worker_result?;
                api_result?;
            }
            (true, false) => self.run_worker(shutdown_rx).await?,
            (false, true) => self.run_api(shutdown_rx).await?,
            (false, false) => warn!("Worker与API均未启用"),
        }

        self.database.close().await;
        info!("应用程序已停止");
        Ok(())
    }

    async fn run_worker(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let worker = WorkerServiceBuilder::new(Arc::clone(&self.queue), self.coordinator())
            .with_config(&self.config.worker)
            .build();
        info!(
            "启动Worker服务: {}，迁移类型: {:?}",
            worker.worker_id(),
            worker.migration_types()
        );

        worker.start().await?;

        let _ = shutdown_rx.recv().await;
        info!("Worker收到关闭信号");

        if let Err(e) = worker.stop().await {
            error!("停止Worker服务失败: {}", e);
        }
        info!("Worker服务已停止");
        Ok(())
    }

    async fn run_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut state = AppState::new(self.coordinator());
        if let Some(handle) = &self.metrics_handle {
            state = state.with_metrics(handle.clone());
        }
        let app = create_app(state, &self.config.api);

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .context("API服务器运行失败")?;

        info!("API服务器已停止");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration_core::models::MigrationType;

    const CONFIG: &str = r#"
[database]
url = "sqlite::memory:"

[message_queue]
type = "in_memory"

[coordinator]
default_page_size = 25

[[migrations]]
migration_type = "VISITS"
source_url = "http://localhost:9001/visits"
target_url = "http://localhost:9002/visits"
mapping_url = "http://localhost:9003/mapping/visits"

[[migrations]]
migration_type = "SENTENCING_ADJUSTMENTS"
source_url = "http://localhost:9001/adjustments"
target_url = "http://localhost:9002/adjustments"
mapping_url = "http://localhost:9003/mapping/adjustments"
paging = "explicit"
"#;

    #[test]
    fn test_build_registry_from_endpoints() {
        let config = AppConfig::from_toml(CONFIG).unwrap();
        let registry = build_registry(&config).unwrap();

        assert_eq!(
            registry.migration_types(),
            vec![MigrationType::SentencingAdjustments, MigrationType::Visits]
        );
        assert_eq!(
            registry.get(MigrationType::Visits).unwrap().paging,
            PagingStrategy::ByPageNumber { page_size: 25 }
        );
        assert_eq!(
            registry
                .get(MigrationType::SentencingAdjustments)
                .unwrap()
                .paging,
            PagingStrategy::ByExplicitDivision
        );
        assert!(registry.get(MigrationType::Alerts).is_err());
    }

    #[test]
    fn test_parse_mode() {
        let mut config = AppConfig::from_toml(CONFIG).unwrap();
        assert_eq!(AppMode::parse("all", &config).unwrap(), AppMode::All);
        assert_eq!(AppMode::parse("api", &config).unwrap(), AppMode::Api);
        assert!(AppMode::parse("dispatcher", &config).is_err());

        config.worker.enabled = false;
        assert!(AppMode::parse("worker", &config).is_err());
        assert!(!AppMode::All.runs_worker(&config));
        assert!(AppMode::All.runs_api(&config));
    }

    #[tokio::test]
    async fn test_application_wires_in_memory_stack() {
        let config = AppConfig::from_toml(CONFIG).unwrap();
        let app = Application::new(config, AppMode::Worker, None).await.unwrap();

        let runs = app
            .coordinator()
            .list(&Default::default())
            .await
            .unwrap();
        assert!(runs.is_empty());
    }
}
