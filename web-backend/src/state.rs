use compliance_core::{ChannelConfig, Channels, ComplianceService};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub service: ComplianceService,
}

impl AppState {
    pub async fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        // 初始化数据库
        let pool = compliance_core::connect(&config.database_url())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open database {}: {}", config.db_path.display(), e))?;

        // 外部通道：缺少凭据的通道会被跳过，不阻塞派发
        let channels = Channels::from_config(&ChannelConfig::from_env());
        let service = ComplianceService::new(pool, channels);

        // 导入策略目录
        if let Some(catalog) = &config.policy_catalog {
            let inserted = service
                .ledger()
                .load_catalog_file(catalog)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to load policy catalog: {}", e))?;
            tracing::info!("Policy catalog {} loaded ({} new controls)", catalog.display(), inserted);
        }

        Ok(Self::from_service(service))
    }

    pub fn from_service(service: ComplianceService) -> Self {
        Self { service }
    }
}
