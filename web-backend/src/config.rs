use std::path::PathBuf;

/// 服务端配置，全部来自环境变量（.env 已在 main 中加载）
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub bind_address: String,
    pub policy_catalog: Option<PathBuf>,
    pub static_dir: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let get = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        Self {
            db_path: get("COMPLIANCE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("compliance_memory.db")),
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            policy_catalog: get("POLICY_CATALOG").map(PathBuf::from),
            static_dir: get("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./dist")),
        }
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }
}
