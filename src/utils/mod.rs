//! 工具函数模块

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tracing_subscriber::EnvFilter;

use crate::error::{ClientError, Result};
use crate::interceptor::TRACE_ID_KEY;

/// 地址列表的内容哈希（先排序，与配置顺序无关）
pub fn hash_addresses(addresses: &[String]) -> String {
    let mut sorted: Vec<&str> = addresses.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = DefaultHasher::new();
    sorted.join("|").hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// 应用根目录：可执行文件所在目录，取不到时使用当前目录
pub fn app_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// 相对路径基于应用根目录解析
pub fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// 设置追踪 ID
pub fn set_trace_id(metadata: &mut MetadataMap, trace_id: &str) -> Result<()> {
    let value: AsciiMetadataValue = trace_id
        .parse()
        .map_err(|_| ClientError::configuration(format!("invalid trace id: {:?}", trace_id)))?;
    metadata.insert(TRACE_ID_KEY, value);
    Ok(())
}

/// 初始化 tracing 日志输出，`RUST_LOG` 优先于 `default_filter`
///
/// 重复初始化时静默忽略
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hash_ignores_order() {
        let a = vec!["10.0.0.2:9000".to_string(), "10.0.0.1:9000".to_string()];
        let b = vec!["10.0.0.1:9000".to_string(), "10.0.0.2:9000".to_string()];
        let c = vec!["10.0.0.3:9000".to_string()];
        assert_eq!(hash_addresses(&a), hash_addresses(&b));
        assert_ne!(hash_addresses(&a), hash_addresses(&c));
    }

    #[test]
    fn relative_paths_join_root() {
        let root = Path::new("/srv/app");
        assert_eq!(resolve_path(root, Path::new("certs/ca.pem")), PathBuf::from("/srv/app/certs/ca.pem"));
        assert_eq!(resolve_path(root, Path::new("/etc/ca.pem")), PathBuf::from("/etc/ca.pem"));
    }

    #[test]
    fn trace_id_must_be_ascii() {
        let mut metadata = MetadataMap::new();
        set_trace_id(&mut metadata, "abc-123").unwrap();
        assert_eq!(metadata.get(TRACE_ID_KEY).unwrap(), "abc-123");
        assert!(set_trace_id(&mut metadata, "bad\nid").is_err());
    }
}
