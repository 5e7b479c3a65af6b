//! 按键去重的异步缓存
//!
//! 全局 map 只在查找/插入条目时短暂加锁，真正的初始化（拨号、首次解析）
//! 在每个键自己的 `OnceCell` 上串行，不同键之间互不阻塞。
//! 初始化失败不会缓存，下一个调用方会重新初始化。

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct KeyedCache<K, V> {
    entries: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// 获取键对应的值，不存在时用 `init` 创建
    ///
    /// 同一个键的并发首次调用只会执行一次 `init`，其余调用方等待并复用结果
    pub async fn get_or_try_init<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self.entries.entry(key).or_default().value().clone();

        if let Some(value) = cell.get() {
            return Ok(value.clone());
        }

        cell.get_or_try_init(init).await.cloned()
    }

    /// 已初始化的值
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .get(key)
            .and_then(|entry| entry.value().get().cloned())
    }

    /// 在条目读锁内对已初始化的值执行 `f`
    pub fn with_value<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        let entry = self.entries.get(key)?;
        entry.value().get().map(f)
    }

    /// 在条目写锁内判断是否移除，只会移除已初始化的条目
    pub fn remove_if(&self, key: &K, f: impl FnOnce(&V) -> bool) -> Option<V> {
        self.entries
            .remove_if(key, |_, cell| cell.get().map(f).unwrap_or(false))
            .and_then(|(_, cell)| cell.get().cloned())
    }

    /// 移除并返回所有已初始化的值，仍在初始化中的条目保留
    pub fn drain(&self) -> Vec<V> {
        let keys: Vec<K> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| {
                self.entries
                    .remove_if(&key, |_, cell| cell.initialized())
                    .and_then(|(_, cell)| cell.get().cloned())
            })
            .collect()
    }

    /// 所有已初始化的值
    pub fn values(&self) -> Vec<V> {
        self.entries
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    /// 已初始化的条目数量
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for KeyedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
