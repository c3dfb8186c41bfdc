//! 带有效期的进程内缓存
//!
//! 每个 key 对应一个槽位，同一个槽位的并发未命中只会触发一次填充，其余调用方等待这次填充的结果。
//! 过期后由下一个调用方同步重新填充，没有后台刷新，也没有主动失效。

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::config::CacheOptions;
use crate::db::Artwork;
use crate::listing::{ListingKey, Page};
use crate::metrics;

struct Slot<V> {
    cell: OnceCell<(V, Instant)>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self { cell: OnceCell::new() }
    }

    /// 未填充（包括正在填充）的槽位视为有效，避免重复填充
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.cell.get().is_none_or(|(_, at)| at.elapsed() < ttl)
    }
}

pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    slots: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self { name, ttl, slots: Mutex::new(HashMap::new()) }
    }

    /// 获取缓存值，未命中或已过期时调用 `init` 填充
    ///
    /// 填充失败时不会缓存错误，空槽位会被移除，下一个调用方会重新填充。
    pub async fn get_or_try_init<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key.clone());
        let populated = AtomicBool::new(false);
        let result = slot
            .cell
            .get_or_try_init(|| async {
                populated.store(true, Ordering::Relaxed);
                let value = init().await?;
                Ok::<_, E>((value, Instant::now()))
            })
            .await;
        let (value, _) = match result {
            Ok(entry) => entry,
            Err(e) => {
                self.remove_empty(&key, &slot);
                return Err(e);
            }
        };
        let outcome = if populated.load(Ordering::Relaxed) { "miss" } else { "hit" };
        metrics::inc_cache(self.name, outcome);
        Ok(value.clone())
    }

    /// 当前缓存的槽位数量
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 移除仍为空的槽位，已被其他调用方替换或填充的槽位保持不变
    fn remove_empty(&self, key: &K, slot: &Arc<Slot<V>>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let current = slots.get(key).is_some_and(|s| Arc::ptr_eq(s, slot));
        if current && slot.cell.get().is_none() {
            slots.remove(key);
        }
    }

    /// 取得 key 对应的有效槽位，过期则换成新的空槽位
    ///
    /// 锁只在查找和替换槽位时持有，填充过程不持有锁
    fn slot(&self, key: K) -> Arc<Slot<V>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(&key) {
            if slot.is_fresh(self.ttl) {
                return slot.clone();
            }
        }
        let ttl = self.ttl;
        slots.retain(|_, slot| slot.is_fresh(ttl));
        let slot = Arc::new(Slot::new());
        slots.insert(key, slot.clone());
        slot
    }
}

/// 全部向量的工作集，用于以图搜图
pub type EmbeddingSet = HashMap<i64, Vec<f32>>;

/// 进程级缓存服务，启动时创建一次并注入到各个调用方
pub struct CacheService {
    /// 向量工作集，填充需要扫描整个向量表
    pub embeddings: TtlCache<(), Arc<EmbeddingSet>>,
    /// 组合后的列表页
    pub listings: TtlCache<ListingKey, Arc<Page<Artwork>>>,
    /// 每个来源的精选推荐
    pub featured: TtlCache<(i64, usize), Arc<Vec<Artwork>>>,
}

impl CacheService {
    pub fn new(opts: &CacheOptions) -> Self {
        Self {
            embeddings: TtlCache::new("embeddings", Duration::from_secs(opts.embedding_ttl)),
            listings: TtlCache::new("listings", Duration::from_secs(opts.listing_ttl)),
            featured: TtlCache::new("featured", Duration::from_secs(opts.featured_ttl)),
        }
    }
}

impl Default for CacheService {
    fn default() -> Self {
        Self::new(&CacheOptions::default())
    }
}
