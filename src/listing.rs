//! 分页列表、随机推荐与精选
//!
//! 一个分页会话只能使用一种模式：游标模式按插入顺序稳定扫描，偏移模式用于重新排序或随机化的结果。
//! 下一页的分页参数总是由本页的请求推导出来，因此不会在会话中途切换模式。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::cache::CacheService;
use crate::db::{Artwork, Database, RandomFilter, SourceFilter, crud};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PageRequest {
    /// 返回 ID 大于 `after_id` 的记录
    Cursor { after_id: i64 },
    /// 跳过前 `offset` 条记录
    Offset { offset: usize },
}

impl PageRequest {
    /// 从查询参数构建分页请求，游标和偏移量不能同时出现
    ///
    /// 两者都没有时从头开始游标扫描
    pub fn from_query(cursor: Option<i64>, offset: Option<usize>) -> Result<Self> {
        match (cursor, offset) {
            (Some(_), Some(_)) => {
                Err(Error::InvalidPaging("cursor 和 offset 不能同时使用".to_string()))
            }
            (Some(after_id), None) => Ok(Self::Cursor { after_id }),
            (None, Some(offset)) => Ok(Self::Offset { offset }),
            (None, None) => Ok(Self::Cursor { after_id: 0 }),
        }
    }

    /// 根据本页返回的记录计算下一页，模式与本页相同；不满一页说明已经没有更多记录
    pub fn advance(&self, returned: usize, last_id: Option<i64>, limit: usize) -> Option<Self> {
        if returned == 0 || returned < limit {
            return None;
        }
        match *self {
            Self::Cursor { after_id } => Some(Self::Cursor { after_id: last_id.unwrap_or(after_id) }),
            Self::Offset { offset } => Some(Self::Offset { offset: offset.saturating_add(returned) }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 下一页的分页参数，为空表示没有更多记录
    pub next: Option<PageRequest>,
}

impl Page<Artwork> {
    pub fn new(request: PageRequest, items: Vec<Artwork>, limit: usize) -> Self {
        let next = request.advance(items.len(), items.last().map(|a| a.id), limit);
        Self { items, next }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListingKey {
    pub filter: SourceFilter,
    pub page: PageRequest,
    pub limit: usize,
}

/// 用种子打乱 ID 后取出 `[offset, offset + limit)`，相同的种子总是得到相同的结果
pub fn seeded_sample(mut ids: Vec<i64>, seed: u64, offset: usize, limit: usize) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(seed);
    ids.shuffle(&mut rng);
    ids.into_iter().skip(offset).take(limit).collect()
}

/// 每分钟变化一次的随机种子，同一分钟内相同过滤条件的请求得到相同结果，便于缓存
pub fn minute_seed<T: Hash>(now: SystemTime, salt: &T) -> u64 {
    let minute = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() / 60;
    let mut hasher = DefaultHasher::new();
    salt.hash(&mut hasher);
    minute.hash(&mut hasher);
    hasher.finish()
}

pub struct Listings {
    db: Database,
    cache: Arc<CacheService>,
}

impl Listings {
    pub fn new(db: Database, cache: Arc<CacheService>) -> Self {
        Self { db, cache }
    }

    /// 分页列出藏品，结果在列表缓存中保存一段时间
    pub async fn list(
        &self,
        filter: SourceFilter,
        page: PageRequest,
        limit: usize,
    ) -> Result<Arc<Page<Artwork>>> {
        let key = ListingKey { filter, page, limit };
        self.cache
            .listings
            .get_or_try_init(key, || async {
                let items = match page {
                    PageRequest::Cursor { after_id } => {
                        crud::list_after_cursor(&self.db, filter, after_id, limit).await?
                    }
                    PageRequest::Offset { offset } => {
                        crud::list_offset(&self.db, filter, offset, limit).await?
                    }
                };
                Ok(Arc::new(Page::new(page, items, limit)))
            })
            .await
    }

    /// 按属性过滤后随机挑选藏品，种子每分钟变化一次
    pub async fn random_pick(
        &self,
        filter: &RandomFilter,
        count: usize,
        now: SystemTime,
    ) -> Result<Vec<Artwork>> {
        let ids = crud::filtered_ids(&self.db, filter).await?;
        let picked = seeded_sample(ids, minute_seed(now, filter), 0, count);
        crud::get_artworks_ordered(&self.db, &picked).await
    }

    /// 某个来源的精选推荐
    pub async fn featured(&self, source_id: i64, count: usize) -> Result<Arc<Vec<Artwork>>> {
        self.cache
            .featured
            .get_or_try_init((source_id, count), || async {
                let filter = RandomFilter { source: Some(source_id), ..Default::default() };
                let picked = self.random_pick(&filter, count, SystemTime::now()).await?;
                Ok(Arc::new(picked))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_mixed_paging_rejected() {
        assert!(matches!(PageRequest::from_query(Some(3), Some(10)), Err(Error::InvalidPaging(_))));
        assert_eq!(PageRequest::from_query(None, None).unwrap(), PageRequest::Cursor { after_id: 0 });
    }

    #[test]
    fn test_advance_keeps_mode() {
        let cursor = PageRequest::Cursor { after_id: 0 };
        assert_eq!(cursor.advance(10, Some(42), 10), Some(PageRequest::Cursor { after_id: 42 }));

        let offset = PageRequest::Offset { offset: 20 };
        assert_eq!(offset.advance(10, Some(42), 10), Some(PageRequest::Offset { offset: 30 }));
    }

    #[test]
    fn test_advance_stops_on_short_page() {
        let cursor = PageRequest::Cursor { after_id: 5 };
        assert_eq!(cursor.advance(3, Some(9), 10), None);
        assert_eq!(cursor.advance(0, None, 10), None);
    }

    #[test]
    fn test_offset_session_never_switches_mode() {
        let mut page = PageRequest::Offset { offset: 0 };
        for i in 0..5 {
            page = page.advance(10, Some(100 + i), 10).unwrap();
            assert!(matches!(page, PageRequest::Offset { .. }));
        }
        assert_eq!(page, PageRequest::Offset { offset: 50 });

        let mut page = PageRequest::Cursor { after_id: 0 };
        for i in 0..5 {
            page = page.advance(10, Some(100 + i), 10).unwrap();
            assert!(matches!(page, PageRequest::Cursor { .. }));
        }
    }

    #[test]
    fn test_seeded_sample_is_deterministic() {
        let ids = (1..=100).collect::<Vec<i64>>();
        let a = seeded_sample(ids.clone(), 7, 0, 10);
        let b = seeded_sample(ids.clone(), 7, 0, 10);
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);

        // 翻页得到不重叠的结果
        let next = seeded_sample(ids, 7, 10, 10);
        assert!(next.iter().all(|id| !a.contains(id)));
    }

    #[test]
    fn test_minute_seed() {
        let base = UNIX_EPOCH + Duration::from_secs(60 * 1000);
        let filter = RandomFilter::default();
        assert_eq!(minute_seed(base, &filter), minute_seed(base + Duration::from_secs(59), &filter));
        assert_ne!(minute_seed(base, &filter), minute_seed(base + Duration::from_secs(60), &filter));

        let other = RandomFilter { source: Some(1), ..Default::default() };
        assert_ne!(minute_seed(base, &filter), minute_seed(base, &other));
    }
}
