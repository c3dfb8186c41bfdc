use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::RwLock;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::db::{Database, crud};
use crate::error::{Error, Result};

/// 一个近邻结果，`distance` 为欧氏距离
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// 向量索引内部 ID，对应 `vector_row.row_id`
    pub key: u64,
    pub distance: f32,
}

/// 向量索引只负责近邻检索，不支持任何关系过滤条件
pub trait VectorIndex: Send + Sync {
    /// 返回最多 k 个近邻，按距离升序
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    fn add(&mut self, key: u64, vector: &[f32]) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn save(&self, path: &Path) -> Result<()>;
}

/// 服务端共享的向量索引，重新加载时整体替换
pub type SharedIndex = Arc<RwLock<Box<dyn VectorIndex>>>;

pub fn shared(index: impl VectorIndex + 'static) -> SharedIndex {
    Arc::new(RwLock::new(Box::new(index)))
}

pub struct UsearchIndex {
    index: Index,
}

fn index_error(e: impl std::fmt::Display) -> Error {
    Error::Index(e.to_string())
}

impl UsearchIndex {
    pub fn new(dimensions: usize) -> Result<Self> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::L2sq,
            quantization: ScalarKind::F32,
            // 此处为 usearch 默认参数
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
            ..Default::default()
        };
        let index = Index::new(&options).map_err(index_error)?;
        Ok(Self { index })
    }

    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self> {
        let s = Self::new(dimensions)?;
        s.index.load(&path.as_ref().to_string_lossy()).map_err(index_error)?;
        Ok(s)
    }

    /// 从数据库中已保存的向量重建索引
    pub async fn rebuild(db: &Database, dimensions: usize) -> Result<Self> {
        let rows = crud::indexed_embeddings(db).await?;
        let mut s = Self::new(dimensions)?;
        s.index.reserve(rows.len().max(1)).map_err(index_error)?;
        for row in rows {
            let vector: Vec<f32> = bytemuck::pod_collect_to_vec(&row.vector);
            s.add(row.row_id as u64, &vector)?;
        }
        Ok(s)
    }

    /// 加载索引文件，如果文件不存在或与数据库不一致则重建
    ///
    /// 流水线先提交数据库再写索引文件，中途崩溃会导致两者不一致
    pub async fn load_or_rebuild(path: &Path, db: &Database, dimensions: usize) -> Result<Self> {
        let expected = crud::count_vector_rows(db).await? as usize;
        if path.exists() {
            let index = Self::open(path, dimensions)?;
            if index.len() == expected {
                info!("已加载向量索引: {}，共 {} 条", path.display(), expected);
                return Ok(index);
            }
            warn!("向量索引与数据库不一致 ({} != {})，重建索引", index.len(), expected);
        }
        let index = Self::rebuild(db, dimensions).await?;
        if !index.is_empty() {
            index.save(path)?;
        }
        info!("已重建向量索引，共 {} 条", index.len());
        Ok(index)
    }
}

impl VectorIndex for UsearchIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 || self.index.size() == 0 {
            return Ok(vec![]);
        }
        let matches = self.index.search(query, k).map_err(index_error)?;
        Ok(matches
            .keys
            .into_iter()
            .zip(matches.distances)
            // L2sq 返回的是距离的平方
            .map(|(key, d2)| Neighbor { key, distance: d2.max(0.0).sqrt() })
            .collect())
    }

    fn add(&mut self, key: u64, vector: &[f32]) -> Result<()> {
        if self.index.size() >= self.index.capacity() {
            let capacity = (self.index.capacity() * 2).max(64);
            self.index.reserve(capacity).map_err(index_error)?;
        }
        self.index.add(key, vector).map_err(index_error)?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.index.size()
    }

    /// 先写入临时文件再重命名，避免读取到写了一半的索引
    fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("usearch.tmp");
        self.index.save(&tmp.to_string_lossy()).map_err(index_error)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::similarity::{distance_to_similarity, dot, l2_normalize};

    fn unit(values: &[f32]) -> Vec<f32> {
        let mut v = values.to_vec();
        l2_normalize(&mut v);
        v
    }

    #[test]
    fn test_search_orders_by_distance() {
        let mut index = UsearchIndex::new(4).unwrap();
        index.add(10, &unit(&[1.0, 0.0, 0.0, 0.0])).unwrap();
        index.add(20, &unit(&[0.0, 1.0, 0.0, 0.0])).unwrap();
        index.add(30, &unit(&[0.9, 0.1, 0.0, 0.0])).unwrap();

        let query = unit(&[1.0, 0.05, 0.0, 0.0]);
        let result = index.search(&query, 3).unwrap();
        let keys = result.iter().map(|n| n.key).collect::<Vec<_>>();
        assert_eq!(keys, vec![10, 30, 20]);

        // 距离换算的相似度等于点积
        let sim = distance_to_similarity(result[0].distance);
        assert!((sim - dot(&query, &unit(&[1.0, 0.0, 0.0, 0.0]))).abs() < 1e-4);
    }

    #[test]
    fn test_search_empty_index() {
        let index = UsearchIndex::new(4).unwrap();
        assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 10).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.usearch");
        let mut index = UsearchIndex::new(4).unwrap();
        for i in 0..100u64 {
            index.add(i, &unit(&[1.0, i as f32, 0.5, 0.0])).unwrap();
        }
        index.save(&path).unwrap();

        let loaded = UsearchIndex::open(&path, 4).unwrap();
        assert_eq!(loaded.len(), 100);
    }
}
