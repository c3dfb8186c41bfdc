use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::{Executor, QueryBuilder, Sqlite, SqlitePool};

use super::*;
use crate::error::{Error, Result};

const ARTWORK_SELECT: &str = r#"
    SELECT a.id, a.source_id, a.title, a.artists, a.year_start, a.year_end,
           a.color_r, a.color_g, a.color_b, a.technique, a.image_url,
           e.focal_x, e.focal_y
    FROM artwork a
    LEFT JOIN embedding e ON e.artwork_id = a.id
    WHERE 1 = 1
"#;

const NOT_BROKEN: &str = " AND a.id NOT IN (SELECT artwork_id FROM broken_image)";

fn push_source_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: SourceFilter) {
    match filter {
        SourceFilter::AllEnabled => {
            qb.push(" AND a.source_id IN (SELECT id FROM source WHERE enabled = 1)");
        }
        SourceFilter::Only(source_id) => {
            qb.push(" AND a.source_id = ").push_bind(source_id);
        }
    }
}

/// SQLite 的 LIMIT/OFFSET 为 i64，负数会被当作不限制，超出范围时取最大值
fn sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    qb.push(" (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

/// 添加或更新来源
pub async fn upsert_source<'c, E>(executor: E, id: i64, name: &str, enabled: bool) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO source (id, name, enabled) VALUES (?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET name = excluded.name, enabled = excluded.enabled
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(enabled)
    .execute(executor)
    .await?;
    Ok(())
}

/// 如果来源不存在则以默认名称创建
pub async fn ensure_source<'c, E>(executor: E, id: i64) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("INSERT OR IGNORE INTO source (id, name) VALUES (?, ?)")
        .bind(id)
        .bind(format!("source-{id}"))
        .execute(executor)
        .await?;
    Ok(())
}

/// 获取所有启用的来源 ID
pub async fn enabled_sources(executor: &SqlitePool) -> Result<HashSet<i64>> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT id FROM source WHERE enabled = 1").fetch_all(executor).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// 添加或更新藏品记录，全文索引由触发器同步
pub async fn upsert_artwork<'c, E>(executor: E, record: &ArtworkRecord) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    let artists = serde_json::to_string(&record.artists).unwrap_or_else(|_| "[]".to_string());
    let [r, g, b] = match record.color {
        Some(c) => c.map(|v| Some(v as i64)),
        None => [None; 3],
    };
    sqlx::query(
        r#"
        INSERT INTO artwork (id, source_id, title, artists, year_start, year_end,
                             color_r, color_g, color_b, technique, image_url)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            source_id = excluded.source_id,
            title = excluded.title,
            artists = excluded.artists,
            year_start = excluded.year_start,
            year_end = excluded.year_end,
            color_r = excluded.color_r,
            color_g = excluded.color_g,
            color_b = excluded.color_b,
            technique = excluded.technique,
            image_url = excluded.image_url
        "#,
    )
    .bind(record.id)
    .bind(record.source_id)
    .bind(&record.title)
    .bind(artists)
    .bind(record.year_start)
    .bind(record.year_end)
    .bind(r)
    .bind(g)
    .bind(b)
    .bind(&record.technique)
    .bind(&record.image_url)
    .execute(executor)
    .await?;
    Ok(())
}

/// 按 ID 批量获取藏品，返回顺序不确定，由调用方重新排序
pub async fn get_artworks(executor: &SqlitePool, ids: &[i64]) -> Result<Vec<Artwork>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let mut qb = QueryBuilder::new(ARTWORK_SELECT);
    qb.push(" AND a.id IN");
    push_id_list(&mut qb, ids);
    let rows = qb.build_query_as::<ArtworkRow>().fetch_all(executor).await?;
    Ok(rows.into_iter().map(Artwork::from).collect())
}

/// 按 ID 批量获取藏品，并保持传入的顺序，不存在的 ID 会被跳过
pub async fn get_artworks_ordered(executor: &SqlitePool, ids: &[i64]) -> Result<Vec<Artwork>> {
    let mut found = get_artworks(executor, ids)
        .await?
        .into_iter()
        .map(|artwork| (artwork.id, artwork))
        .collect::<HashMap<_, _>>();
    Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
}

/// 颜色搜索的候选集，即所有有主色调的藏品
pub async fn color_candidates(executor: &SqlitePool, filter: SourceFilter) -> Result<Vec<ColorRow>> {
    let mut qb = QueryBuilder::new(
        r#"
        SELECT a.id, a.color_r, a.color_g, a.color_b FROM artwork a
        WHERE a.color_r IS NOT NULL AND a.color_g IS NOT NULL AND a.color_b IS NOT NULL
        "#,
    );
    push_source_filter(&mut qb, filter);
    qb.push(NOT_BROKEN);
    let rows = qb.build_query_as::<ColorRow>().fetch_all(executor).await?;
    Ok(rows)
}

/// 全文搜索，按 bm25 排序
///
/// 查询语法错误会被转换为 [`Error::MalformedQuery`]
pub async fn fts_search(
    executor: &SqlitePool,
    match_expr: &str,
    filter: SourceFilter,
    limit: usize,
    offset: usize,
) -> Result<Vec<FtsRow>> {
    let mut qb = QueryBuilder::new(
        r#"
        SELECT a.id AS id, bm25(artwork_fts) AS relevance
        FROM artwork_fts
        JOIN artwork a ON a.id = artwork_fts.rowid
        WHERE artwork_fts MATCH
        "#,
    );
    qb.push_bind(match_expr);
    push_source_filter(&mut qb, filter);
    qb.push(NOT_BROKEN);
    qb.push(" ORDER BY relevance, a.id LIMIT ")
        .push_bind(sql_count(limit))
        .push(" OFFSET ")
        .push_bind(sql_count(offset));

    match qb.build_query_as::<FtsRow>().fetch_all(executor).await {
        Ok(rows) => Ok(rows),
        Err(sqlx::Error::Database(e)) => Err(Error::MalformedQuery(e.message().to_string())),
        Err(e) => Err(e.into()),
    }
}

/// 对标题和作者做不排序的子串匹配
pub async fn substring_search(
    executor: &SqlitePool,
    text: &str,
    filter: SourceFilter,
    limit: usize,
    offset: usize,
) -> Result<Vec<Artwork>> {
    let escaped = text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    let pattern = format!("%{escaped}%");
    let mut qb = QueryBuilder::new(ARTWORK_SELECT);
    qb.push(" AND (a.title LIKE ")
        .push_bind(pattern.clone())
        .push(" ESCAPE '\\' OR a.artists LIKE ")
        .push_bind(pattern)
        .push(" ESCAPE '\\')");
    push_source_filter(&mut qb, filter);
    qb.push(NOT_BROKEN);
    qb.push(" ORDER BY a.id LIMIT ")
        .push_bind(sql_count(limit))
        .push(" OFFSET ")
        .push_bind(sql_count(offset));
    let rows = qb.build_query_as::<ArtworkRow>().fetch_all(executor).await?;
    Ok(rows.into_iter().map(Artwork::from).collect())
}

/// 某个来源下所有可用藏品的 ID，按 ID 排序
pub async fn source_ids(executor: &SqlitePool, source_id: i64) -> Result<Vec<i64>> {
    let mut qb = QueryBuilder::new("SELECT a.id FROM artwork a WHERE 1 = 1");
    push_source_filter(&mut qb, SourceFilter::Only(source_id));
    qb.push(NOT_BROKEN);
    qb.push(" ORDER BY a.id");
    let rows = qb.build_query_as::<(i64,)>().fetch_all(executor).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// 满足属性过滤条件的藏品 ID，按 ID 排序
///
/// 年代条件按区间重叠判断
pub async fn filtered_ids(executor: &SqlitePool, filter: &RandomFilter) -> Result<Vec<i64>> {
    let mut qb = QueryBuilder::new("SELECT a.id FROM artwork a WHERE 1 = 1");
    push_source_filter(&mut qb, SourceFilter::from_option(filter.source));
    if let Some(technique) = &filter.technique {
        qb.push(" AND a.technique = ").push_bind(technique.clone()).push(" COLLATE NOCASE");
    }
    if let Some(year_from) = filter.year_from {
        qb.push(" AND COALESCE(a.year_end, a.year_start) >= ").push_bind(year_from);
    }
    if let Some(year_to) = filter.year_to {
        qb.push(" AND a.year_start <= ").push_bind(year_to);
    }
    qb.push(NOT_BROKEN);
    qb.push(" ORDER BY a.id");
    let rows = qb.build_query_as::<(i64,)>().fetch_all(executor).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// 游标分页：按插入顺序（ID 递增）返回游标之后的记录
pub async fn list_after_cursor(
    executor: &SqlitePool,
    filter: SourceFilter,
    after_id: i64,
    limit: usize,
) -> Result<Vec<Artwork>> {
    let mut qb = QueryBuilder::new(ARTWORK_SELECT);
    qb.push(" AND a.id > ").push_bind(after_id);
    push_source_filter(&mut qb, filter);
    qb.push(NOT_BROKEN);
    qb.push(" ORDER BY a.id LIMIT ").push_bind(sql_count(limit));
    let rows = qb.build_query_as::<ArtworkRow>().fetch_all(executor).await?;
    Ok(rows.into_iter().map(Artwork::from).collect())
}

/// 偏移分页：按年代重新排序，没有年代的排在最后
pub async fn list_offset(
    executor: &SqlitePool,
    filter: SourceFilter,
    offset: usize,
    limit: usize,
) -> Result<Vec<Artwork>> {
    let mut qb = QueryBuilder::new(ARTWORK_SELECT);
    push_source_filter(&mut qb, filter);
    qb.push(NOT_BROKEN);
    qb.push(" ORDER BY a.year_start IS NULL, a.year_start, a.id LIMIT ")
        .push_bind(sql_count(limit))
        .push(" OFFSET ")
        .push_bind(sql_count(offset));
    let rows = qb.build_query_as::<ArtworkRow>().fetch_all(executor).await?;
    Ok(rows.into_iter().map(Artwork::from).collect())
}

/// 缺少向量且未标记损坏、有图片地址的藏品
pub async fn pending_embeddings(executor: &SqlitePool) -> Result<Vec<PendingRow>> {
    let rows = sqlx::query_as::<_, PendingRow>(
        r#"
        SELECT a.id, a.image_url
        FROM artwork a
        LEFT JOIN embedding e ON e.artwork_id = a.id
        LEFT JOIN broken_image b ON b.artwork_id = a.id
        WHERE e.artwork_id IS NULL
          AND b.artwork_id IS NULL
          AND a.image_url IS NOT NULL
          AND TRIM(a.image_url) != ''
        ORDER BY a.id
        "#,
    )
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// 在一个事务中保存一批向量，返回新分配的向量索引 ID 与藏品 ID
///
/// 已存在向量的藏品会被跳过
pub async fn save_embedding_batch(
    executor: &SqlitePool,
    batch: &[NewEmbedding],
) -> Result<Vec<(i64, NewEmbedding)>> {
    let mut tx = executor.begin().await?;
    let mut inserted = Vec::with_capacity(batch.len());
    for item in batch {
        let vector: &[u8] = bytemuck::cast_slice(item.vector.as_slice());
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO embedding (artwork_id, vector, focal_x, focal_y)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(item.artwork_id)
        .bind(vector)
        .bind(item.focal_point.0 as f64)
        .bind(item.focal_point.1 as f64)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            continue;
        }
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO vector_row (artwork_id) VALUES (?)
            ON CONFLICT (artwork_id) DO NOTHING
            RETURNING row_id
            "#,
        )
        .bind(item.artwork_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((row_id,)) = row {
            inserted.push((row_id, item.clone()));
        }
    }
    tx.commit().await?;
    Ok(inserted)
}

/// 将藏品图片标记为损坏，之后所有流程都会跳过它
pub async fn mark_broken<'c, E>(executor: E, artwork_id: i64, reason: &str) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    sqlx::query("INSERT OR IGNORE INTO broken_image (artwork_id, reason, marked_at) VALUES (?, ?, ?)")
        .bind(artwork_id)
        .bind(reason)
        .bind(now as i64)
        .execute(executor)
        .await?;
    Ok(())
}

/// 将向量索引 ID 映射到藏品，已损坏的藏品会被排除
pub async fn neighbors_for_rows(executor: &SqlitePool, row_ids: &[i64]) -> Result<Vec<NeighborRow>> {
    if row_ids.is_empty() {
        return Ok(vec![]);
    }
    let mut qb = QueryBuilder::new(
        r#"
        SELECT v.row_id, v.artwork_id, a.source_id
        FROM vector_row v
        JOIN artwork a ON a.id = v.artwork_id
        WHERE 1 = 1
        "#,
    );
    qb.push(NOT_BROKEN);
    qb.push(" AND v.row_id IN");
    push_id_list(&mut qb, row_ids);
    let rows = qb.build_query_as::<NeighborRow>().fetch_all(executor).await?;
    Ok(rows)
}

/// 读取全部向量，用于工作集缓存
pub async fn all_embeddings(executor: &SqlitePool) -> Result<Vec<EmbeddingRow>> {
    let rows = sqlx::query_as::<_, EmbeddingRow>("SELECT artwork_id, vector FROM embedding")
        .fetch_all(executor)
        .await?;
    Ok(rows)
}

/// 读取全部已分配索引 ID 的向量，用于重建向量索引
pub async fn indexed_embeddings(executor: &SqlitePool) -> Result<Vec<IndexedEmbeddingRow>> {
    let rows = sqlx::query_as::<_, IndexedEmbeddingRow>(
        r#"
        SELECT v.row_id, e.vector
        FROM vector_row v
        JOIN embedding e ON e.artwork_id = v.artwork_id
        ORDER BY v.row_id
        "#,
    )
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// 删除所有向量和索引映射，用于从头重建
pub async fn clear_embeddings(executor: &SqlitePool) -> Result<()> {
    let mut tx = executor.begin().await?;
    sqlx::query("DELETE FROM vector_row").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM embedding").execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

/// 向量索引映射的数量
pub async fn count_vector_rows(executor: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vector_row").fetch_one(executor).await?;
    Ok(count)
}

/// 查询数据库中的藏品、向量和损坏图片数量
pub async fn get_counts(executor: &SqlitePool) -> Result<Counts> {
    let counts = sqlx::query_as::<_, Counts>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM artwork) AS artworks,
            (SELECT COUNT(*) FROM embedding) AS embeddings,
            (SELECT COUNT(*) FROM broken_image) AS broken
        "#,
    )
    .fetch_one(executor)
    .await?;
    Ok(counts)
}
