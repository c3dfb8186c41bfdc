//! 向量与颜色的相似度计算

/// 将向量原地归一化为单位向量，零向量保持不变
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

/// 将单位向量间的欧氏距离换算为余弦相似度
///
/// 单位向量满足 `d² = 2 - 2cos`，结果截断到 [-1, 1]
pub fn distance_to_similarity(distance: f32) -> f32 {
    (1.0 - distance * distance / 2.0).clamp(-1.0, 1.0)
}

/// RGB 空间的曼哈顿距离
pub fn manhattan_rgb(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter().zip(b.iter()).map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs()).sum()
}
