//! Vose 别名法 (alias method)
//!
//! 把一组非负权重转换成 O(1) 采样的表：
//! 均匀选取下标 `i`，再取均匀随机数 `u`，`u <= p_curr` 时采样结果为 `i`，否则为 `alias`。
//!
//! 用于发光三角形的重要性采样，表项布局与 shader 端一致。

/// 剩余元素的归一化权重与 1 的最大允许偏差（相对误差）
///
/// 超出时只输出警告，表依然可用，偏差会以采样概率误差的形式体现出来
pub const ALIAS_TABLE_DRIFT_TOLERANCE: f32 = 1e-3;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AliasTableEntry {
    /// 自身的归一化权重（均值为 1）
    pub cached_weight_self: f32,
    /// alias 的归一化权重（均值为 1）
    pub cached_weight_alias: f32,
    /// 接受自身的概率
    pub p_curr: f32,
    pub alias: u32,
}

#[derive(Clone, Debug, Default)]
pub struct AliasTable {
    entries: Vec<AliasTableEntry>,
}
// new & init
impl AliasTable {
    /// 根据权重构建别名表
    ///
    /// `weights` 会被原地归一化为均值 1，顺序不变。
    ///
    /// # return
    /// 权重之和不是正的有限值（例如全 0）时返回 None，由调用者决定如何处理；
    /// 空输入返回空表
    pub fn build(weights: &mut [f32]) -> Option<Self> {
        if weights.is_empty() {
            return Some(Self::default());
        }

        assert!(
            weights.iter().all(|w| *w >= 0.0),
            "AliasTable: weights must be non-negative"
        );
        let sum: f64 = weights.iter().map(|w| *w as f64).sum();
        if !sum.is_finite() || sum <= 0.0 {
            return None;
        }

        Some(Self {
            entries: build_alias_table(weights, sum),
        })
    }
}
// getter
impl AliasTable {
    #[inline]
    pub fn entries(&self) -> &[AliasTableEntry] {
        &self.entries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
// tools
impl AliasTable {
    /// 用两个 [0, 1) 的均匀随机数采样
    pub fn sample(&self, u_index: f32, u_accept: f32) -> u32 {
        assert!(!self.entries.is_empty(), "AliasTable: sampling from an empty table");

        let n = self.entries.len();
        let idx = ((u_index * n as f32) as usize).min(n - 1);
        let entry = &self.entries[idx];

        if u_accept <= entry.p_curr { idx as u32 } else { entry.alias }
    }

    /// 元素 `idx` 被采样到的概率
    #[inline]
    pub fn pdf(&self, idx: usize) -> f32 {
        self.entries[idx].cached_weight_self / self.entries.len() as f32
    }
}

fn build_alias_table(weights: &mut [f32], sum: f64) -> Vec<AliasTableEntry> {
    let n = weights.len();
    assert!(n <= u32::MAX as usize, "AliasTable: too many elements ({n})");

    // 1. 归一化，使得均值为 1
    let scale = n as f64 / sum;
    for w in weights.iter_mut() {
        *w = (*w as f64 * scale) as f32;
    }
    let normalized: &[f32] = weights;
    // 配对过程中 overfull 的权重会不断减少，在副本上进行
    let mut residual = normalized.to_vec();

    // 2. 按 >= 1 和 < 1 分成两组
    let mut overfull: Vec<u32> = Vec::with_capacity(n);
    let mut underfull: Vec<u32> = Vec::with_capacity(n);
    for (idx, w) in residual.iter().enumerate() {
        if *w >= 1.0 {
            overfull.push(idx as u32);
        } else {
            underfull.push(idx as u32);
        }
    }

    let mut table = vec![AliasTableEntry::default(); n];
    let mut num_inserted = 0_usize;

    // 3. 每次取一个 overfull 和一个 underfull 配对
    loop {
        let (Some(&over), Some(&under)) = (overfull.last(), underfull.last()) else {
            break;
        };
        underfull.pop();

        let w_under = residual[under as usize];
        table[under as usize] = AliasTableEntry {
            cached_weight_self: normalized[under as usize],
            cached_weight_alias: normalized[over as usize],
            p_curr: w_under,
            alias: over,
        };
        num_inserted += 1;

        let w_over = &mut residual[over as usize];
        *w_over -= 1.0 - w_under;
        if *w_over < 1.0 {
            overfull.pop();
            underfull.push(over);
        }
    }

    // 4. 剩下的元素权重理论上恰好为 1，只有浮点误差
    let mut max_drift = 0.0_f32;
    for idx in overfull.into_iter().chain(underfull) {
        max_drift = max_drift.max((residual[idx as usize] - 1.0).abs());
        table[idx as usize] = AliasTableEntry {
            cached_weight_self: normalized[idx as usize],
            cached_weight_alias: normalized[idx as usize],
            p_curr: 1.0,
            alias: idx,
        };
        num_inserted += 1;
    }

    if max_drift > ALIAS_TABLE_DRIFT_TOLERANCE {
        log::warn!("AliasTable: leftover weight drifted {max_drift} away from 1 ({n} elements)");
    }
    assert_eq!(
        num_inserted, n,
        "AliasTable: every element must be inserted exactly once"
    );

    table
}
