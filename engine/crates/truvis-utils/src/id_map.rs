//! 以 64 位哈希 ID 为 key 的开放寻址哈希表
//!
//! 引擎中的 mesh、material、instance 等资源都使用 64 位哈希作为 ID，
//! 这些 ID 本身已经是均匀分布的哈希值，所以这里不再做二次哈希，
//! 直接用 `key & (bucket_count - 1)` 作为初始槽位。
//!
//! - 线性探测，遇到表尾回绕
//! - 删除时留下墓碑 (tombstone)，墓碑依然计入负载因子
//! - 墓碑只有在重新分配 (relocate) 时才会被真正回收
//! - bucket 数量始终是 2 的幂

/// 空槽位的 key
pub const NULL_KEY: u64 = u64::MAX;
/// 墓碑槽位的 key
pub const TOMBSTONE_KEY: u64 = u64::MAX - 1;
/// 负载因子上限，(live + tombstone) / bucket_count 始终小于该值
pub const MAX_LOAD_FACTOR: f32 = 0.8;

const DEFAULT_MIN_BUCKETS: usize = 8;

struct Bucket<V> {
    key: u64,
    value: Option<V>,
}

impl<V> Bucket<V> {
    #[inline]
    fn empty() -> Self {
        Self {
            key: NULL_KEY,
            value: None,
        }
    }

    #[inline]
    fn is_live(&self) -> bool {
        self.key != NULL_KEY && self.key != TOMBSTONE_KEY
    }
}

/// 探测结果
enum Probe {
    /// 找到了 key 所在的槽位
    Found(usize),
    /// key 不存在，可以插入的槽位（优先复用探测路径上的第一个墓碑）
    Vacant(usize),
}

/// 开放寻址的 ID 索引
///
/// 注意 [`IdMap::insert_if_absent`] 遇到重复 key 时不会覆盖旧值，
/// 而 [`IdMap::insert_or_assign`] 会覆盖。
pub struct IdMap<V> {
    buckets: Vec<Bucket<V>>,
    num_live: usize,
    num_tombstones: usize,
    min_buckets: usize,
}
impl<V> Default for IdMap<V> {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl<V> IdMap<V> {
    pub fn new() -> Self {
        Self::with_min_buckets(DEFAULT_MIN_BUCKETS)
    }

    /// 第一次分配以及每次扩容时 bucket 数量都不会小于 `min_buckets`
    pub fn with_min_buckets(min_buckets: usize) -> Self {
        Self {
            buckets: Vec::new(),
            num_live: 0,
            num_tombstones: 0,
            // 至少 2 个 bucket，否则一次扩容之后负载因子依然可能达到上限
            min_buckets: min_buckets.max(Self::required_buckets(1)).next_power_of_two(),
        }
    }

    /// 预留足够的空间，使得插入 `num_entries` 个元素后不会触发扩容
    pub fn with_capacity(num_entries: usize) -> Self {
        let mut map = Self::new();
        map.reserve(num_entries);
        map
    }
}
// getter
impl<V> IdMap<V> {
    /// 存活的元素数量（不含墓碑）
    #[inline]
    pub fn size(&self) -> usize {
        self.num_live
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.num_live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_live == 0
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub fn tombstone_count(&self) -> usize {
        self.num_tombstones
    }

    /// (live + tombstone) / bucket_count
    #[inline]
    pub fn load_factor(&self) -> f32 {
        if self.buckets.is_empty() {
            0.0
        } else {
            (self.num_live + self.num_tombstones) as f32 / self.buckets.len() as f32
        }
    }
}
// tools
impl<V> IdMap<V> {
    pub fn find(&self, key: u64) -> Option<&V> {
        match self.probe(key) {
            Some(Probe::Found(idx)) => self.buckets[idx].value.as_ref(),
            _ => None,
        }
    }

    pub fn find_mut(&mut self, key: u64) -> Option<&mut V> {
        match self.probe(key) {
            Some(Probe::Found(idx)) => self.buckets[idx].value.as_mut(),
            _ => None,
        }
    }

    #[inline]
    pub fn contains(&self, key: u64) -> bool {
        matches!(self.probe(key), Some(Probe::Found(_)))
    }

    /// key 不存在时才构造并插入 value
    ///
    /// # return
    /// 是否发生了插入；key 已经存在时返回 false，旧值保持不变
    pub fn insert_if_absent(&mut self, key: u64, make_value: impl FnOnce() -> V) -> bool {
        Self::assert_valid_key(key);

        match self.slot_for_insert(key) {
            Probe::Found(_) => false,
            Probe::Vacant(idx) => {
                self.occupy(idx, key, make_value());
                true
            }
        }
    }

    /// 插入或者覆盖
    pub fn insert_or_assign(&mut self, key: u64, value: V) -> &mut V {
        Self::assert_valid_key(key);

        let idx = match self.slot_for_insert(key) {
            Probe::Found(idx) => {
                self.buckets[idx].value = Some(value);
                idx
            }
            Probe::Vacant(idx) => {
                self.occupy(idx, key, value);
                idx
            }
        };

        self.buckets[idx].value.as_mut().expect("IdMap: occupied bucket without value")
    }

    /// 删除 key，槽位标记为墓碑
    ///
    /// # return
    /// 被删除的元素数量（0 或 1）
    pub fn erase(&mut self, key: u64) -> usize {
        Self::assert_valid_key(key);

        match self.probe(key) {
            Some(Probe::Found(idx)) => {
                let bucket = &mut self.buckets[idx];
                bucket.key = TOMBSTONE_KEY;
                bucket.value = None;

                self.num_live -= 1;
                self.num_tombstones += 1;
                1
            }
            _ => 0,
        }
    }

    /// 预留空间：保证 `num_entries` 个元素时负载因子依然低于上限
    ///
    /// 当前容量已经满足要求时什么也不做
    pub fn reserve(&mut self, num_entries: usize) {
        let required = Self::required_buckets(num_entries).max(self.min_buckets);
        if required > self.buckets.len() {
            self.relocate(required);
        }
    }

    /// 扩容到至少 `bucket_count` 个 bucket，不会缩容
    pub fn resize(&mut self, bucket_count: usize) {
        let target = bucket_count.max(self.min_buckets).next_power_of_two();
        if target > self.buckets.len() {
            self.relocate(target);
        }
    }

    /// 所有槽位置为空，保留内存
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            *bucket = Bucket::empty();
        }
        self.num_live = 0;
        self.num_tombstones = 0;
    }

    /// 销毁所有元素并释放内存
    pub fn free_memory(&mut self) {
        self.buckets = Vec::new();
        self.num_live = 0;
        self.num_tombstones = 0;
    }

    /// 遍历所有存活的元素，顺序与槽位顺序一致
    pub fn iter(&self) -> impl Iterator<Item = (u64, &V)> + '_ {
        self.buckets
            .iter()
            .filter(|bucket| bucket.is_live())
            .filter_map(|bucket| bucket.value.as_ref().map(|value| (bucket.key, value)))
    }

    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.iter().map(|(key, _)| key)
    }
}
// 内部实现
impl<V> IdMap<V> {
    #[inline]
    fn assert_valid_key(key: u64) {
        assert!(
            key != NULL_KEY && key != TOMBSTONE_KEY,
            "IdMap: key {key:#x} is a reserved sentinel and can not be stored"
        );
    }

    /// 负载因子严格小于上限时所需的最小 bucket 数量（2 的幂）
    fn required_buckets(num_entries: usize) -> usize {
        if num_entries == 0 {
            return 0;
        }
        let min = (num_entries as f64 / MAX_LOAD_FACTOR as f64).floor() as usize + 1;
        min.next_power_of_two()
    }

    /// 线性探测
    ///
    /// 返回 None 表示 key 是哨兵值、表未分配，或者整张表都被占满且没有墓碑可用
    fn probe(&self, key: u64) -> Option<Probe> {
        let bucket_count = self.buckets.len();
        if bucket_count == 0 || key == NULL_KEY || key == TOMBSTONE_KEY {
            return None;
        }

        let mask = bucket_count - 1;
        let mut idx = (key as usize) & mask;
        let mut first_tombstone = None;

        for _ in 0..bucket_count {
            let bucket_key = self.buckets[idx].key;
            if bucket_key == key {
                return Some(Probe::Found(idx));
            }
            if bucket_key == NULL_KEY {
                return Some(Probe::Vacant(first_tombstone.unwrap_or(idx)));
            }
            if bucket_key == TOMBSTONE_KEY && first_tombstone.is_none() {
                first_tombstone = Some(idx);
            }

            idx = (idx + 1) & mask;
        }

        first_tombstone.map(Probe::Vacant)
    }

    /// 找到插入位置，必要时扩容
    ///
    /// 复用墓碑不会增加占用的槽位数，因此不需要扩容；
    /// 占用一个空槽位时，如果负载因子会达到上限则先扩容
    fn slot_for_insert(&mut self, key: u64) -> Probe {
        match self.probe(key) {
            Some(Probe::Found(idx)) => return Probe::Found(idx),
            Some(Probe::Vacant(idx)) if self.buckets[idx].key == TOMBSTONE_KEY || !self.would_reach_max_load() => {
                return Probe::Vacant(idx);
            }
            _ => {}
        }

        let new_count = (self.buckets.len() * 2).max(self.min_buckets).next_power_of_two();
        self.relocate(new_count);

        match self.probe(key) {
            Some(Probe::Vacant(idx)) => Probe::Vacant(idx),
            _ => panic!("IdMap: no vacant bucket for key {key:#x} after relocation"),
        }
    }

    #[inline]
    fn would_reach_max_load(&self) -> bool {
        let occupied = self.num_live + self.num_tombstones + 1;
        occupied as f32 >= MAX_LOAD_FACTOR * self.buckets.len() as f32
    }

    fn occupy(&mut self, idx: usize, key: u64, value: V) {
        let bucket = &mut self.buckets[idx];
        debug_assert!(!bucket.is_live(), "IdMap: bucket {idx} is already occupied");
        if bucket.key == TOMBSTONE_KEY {
            self.num_tombstones -= 1;
        }

        bucket.key = key;
        bucket.value = Some(value);
        self.num_live += 1;
    }

    /// 重新分配到新的 bucket 数组，所有存活元素重新计算槽位，墓碑被丢弃
    fn relocate(&mut self, new_bucket_count: usize) {
        assert!(
            new_bucket_count.is_power_of_two(),
            "IdMap: bucket count {new_bucket_count} is not a power of two"
        );

        let mut new_buckets: Vec<Bucket<V>> = Vec::with_capacity(new_bucket_count);
        new_buckets.resize_with(new_bucket_count, Bucket::empty);

        let old_buckets = std::mem::replace(&mut self.buckets, new_buckets);
        let mask = new_bucket_count - 1;
        let mut moved = 0;

        for bucket in old_buckets.into_iter().filter(|bucket| bucket.is_live()) {
            let mut idx = (bucket.key as usize) & mask;
            loop {
                let dst = &mut self.buckets[idx];
                if dst.key == NULL_KEY {
                    *dst = bucket;
                    break;
                }
                assert!(
                    dst.key != bucket.key,
                    "IdMap: duplicate key {:#x} found during relocation",
                    bucket.key
                );
                idx = (idx + 1) & mask;
            }
            moved += 1;
        }

        assert_eq!(moved, self.num_live, "IdMap: relocation lost entries");
        self.num_tombstones = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    #[test]
    fn test_insert_find_erase() {
        let mut map = IdMap::new();
        assert!(map.find(42).is_none());
        assert_eq!(map.bucket_count(), 0);

        assert!(map.insert_if_absent(42, || "a"));
        assert!(map.insert_if_absent(7, || "b"));
        assert_eq!(map.find(42), Some(&"a"));
        assert_eq!(map.find(7), Some(&"b"));
        assert_eq!(map.size(), 2);

        assert_eq!(map.erase(42), 1);
        assert_eq!(map.erase(42), 0);
        assert!(map.find(42).is_none());
        assert_eq!(map.size(), 1);
        assert_eq!(map.tombstone_count(), 1);
    }

    #[test]
    fn test_insert_if_absent_keeps_old_value() {
        let mut map = IdMap::new();
        assert!(map.insert_if_absent(3, || 10));
        assert!(!map.insert_if_absent(3, || 20));
        assert_eq!(map.find(3), Some(&10));

        *map.insert_or_assign(3, 30) += 1;
        assert_eq!(map.find(3), Some(&31));
        assert_eq!(map.size(), 1);
    }

    #[test]
    fn test_tombstone_is_reused() {
        let mut map = IdMap::new();
        map.resize(8);

        // 1, 9, 17 都落在 1 号槽位上
        map.insert_or_assign(1, 'a');
        map.insert_or_assign(9, 'b');
        assert_eq!(map.erase(1), 1);
        assert_eq!(map.tombstone_count(), 1);

        map.insert_or_assign(17, 'c');
        assert_eq!(map.tombstone_count(), 0);
        assert_eq!(map.buckets[1].key, 17);
        assert_eq!(map.find(9), Some(&'b'));
        assert_eq!(map.find(17), Some(&'c'));
    }

    #[test]
    fn test_erased_key_is_found_again_after_reinsert_past_tombstone() {
        let mut map = IdMap::new();
        map.resize(8);
        map.insert_or_assign(2, 0);
        map.insert_or_assign(10, 1);
        map.erase(2);

        // 10 依然可以越过墓碑被找到，重复插入不会产生第二份
        assert!(!map.insert_if_absent(10, || 5));
        assert_eq!(map.size(), 1);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec![10]);
    }

    #[test]
    fn test_load_factor_stays_below_max() {
        let mut map = IdMap::new();
        for key in 0..1000_u64 {
            map.insert_or_assign(key * 7919, key);
            assert!(map.load_factor() < MAX_LOAD_FACTOR);
            assert!(map.bucket_count().is_power_of_two());
        }
        for key in 0..500_u64 {
            assert_eq!(map.erase(key * 7919), 1);
            assert!(map.load_factor() < MAX_LOAD_FACTOR);
        }
        assert_eq!(map.size(), 500);
    }

    #[test]
    fn test_random_ops_match_hashmap() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut map = IdMap::with_min_buckets(4);
        let mut reference: HashMap<u64, u32> = HashMap::new();

        for step in 0..20_000_u32 {
            // 小的 key 空间让删除和重复插入频繁发生
            let key = rng.gen_range(0..512_u64) * 0x9E37_79B9;
            match rng.gen_range(0..4) {
                0 => {
                    let inserted = map.insert_if_absent(key, || step);
                    let expected = !reference.contains_key(&key);
                    assert_eq!(inserted, expected);
                    reference.entry(key).or_insert(step);
                }
                1 => {
                    map.insert_or_assign(key, step);
                    reference.insert(key, step);
                }
                2 => {
                    let removed = map.erase(key);
                    assert_eq!(removed, usize::from(reference.remove(&key).is_some()));
                }
                _ => {
                    assert_eq!(map.find(key), reference.get(&key));
                }
            }

            assert_eq!(map.size(), reference.len());
            assert!(map.load_factor() < 1.0);
        }

        for (key, value) in &reference {
            assert_eq!(map.find(*key), Some(value));
        }
    }

    #[test]
    fn test_resize_keeps_entries() {
        let mut map = IdMap::new();
        for key in 0..100_u64 {
            map.insert_or_assign(key << 20, key);
        }
        for key in 0..30_u64 {
            map.erase(key << 20);
        }

        let mut before = map.iter().map(|(k, v)| (k, *v)).collect::<Vec<_>>();
        map.resize(map.bucket_count() * 4);
        let mut after = map.iter().map(|(k, v)| (k, *v)).collect::<Vec<_>>();

        before.sort_unstable();
        after.sort_unstable();
        assert_eq!(before, after);
        assert_eq!(map.tombstone_count(), 0);
    }

    #[test]
    fn test_resize_is_noop_when_capacity_suffices() {
        let mut map = IdMap::new();
        map.reserve(100);
        let bucket_count = map.bucket_count();
        assert!(100.0 / (bucket_count as f32) < MAX_LOAD_FACTOR);

        for key in 0..100_u64 {
            map.insert_or_assign(key, ());
        }
        assert_eq!(map.bucket_count(), bucket_count);

        map.reserve(50);
        map.resize(bucket_count / 2);
        assert_eq!(map.bucket_count(), bucket_count);
        assert_eq!(map.size(), 100);
    }

    #[test]
    fn test_clear_and_free_memory() {
        let mut map = IdMap::new();
        for key in 0..20_u64 {
            map.insert_or_assign(key, key.to_string());
        }
        let bucket_count = map.bucket_count();

        map.clear();
        assert_eq!(map.size(), 0);
        assert_eq!(map.bucket_count(), bucket_count);
        assert!(map.find(3).is_none());

        map.insert_or_assign(3, "x".to_string());
        map.free_memory();
        assert_eq!(map.bucket_count(), 0);
        assert!(map.find(3).is_none());
    }

    #[test]
    #[should_panic(expected = "reserved sentinel")]
    fn test_sentinel_key_panics() {
        let mut map = IdMap::new();
        map.insert_or_assign(TOMBSTONE_KEY, 1);
    }

    #[test]
    #[should_panic(expected = "reserved sentinel")]
    fn test_erase_sentinel_key_panics() {
        let mut map = IdMap::new();
        map.insert_or_assign(1, 1);
        map.erase(NULL_KEY);
    }

    #[test]
    fn test_sentinel_lookup_misses_empty_slots() {
        let mut map = IdMap::new();
        map.insert_or_assign(5, 5);
        map.erase(5);
        assert!(!map.contains(NULL_KEY));
        assert!(!map.contains(TOMBSTONE_KEY));
        assert!(map.find(NULL_KEY).is_none());
    }

    #[test]
    fn test_tiny_min_buckets_keep_load_below_max() {
        for min_buckets in [0, 1, 2] {
            let mut map = IdMap::with_min_buckets(min_buckets);
            for key in 0..64u64 {
                map.insert_or_assign(key, key);
                assert!(
                    map.load_factor() < MAX_LOAD_FACTOR,
                    "min_buckets = {min_buckets}, size = {}, buckets = {}",
                    map.size(),
                    map.bucket_count()
                );
            }
            assert_eq!(map.size(), 64);
        }
    }
}
