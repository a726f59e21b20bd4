use std::ops::Range;

/// 把 `num_items` 个元素切分给若干 worker
///
/// - 每个 worker 至少分到 `min_items_per_worker` 个元素（元素总数不足时只有一个 worker）
/// - worker 数量不超过 `max_workers`
/// - 返回的区间连续且恰好覆盖 `[0, num_items)`
pub fn split_work(num_items: usize, min_items_per_worker: usize, max_workers: usize) -> Vec<Range<usize>> {
    if num_items == 0 {
        return Vec::new();
    }

    let min_items_per_worker = min_items_per_worker.max(1);
    let num_workers = (num_items / min_items_per_worker).clamp(1, max_workers.max(1));

    let base = num_items / num_workers;
    let remainder = num_items % num_workers;

    let mut ranges = Vec::with_capacity(num_workers);
    let mut start = 0;
    for worker_idx in 0..num_workers {
        let len = base + usize::from(worker_idx < remainder);
        ranges.push(start..start + len);
        start += len;
    }

    debug_assert_eq!(start, num_items);
    ranges
}
