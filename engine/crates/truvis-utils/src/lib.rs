//! 场景导入与场景图共用的基础数据结构
//!
//! - [`id_map::IdMap`]: 64 位哈希 ID 到资源的开放寻址索引
//! - [`alias_table::AliasTable`]: 带权重的 O(1) 采样表
//! - [`atomic_buffer::AtomicRangeBuffer`]: 多 worker 通过原子偏移并行写入的 buffer
//! - [`task_graph::TaskGraph`]: 基于依赖边调度的并行任务图

pub mod alias_table;
pub mod atomic_buffer;
pub mod id_hash;
pub mod id_map;
pub mod task_graph;
pub mod work_split;
