//! 任务依赖图
//!
//! 静态声明一组任务以及任务之间的依赖边，排序后放到 rayon 线程池中执行：
//! - 入度为 0 的任务立即提交
//! - 一个任务结束后，把后继任务的入度减一，减到 0 的后继被提交
//! - 没有依赖边的任务之间可以在任意 worker 上并行
//!
//! `execute` 会阻塞直到所有任务执行完毕，任务中的 panic 会在 `execute` 返回时继续传播。

use parking_lot::Mutex;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::sync::atomic::{AtomicUsize, Ordering};
use truvis_crate_tools::profile_scope;

type TaskFn<'a> = Box<dyn FnOnce() + Send + 'a>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskHandle(NodeIndex);

#[derive(Debug, thiserror::Error)]
pub enum TaskGraphError {
    #[error("task graph `{graph}` has a dependency cycle through task `{task}`")]
    Cycle { graph: String, task: String },
}

struct TaskNode<'a> {
    name: String,
    task: Mutex<Option<TaskFn<'a>>>,
}

/// 任务图的声明阶段
pub struct TaskGraph<'a> {
    name: String,
    graph: DiGraph<TaskNode<'a>, ()>,
}
// new & init
impl<'a> TaskGraph<'a> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph: DiGraph::new(),
        }
    }
}
// tools
impl<'a> TaskGraph<'a> {
    pub fn add_task(&mut self, name: impl Into<String>, task: impl FnOnce() + Send + 'a) -> TaskHandle {
        TaskHandle(self.graph.add_node(TaskNode {
            name: name.into(),
            task: Mutex::new(Some(Box::new(task))),
        }))
    }

    /// `before` 执行完之后才能执行 `after`
    pub fn add_edge(&mut self, before: TaskHandle, after: TaskHandle) {
        assert_ne!(before, after, "TaskGraph({}): a task can not depend on itself", self.name);
        // 避免重复边
        self.graph.update_edge(before.0, after.0, ());
    }

    /// `after` 依赖 `befores` 中的每一个任务
    pub fn add_edges(&mut self, befores: &[TaskHandle], after: TaskHandle) {
        for before in befores {
            self.add_edge(*before, after);
        }
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// 拓扑排序，检测循环依赖
    pub fn sort(self) -> Result<SortedTaskGraph<'a>, TaskGraphError> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(SortedTaskGraph {
                name: self.name,
                graph: self.graph,
                order,
            }),
            Err(cycle) => Err(TaskGraphError::Cycle {
                task: self.graph[cycle.node_id()].name.clone(),
                graph: self.name,
            }),
        }
    }
}

/// 排序完成、可以执行的任务图
pub struct SortedTaskGraph<'a> {
    name: String,
    graph: DiGraph<TaskNode<'a>, ()>,
    order: Vec<NodeIndex>,
}

struct ExecState<'g, 'a> {
    graph: &'g DiGraph<TaskNode<'a>, ()>,
    remaining_deps: Vec<AtomicUsize>,
    finished: AtomicUsize,
}

// getter
impl SortedTaskGraph<'_> {
    /// 拓扑序下的任务名
    pub fn order(&self) -> Vec<&str> {
        self.order.iter().map(|node| self.graph[*node].name.as_str()).collect()
    }
}
// tools
impl<'a> SortedTaskGraph<'a> {
    /// 在线程池中执行所有任务，阻塞直到全部结束
    pub fn execute(self, pool: &rayon::ThreadPool) {
        profile_scope!("TaskGraph::execute");
        log::debug!("TaskGraph({}): executing {:?}", self.name, self.order());

        let state = ExecState {
            graph: &self.graph,
            remaining_deps: self
                .graph
                .node_indices()
                .map(|node| AtomicUsize::new(self.graph.neighbors_directed(node, Direction::Incoming).count()))
                .collect(),
            finished: AtomicUsize::new(0),
        };

        // 必须在提交任何任务之前确定根任务，否则会和后继任务的提交产生竞争
        let roots = self
            .order
            .iter()
            .copied()
            .filter(|node| state.remaining_deps[node.index()].load(Ordering::Acquire) == 0)
            .collect::<Vec<_>>();

        let state = &state;
        pool.scope(|scope| {
            // 按拓扑序提交根任务
            for node in roots {
                scope.spawn(move |scope| run_task(scope, state, node));
            }
        });

        assert_eq!(
            state.finished.load(Ordering::Acquire),
            self.graph.node_count(),
            "TaskGraph({}): not every task was executed",
            self.name
        );
    }
}

fn run_task<'s, 'a: 's>(scope: &rayon::Scope<'s>, state: &'s ExecState<'s, 'a>, node: NodeIndex) {
    let task_node = &state.graph[node];
    let task = task_node
        .task
        .lock()
        .take()
        .unwrap_or_else(|| panic!("TaskGraph: task `{}` executed twice", task_node.name));

    {
        profile_scope!(task_node.name.as_str());
        log::debug!("task `{}` started", task_node.name);
        task();
    }
    state.finished.fetch_add(1, Ordering::AcqRel);

    for next in state.graph.neighbors_directed(node, Direction::Outgoing) {
        if state.remaining_deps[next.index()].fetch_sub(1, Ordering::AcqRel) == 1 {
            scope.spawn(move |scope| run_task(scope, state, next));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap()
    }

    #[test]
    fn test_chain_dependency() {
        let log = Mutex::new(Vec::new());
        let mut graph = TaskGraph::new("chain");
        let a = graph.add_task("a", || log.lock().push("a"));
        let b = graph.add_task("b", || log.lock().push("b"));
        let c = graph.add_task("c", || log.lock().push("c"));
        graph.add_edge(b, c);
        graph.add_edge(a, b);

        let sorted = graph.sort().unwrap();
        assert_eq!(sorted.order(), vec!["a", "b", "c"]);
        sorted.execute(&pool());
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond_runs_each_task_once() {
        let counter = AtomicUsize::new(0);
        let finished_before_join = Mutex::new(Vec::new());

        let mut graph = TaskGraph::new("diamond");
        let root = graph.add_task("root", || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let workers: Vec<TaskHandle> = (0..8)
            .map(|i| {
                let finished = &finished_before_join;
                let counter = &counter;
                graph.add_task(format!("worker-{i}"), move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    finished.lock().push(i);
                })
            })
            .collect();
        let join = graph.add_task("join", || {
            assert_eq!(finished_before_join.lock().len(), 8);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        for worker in &workers {
            graph.add_edge(root, *worker);
        }
        graph.add_edges(&workers, join);
        // 重复的边会被忽略
        graph.add_edge(root, workers[0]);

        graph.sort().unwrap().execute(&pool());
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = TaskGraph::new("cycle");
        let a = graph.add_task("a", || {});
        let b = graph.add_task("b", || {});
        graph.add_edge(a, b);
        graph.add_edge(b, a);

        let err = graph.sort().err().unwrap();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_tasks_write_borrowed_data() {
        let mut slots = vec![0_u32; 4];
        {
            let (left, right) = slots.split_at_mut(2);
            let mut graph = TaskGraph::new("borrow");
            graph.add_task("left", move || left.fill(1));
            graph.add_task("right", move || right.fill(2));
            graph.sort().unwrap().execute(&pool());
        }
        assert_eq!(slots, vec![1, 1, 2, 2]);
    }
}
