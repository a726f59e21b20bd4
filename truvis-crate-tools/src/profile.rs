/// 在当前作用域内开启一个 tracy span
///
/// 与 `tracy_client::span!` 不同，没有运行中的 tracy client 时不会 panic，
/// 而是什么也不做，因此可以放心地在库代码和单元测试中使用。
///
/// ```ignore
/// fn build() {
///     truvis_crate_tools::profile_scope!("SceneGraph::build");
///     // ...
/// }
/// ```
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::tracy_client::Client::running()
            .map(|client| client.span_alloc(Some($name), module_path!(), file!(), line!(), 0));
    };
}

/// 启动 tracy client，只应该在可执行程序的入口处调用
pub fn start_profiler() {
    let _ = tracy_client::Client::start();
}
