//! 有向无环任务图 - 显式依赖边、扇出/扇入、错误短路

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use crate::generator::state::{PipelineState, StateUpdate};

/// 图中的一个节点：读取状态快照，返回局部状态
#[async_trait]
pub trait PipelineNode: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, state: &PipelineState) -> StateUpdate;
}

/// 构图错误
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("graph has no nodes")]
    Empty,

    #[error("duplicate node '{0}'")]
    DuplicateNode(String),

    #[error("edge references unknown node '{0}'")]
    UnknownNode(String),

    #[error("graph contains a cycle through node '{0}'")]
    Cycle(String),
}

/// 图构建器
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<Arc<dyn PipelineNode>>,
    edges: Vec<(&'static str, &'static str)>,
}

impl GraphBuilder {
    pub fn node(mut self, node: Arc<dyn PipelineNode>) -> Self {
        self.nodes.push(node);
        self
    }

    /// `to`在`from`完成后才可执行
    pub fn edge(mut self, from: &'static str, to: &'static str) -> Self {
        self.edges.push((from, to));
        self
    }

    pub fn build(self) -> Result<Graph, GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut upstream: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        let mut downstream: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        for node in &self.nodes {
            let name = node.name();
            if upstream.insert(name, Vec::new()).is_some() {
                return Err(GraphError::DuplicateNode(name.to_string()));
            }
            downstream.insert(name, Vec::new());
        }

        for (from, to) in &self.edges {
            for endpoint in [from, to] {
                if !upstream.contains_key(endpoint) {
                    return Err(GraphError::UnknownNode(endpoint.to_string()));
                }
            }
            downstream.entry(from).or_default().push(to);
            upstream.entry(to).or_default().push(from);
        }

        let graph = Graph {
            nodes: self.nodes,
            upstream,
            downstream,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }
}

/// 编排图
pub struct Graph {
    /// 按插入顺序保存，决定同批就绪节点的调度顺序
    nodes: Vec<Arc<dyn PipelineNode>>,
    upstream: HashMap<&'static str, Vec<&'static str>>,
    downstream: HashMap<&'static str, Vec<&'static str>>,
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    pub fn node_names(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    /// 没有上游的入口节点
    pub fn entry_points(&self) -> Vec<&'static str> {
        self.node_names()
            .into_iter()
            .filter(|name| self.upstream(name).is_empty())
            .collect()
    }

    pub fn upstream(&self, name: &str) -> &[&'static str] {
        self.upstream.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn downstream(&self, name: &str) -> &[&'static str] {
        self.downstream.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Kahn算法检测环
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.name(), self.upstream(n.name()).len()))
            .collect();
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut visited = 0;
        while let Some(name) = queue.pop_front() {
            visited += 1;
            for next in self.downstream(name) {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        if visited == self.nodes.len() {
            return Ok(());
        }
        let culprit = self
            .nodes
            .iter()
            .map(|n| n.name())
            .find(|name| in_degree.get(name).is_some_and(|d| *d > 0))
            .unwrap_or_default();
        Err(GraphError::Cycle(culprit.to_string()))
    }

    /// 所有上游均已完成、且尚未调度的节点
    fn find_ready_nodes(
        &self,
        completed: &HashSet<&'static str>,
        scheduled: &HashSet<&'static str>,
    ) -> Vec<Arc<dyn PipelineNode>> {
        self.nodes
            .iter()
            .filter(|node| !scheduled.contains(node.name()))
            .filter(|node| {
                self.upstream(node.name())
                    .iter()
                    .all(|up| completed.contains(up))
            })
            .cloned()
            .collect()
    }

    /// 执行整张图，返回合并后的最终状态
    ///
    /// 就绪节点以独立任务并发执行，每个节点拿到调度时刻的状态快照。
    /// 任一节点返回错误时立即终止：取消仍在执行的兄弟节点，下游节点不再调度。
    pub async fn run(&self, initial_state: PipelineState) -> PipelineState {
        let mut state = initial_state;
        if state.is_failed() {
            return state;
        }

        let run_started = Instant::now();
        let mut completed: HashSet<&'static str> = HashSet::new();
        let mut scheduled: HashSet<&'static str> = HashSet::new();
        let mut abort_handles: HashMap<&'static str, AbortHandle> = HashMap::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            let ready = self.find_ready_nodes(&completed, &scheduled);
            if !ready.is_empty() {
                let snapshot = Arc::new(state.clone());
                for node in ready {
                    let name = node.name();
                    scheduled.insert(name);
                    info!(node = name, "▶️ 节点开始执行");

                    let snapshot = Arc::clone(&snapshot);
                    let handle = tokio::spawn(async move {
                        let started = Instant::now();
                        let update = node.run(&snapshot).await;
                        (update, started.elapsed())
                    });
                    abort_handles.insert(name, handle.abort_handle());
                    in_flight.push(async move { (name, handle.await) });
                }
            }

            let Some((name, joined)) = in_flight.next().await else {
                break;
            };
            abort_handles.remove(name);

            let update = match joined {
                Ok((update, elapsed)) => {
                    info!(
                        node = name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "✅ 节点执行完成"
                    );
                    update
                }
                Err(e) => {
                    error!(node = name, error = %e, "节点任务异常退出");
                    StateUpdate::error(format!("node '{}' panicked: {}", name, e))
                }
            };

            let failed = update.has_error();
            state.merge(update);
            completed.insert(name);

            if failed {
                error!(
                    node = name,
                    error = state.error.as_deref().unwrap_or_default(),
                    "❌ 检测到错误，终止编排"
                );
                for (sibling, handle) in abort_handles.drain() {
                    warn!(node = sibling, "取消执行中的节点");
                    handle.abort();
                }
                break;
            }
        }

        log_summary(&completed, self.nodes.len(), run_started.elapsed());
        state
    }
}

fn log_summary(completed: &HashSet<&'static str>, total: usize, elapsed: Duration) {
    info!(
        completed = completed.len(),
        total,
        elapsed_ms = elapsed.as_millis() as u64,
        "编排结束"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FnNode<F> {
        name: &'static str,
        f: F,
    }

    #[async_trait]
    impl<F, Fut> PipelineNode for FnNode<F>
    where
        F: Fn(PipelineState) -> Fut + Send + Sync,
        Fut: Future<Output = StateUpdate> + Send,
    {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, state: &PipelineState) -> StateUpdate {
            (self.f)(state.clone()).await
        }
    }

    fn node<F, Fut>(name: &'static str, f: F) -> Arc<dyn PipelineNode>
    where
        F: Fn(PipelineState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StateUpdate> + Send + 'static,
    {
        Arc::new(FnNode { name, f })
    }

    fn noop(name: &'static str) -> Arc<dyn PipelineNode> {
        node(name, |_| async { StateUpdate::default() })
    }

    #[test]
    fn test_build_rejects_invalid_graphs() {
        assert_eq!(Graph::builder().build().err(), Some(GraphError::Empty));

        let duplicate = Graph::builder().node(noop("a")).node(noop("a")).build();
        assert_eq!(duplicate.err(), Some(GraphError::DuplicateNode("a".into())));

        let unknown = Graph::builder().node(noop("a")).edge("a", "b").build();
        assert_eq!(unknown.err(), Some(GraphError::UnknownNode("b".into())));

        let cycle = Graph::builder()
            .node(noop("a"))
            .node(noop("b"))
            .node(noop("c"))
            .edge("a", "b")
            .edge("b", "c")
            .edge("c", "b")
            .build();
        assert!(matches!(cycle.err(), Some(GraphError::Cycle(_))));
    }

    #[test]
    fn test_entry_points_and_edges() {
        let graph = Graph::builder()
            .node(noop("left"))
            .node(noop("right"))
            .node(noop("join"))
            .edge("left", "join")
            .edge("right", "join")
            .build()
            .unwrap();

        assert_eq!(graph.entry_points(), vec!["left", "right"]);
        assert_eq!(graph.upstream("join"), &["left", "right"]);
        assert_eq!(graph.downstream("left"), &["join"]);
    }

    #[tokio::test]
    async fn test_join_sees_both_branches() {
        let graph = Graph::builder()
            .node(node("slow", |_| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                StateUpdate::extracted(json!({"extracted_data": {"spx": "+1%"}}))
            }))
            .node(node("fast", |_| async { StateUpdate::charts(vec![]) }))
            .node(node("join", |state| async move {
                let both = state.extracted_data.is_some() && state.chart_data.is_some();
                StateUpdate::report_context(both.to_string())
            }))
            .edge("slow", "join")
            .edge("fast", "join")
            .build()
            .unwrap();

        let state = graph.run(PipelineState::new(json!({}))).await;
        assert!(!state.is_failed());
        assert_eq!(state.report_context.as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_branches_run_concurrently() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let left_barrier = barrier.clone();
        let right_barrier = barrier.clone();

        let graph = Graph::builder()
            .node(node("left", move |_| {
                let barrier = left_barrier.clone();
                async move {
                    barrier.wait().await;
                    StateUpdate::default()
                }
            }))
            .node(node("right", move |_| {
                let barrier = right_barrier.clone();
                async move {
                    barrier.wait().await;
                    StateUpdate::default()
                }
            }))
            .build()
            .unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            graph.run(PipelineState::new(json!({}))),
        )
        .await;
        assert!(result.is_ok(), "both branches must be in flight at the same time");
    }

    #[tokio::test]
    async fn test_error_skips_downstream_and_cancels_siblings() {
        let join_runs = Arc::new(AtomicUsize::new(0));
        let sibling_finished = Arc::new(AtomicUsize::new(0));
        let join_counter = join_runs.clone();
        let sibling_counter = sibling_finished.clone();

        let graph = Graph::builder()
            .node(node("failing", |_| async {
                StateUpdate::error("Error extracting data: connection refused")
            }))
            .node(node("slow", move |_| {
                let counter = sibling_counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    StateUpdate::charts(vec![])
                }
            }))
            .node(node("join", move |_| {
                let counter = join_counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StateUpdate::report_context("unreachable".into())
                }
            }))
            .edge("failing", "join")
            .edge("slow", "join")
            .build()
            .unwrap();

        let state = tokio::time::timeout(
            Duration::from_secs(5),
            graph.run(PipelineState::new(json!({}))),
        )
        .await
        .expect("run must terminate without waiting for the slow sibling");

        assert_eq!(
            state.error.as_deref(),
            Some("Error extracting data: connection refused")
        );
        assert!(state.report_context.is_none());
        assert_eq!(join_runs.load(Ordering::SeqCst), 0);
        assert_eq!(sibling_finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_node_becomes_error() {
        let graph = Graph::builder()
            .node(node("boom", |_| async {
                panic!("node exploded");
            }))
            .build()
            .unwrap();

        let state = graph.run(PipelineState::new(json!({}))).await;
        assert!(state.is_failed());
        assert!(state.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_failed_initial_state_runs_nothing() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let graph = Graph::builder()
            .node(node("only", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StateUpdate::default()
                }
            }))
            .build()
            .unwrap();

        let mut initial = PipelineState::new(json!({}));
        initial.error = Some("bad input".into());
        let state = graph.run(initial).await;
        assert_eq!(state.error.as_deref(), Some("bad input"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
