//! Frame graph definition and compilation

use crate::backend::traits::BackendError;
use crate::backend::types::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use thiserror::Error;

/// Frame graph errors
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Cyclic dependency between passes: {0:?}")]
    CyclicDependency(Vec<String>),
    #[error("Invalid pass handle {0:?}")]
    InvalidPassHandle(PassId),
    #[error("Invalid resource handle {0:?}")]
    InvalidResourceHandle(ResourceId),
    #[error("Pass '{pass}' reads '{resource}' before any pass writes it")]
    UninitializedRead { pass: String, resource: String },
    #[error("Imported resource '{0}' has no physical resource bound")]
    MissingImport(String),
    #[error("Resource '{0}' is not a {1}")]
    ResourceKindMismatch(String, &'static str),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Why one pass must run after another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    /// Read after write; the reader keeps the writer alive
    Data,
    /// Write after write or write after read; ordering only
    Order,
    /// Added with [`FrameGraph::add_dependency`]
    Explicit,
}

/// The frame graph: resources, passes and the accesses linking them.
///
/// Rebuilt every frame. Dependencies come from access declarations in
/// declaration order, so a pass always runs after the passes declared before
/// it that touch the same resources.
#[derive(Debug, Default)]
pub struct FrameGraph {
    resources: Vec<ResourceNode>,
    passes: Vec<PassNode>,
    /// `(dependency, dependent)`
    explicit_edges: Vec<(PassId, PassId)>,
}

impl FrameGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything declared, keeping allocations for the next frame
    pub fn clear(&mut self) {
        self.resources.clear();
        self.passes.clear();
        self.explicit_edges.clear();
    }

    fn declare(&mut self, name: &str, resource: VirtualResource, lifetime: ResourceLifetime) -> ResourceId {
        let id = ResourceId(self.resources.len() as u32);
        self.resources.push(ResourceNode {
            name: name.to_string(),
            resource,
            lifetime,
        });
        id
    }

    /// Texture kept alive until [`FrameGraphExecutor::end_frame`](crate::render_graph::FrameGraphExecutor::end_frame)
    pub fn declare_texture(&mut self, name: &str, desc: TextureDescriptor) -> ResourceId {
        self.declare(name, VirtualResource::Texture(desc), ResourceLifetime::Persistent)
    }

    /// Buffer kept alive until the end of the frame
    pub fn declare_buffer(&mut self, name: &str, desc: BufferDescriptor) -> ResourceId {
        self.declare(name, VirtualResource::Buffer(desc), ResourceLifetime::Persistent)
    }

    /// Resource released right after the last pass that uses it
    pub fn declare_transient(&mut self, name: &str, resource: VirtualResource) -> ResourceId {
        self.declare(name, resource, ResourceLifetime::Transient)
    }

    /// Texture owned by the host; bind it on the executor before executing
    pub fn import_texture(&mut self, name: &str, desc: TextureDescriptor) -> ResourceId {
        self.declare(name, VirtualResource::Texture(desc), ResourceLifetime::Imported)
    }

    pub fn import_buffer(&mut self, name: &str, desc: BufferDescriptor) -> ResourceId {
        self.declare(name, VirtualResource::Buffer(desc), ResourceLifetime::Imported)
    }

    /// Add a pass. Passes are cullable until told otherwise.
    pub fn add_pass(&mut self, name: &str, pass: Pass) -> PassId {
        let id = PassId(self.passes.len() as u32);
        self.passes.push(PassNode {
            name: name.to_string(),
            pass,
            accesses: Vec::new(),
            cullable: true,
        });
        id
    }

    /// Declare that `pass` accesses `resource`
    pub fn use_resource(&mut self, pass: PassId, resource: ResourceId, mode: AccessMode) -> GraphResult<()> {
        self.resource_node(resource)?;
        let node = self
            .passes
            .get_mut(pass.index())
            .ok_or(GraphError::InvalidPassHandle(pass))?;
        match node.accesses.iter_mut().find(|(id, _)| *id == resource) {
            Some((_, existing)) if *existing != mode => *existing = AccessMode::ReadWrite,
            Some(_) => {}
            None => node.accesses.push((resource, mode)),
        }
        Ok(())
    }

    pub fn allow_pass_culling(&mut self, pass: PassId, allow: bool) -> GraphResult<()> {
        let node = self
            .passes
            .get_mut(pass.index())
            .ok_or(GraphError::InvalidPassHandle(pass))?;
        node.cullable = allow;
        Ok(())
    }

    /// Force `dependent` to run after `dependency`
    pub fn add_dependency(&mut self, dependent: PassId, dependency: PassId) -> GraphResult<()> {
        for pass in [dependent, dependency] {
            if pass.index() >= self.passes.len() {
                return Err(GraphError::InvalidPassHandle(pass));
            }
        }
        if dependent == dependency {
            return Err(GraphError::CyclicDependency(vec![self.passes[dependent.index()].name.clone()]));
        }
        self.explicit_edges.push((dependency, dependent));
        Ok(())
    }

    pub fn resource_node(&self, resource: ResourceId) -> GraphResult<&ResourceNode> {
        self.resources
            .get(resource.index())
            .ok_or(GraphError::InvalidResourceHandle(resource))
    }

    pub fn pass_node(&self, pass: PassId) -> GraphResult<&PassNode> {
        self.passes
            .get(pass.index())
            .ok_or(GraphError::InvalidPassHandle(pass))
    }

    pub fn resources(&self) -> &[ResourceNode] {
        &self.resources
    }

    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.passes
    }

    /// Look a pass up by name
    pub fn find_pass(&self, name: &str) -> Option<PassId> {
        self.passes
            .iter()
            .position(|node| node.name == name)
            .map(|index| PassId(index as u32))
    }

    fn edges(&self) -> GraphResult<Vec<(usize, usize, EdgeKind)>> {
        #[derive(Default, Clone)]
        struct Tracking {
            last_writer: Option<usize>,
            readers: Vec<usize>,
        }

        let mut tracking = vec![Tracking::default(); self.resources.len()];
        let mut edges = Vec::new();

        for (pass_index, node) in self.passes.iter().enumerate() {
            for &(resource, mode) in &node.accesses {
                let state = &mut tracking[resource.index()];
                let resource_node = &self.resources[resource.index()];

                if mode.reads() {
                    match state.last_writer {
                        Some(writer) if writer != pass_index => {
                            edges.push((writer, pass_index, EdgeKind::Data));
                        }
                        Some(_) => {}
                        None if resource_node.lifetime == ResourceLifetime::Imported => {}
                        None => {
                            return Err(GraphError::UninitializedRead {
                                pass: node.name.clone(),
                                resource: resource_node.name.clone(),
                            });
                        }
                    }
                }

                if mode.writes() {
                    if let Some(writer) = state.last_writer.filter(|&w| w != pass_index) {
                        edges.push((writer, pass_index, EdgeKind::Order));
                    }
                    for &reader in state.readers.iter().filter(|&&r| r != pass_index) {
                        edges.push((reader, pass_index, EdgeKind::Order));
                    }
                    state.last_writer = Some(pass_index);
                    state.readers.clear();
                }

                if mode.reads() && !mode.writes() {
                    state.readers.push(pass_index);
                }
            }
        }

        edges.extend(
            self.explicit_edges
                .iter()
                .map(|(dependency, dependent)| (dependency.index(), dependent.index(), EdgeKind::Explicit)),
        );
        Ok(edges)
    }

    fn is_root(&self, node: &PassNode) -> bool {
        !node.cullable
            || node.accesses.iter().any(|(resource, mode)| {
                mode.writes() && self.resources[resource.index()].lifetime != ResourceLifetime::Transient
            })
    }

    /// Order the passes, cull the unused ones and plan resource lifetimes.
    pub fn compile(&self) -> GraphResult<CompiledGraph> {
        let pass_count = self.passes.len();
        let edges = self.edges()?;

        // Topological sort using Kahn's algorithm, declaration order breaks ties
        let mut successors = vec![Vec::new(); pass_count];
        let mut in_degree = vec![0usize; pass_count];
        for &(from, to, _) in &edges {
            successors[from].push(to);
            in_degree[to] += 1;
        }

        let mut queue: BinaryHeap<Reverse<usize>> = (0..pass_count)
            .filter(|&pass| in_degree[pass] == 0)
            .map(Reverse)
            .collect();
        let mut sorted = Vec::with_capacity(pass_count);
        while let Some(Reverse(pass)) = queue.pop() {
            sorted.push(pass);
            for &next in &successors[pass] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push(Reverse(next));
                }
            }
        }

        if sorted.len() != pass_count {
            let stuck = (0..pass_count)
                .filter(|&pass| in_degree[pass] > 0)
                .map(|pass| self.passes[pass].name.clone())
                .collect();
            return Err(GraphError::CyclicDependency(stuck));
        }

        // Liveness flows backwards from the roots along data and explicit edges
        let mut producers = vec![Vec::new(); pass_count];
        for &(from, to, kind) in &edges {
            if kind != EdgeKind::Order {
                producers[to].push(from);
            }
        }
        let mut live = vec![false; pass_count];
        let mut stack: Vec<usize> = (0..pass_count)
            .filter(|&pass| self.is_root(&self.passes[pass]))
            .collect();
        while let Some(pass) = stack.pop() {
            if live[pass] {
                continue;
            }
            live[pass] = true;
            stack.extend(producers[pass].iter().copied().filter(|&p| !live[p]));
        }

        let pass_order: Vec<PassId> = sorted
            .iter()
            .filter(|&&pass| live[pass])
            .map(|&pass| PassId(pass as u32))
            .collect();
        let culled: Vec<PassId> = sorted
            .iter()
            .filter(|&&pass| !live[pass])
            .map(|&pass| PassId(pass as u32))
            .collect();

        // Determine resource lifetimes
        let mut resource_spans: HashMap<ResourceId, ResourceSpan> = HashMap::new();
        for (step, pass) in pass_order.iter().enumerate() {
            for &(resource, _) in &self.passes[pass.index()].accesses {
                let span = resource_spans.entry(resource).or_insert(ResourceSpan {
                    first_use: step,
                    last_use: step,
                });
                span.last_use = step;
            }
        }

        let mut allocations = vec![Vec::new(); pass_order.len()];
        let mut releases = vec![Vec::new(); pass_order.len()];
        let mut ordered: Vec<_> = resource_spans.iter().collect();
        ordered.sort_by_key(|(resource, _)| **resource);
        for (&resource, span) in ordered {
            match self.resources[resource.index()].lifetime {
                ResourceLifetime::Transient => {
                    allocations[span.first_use].push(resource);
                    releases[span.last_use].push(resource);
                }
                ResourceLifetime::Persistent => allocations[span.first_use].push(resource),
                ResourceLifetime::Imported => {}
            }
        }

        if !culled.is_empty() {
            log::debug!(
                "Frame graph culled {} pass(es): {:?}",
                culled.len(),
                culled
                    .iter()
                    .map(|pass| self.passes[pass.index()].name.as_str())
                    .collect::<Vec<_>>()
            );
        }

        Ok(CompiledGraph {
            pass_order,
            culled,
            resource_spans,
            allocations,
            releases,
        })
    }
}

/// Resource lifetime in terms of pass execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSpan {
    pub first_use: usize,
    pub last_use: usize,
}

/// Compiled frame graph with execution order and resource lifetimes
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    pass_order: Vec<PassId>,
    culled: Vec<PassId>,
    resource_spans: HashMap<ResourceId, ResourceSpan>,
    allocations: Vec<Vec<ResourceId>>,
    releases: Vec<Vec<ResourceId>>,
}

impl CompiledGraph {
    /// Passes to run, in order
    pub fn pass_order(&self) -> &[PassId] {
        &self.pass_order
    }

    pub fn culled_passes(&self) -> &[PassId] {
        &self.culled
    }

    pub fn is_culled(&self, pass: PassId) -> bool {
        self.culled.contains(&pass)
    }

    /// Steps of the first and last pass using `resource`, if any live pass does
    pub fn span(&self, resource: ResourceId) -> Option<ResourceSpan> {
        self.resource_spans.get(&resource).copied()
    }

    /// Check if a resource is alive at a given execution step
    pub fn is_resource_alive(&self, resource: ResourceId, step: usize) -> bool {
        if let Some(span) = self.resource_spans.get(&resource) {
            step >= span.first_use && step <= span.last_use
        } else {
            false
        }
    }

    /// Resources to materialize before running step `step`
    pub fn allocations_before(&self, step: usize) -> &[ResourceId] {
        self.allocations.get(step).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Transient resources to release after step `step`
    pub fn releases_after(&self, step: usize) -> &[ResourceId] {
        self.releases.get(step).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer() -> Pass {
        Pass::Transfer(TransferPass::new())
    }

    fn buffer(size: u64) -> VirtualResource {
        VirtualResource::Buffer(BufferDescriptor::storage("b", size))
    }

    #[test]
    fn empty_graph_compiles() {
        let compiled = FrameGraph::new().compile().unwrap();
        assert!(compiled.pass_order().is_empty());
        assert!(compiled.allocations_before(0).is_empty());
    }

    #[test]
    fn reader_runs_after_writer_declared_earlier() {
        let mut graph = FrameGraph::new();
        let data = graph.declare_transient("data", buffer(64));
        let out = graph.declare_buffer("out", BufferDescriptor::storage("out", 64));

        let write = graph.add_pass("write", transfer());
        let read = graph.add_pass("read", transfer());
        graph.use_resource(write, data, AccessMode::Write).unwrap();
        graph.use_resource(read, data, AccessMode::Read).unwrap();
        graph.use_resource(read, out, AccessMode::Write).unwrap();

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_order(), &[write, read]);
        assert_eq!(compiled.allocations_before(0), &[data]);
        assert_eq!(compiled.allocations_before(1), &[out]);
        assert_eq!(compiled.releases_after(1), &[data]);
        assert!(compiled.is_resource_alive(data, 1));
        assert_eq!(compiled.span(out), Some(ResourceSpan { first_use: 1, last_use: 1 }));
    }

    #[test]
    fn reading_unwritten_resource_fails() {
        let mut graph = FrameGraph::new();
        let data = graph.declare_transient("data", buffer(16));
        let read = graph.add_pass("read", transfer());
        graph.use_resource(read, data, AccessMode::Read).unwrap();
        assert!(matches!(
            graph.compile(),
            Err(GraphError::UninitializedRead { .. })
        ));
    }

    #[test]
    fn imported_resources_may_be_read_first() {
        let mut graph = FrameGraph::new();
        let depth = graph.import_texture("depth", TextureDescriptor::depth_2d("depth", 4, 4));
        let pass = graph.add_pass("read", transfer());
        graph.use_resource(pass, depth, AccessMode::Read).unwrap();
        graph.allow_pass_culling(pass, false).unwrap();

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_order(), &[pass]);
        assert!(compiled.allocations_before(0).is_empty());
        assert!(compiled.releases_after(0).is_empty());
    }

    #[test]
    fn passes_without_consumers_are_culled() {
        let mut graph = FrameGraph::new();
        let scratch = graph.declare_transient("scratch", buffer(16));
        let kept = graph.declare_buffer("kept", BufferDescriptor::storage("kept", 16));

        let unused = graph.add_pass("unused", transfer());
        let root = graph.add_pass("root", transfer());
        graph.use_resource(unused, scratch, AccessMode::Write).unwrap();
        graph.use_resource(root, kept, AccessMode::Write).unwrap();

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_order(), &[root]);
        assert_eq!(compiled.culled_passes(), &[unused]);
        assert!(compiled.span(scratch).is_none());

        graph.allow_pass_culling(unused, false).unwrap();
        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_order(), &[unused, root]);
    }

    #[test]
    fn write_after_read_does_not_keep_the_writer_alive() {
        let mut graph = FrameGraph::new();
        let data = graph.declare_transient("data", buffer(16));
        let out = graph.declare_buffer("out", BufferDescriptor::storage("out", 16));

        let produce = graph.add_pass("produce", transfer());
        let consume = graph.add_pass("consume", transfer());
        let overwrite = graph.add_pass("overwrite", transfer());
        graph.use_resource(produce, data, AccessMode::Write).unwrap();
        graph.use_resource(consume, data, AccessMode::Read).unwrap();
        graph.use_resource(consume, out, AccessMode::Write).unwrap();
        graph.use_resource(overwrite, data, AccessMode::Write).unwrap();

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_order(), &[produce, consume]);
        assert_eq!(compiled.culled_passes(), &[overwrite]);
    }

    #[test]
    fn explicit_dependency_reorders_and_detects_cycles() {
        let mut graph = FrameGraph::new();
        let a = graph.add_pass("a", transfer());
        let b = graph.add_pass("b", transfer());
        graph.allow_pass_culling(a, false).unwrap();
        graph.allow_pass_culling(b, false).unwrap();

        graph.add_dependency(a, b).unwrap();
        assert_eq!(graph.compile().unwrap().pass_order(), &[b, a]);

        graph.add_dependency(b, a).unwrap();
        match graph.compile() {
            Err(GraphError::CyclicDependency(names)) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("expected a cycle, got {other:?}"),
        }
        assert!(matches!(
            graph.add_dependency(a, a),
            Err(GraphError::CyclicDependency(_))
        ));
    }

    #[test]
    fn invalid_handles_are_rejected() {
        let mut graph = FrameGraph::new();
        let pass = graph.add_pass("p", transfer());
        assert!(matches!(
            graph.use_resource(pass, ResourceId(9), AccessMode::Read),
            Err(GraphError::InvalidResourceHandle(_))
        ));
        let data = graph.declare_transient("data", buffer(16));
        assert!(matches!(
            graph.use_resource(PassId(4), data, AccessMode::Read),
            Err(GraphError::InvalidPassHandle(_))
        ));
        assert!(matches!(
            graph.add_dependency(pass, PassId(7)),
            Err(GraphError::InvalidPassHandle(_))
        ));
    }

    #[test]
    fn repeated_access_merges_modes() {
        let mut graph = FrameGraph::new();
        let data = graph.declare_buffer("data", BufferDescriptor::storage("d", 16));
        let pass = graph.add_pass("p", transfer());
        graph.use_resource(pass, data, AccessMode::Write).unwrap();
        graph.use_resource(pass, data, AccessMode::Read).unwrap();
        assert_eq!(graph.pass_node(pass).unwrap().accesses, vec![(data, AccessMode::ReadWrite)]);
    }

    #[test]
    fn independent_passes_keep_declaration_order() {
        let mut graph = FrameGraph::new();
        let passes: Vec<_> = (0..5)
            .map(|i| {
                let pass = graph.add_pass(&format!("p{i}"), transfer());
                graph.allow_pass_culling(pass, false).unwrap();
                pass
            })
            .collect();
        assert_eq!(graph.compile().unwrap().pass_order(), passes.as_slice());
    }
}
