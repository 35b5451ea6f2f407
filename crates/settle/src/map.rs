//! Map nodes: derive a value from one or more inputs.

use std::any::Any;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::cycle::detect_cycle_if_linked_erased;
use crate::incr::Incr;
use crate::node::{link, ErasedIncr, ErasedNode, NodeCaps, NodeMeta};
use crate::scope::Scope;
use crate::{Context, GraphError, Identifier};

fn map_caps() -> NodeCaps {
    NodeCaps {
        has_stabilize: true,
        ..Default::default()
    }
}

fn missing_input(meta: &NodeMeta) -> GraphError {
    GraphError::MissingDependency {
        description: format!("input of {} has no value yet", meta.describe()),
    }
}

impl Scope {
    /// Apply `f` to the value of `input`.
    pub fn map<A, B>(&self, input: &Incr<A>, f: impl Fn(&A) -> B + Send + Sync + 'static) -> Incr<B>
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
    {
        let node = Arc::new(MapNode {
            meta: NodeMeta::new("map", self.clone(), map_caps()),
            input: input.clone(),
            f: Box::new(f),
            value: RwLock::new(None),
        });
        let erased: ErasedIncr = node.clone();
        link(&erased, input.erased());
        Incr::from_erased(erased)
    }

    /// Apply `f` to the values of two inputs.
    pub fn map2<A, B, C>(
        &self,
        a: &Incr<A>,
        b: &Incr<B>,
        f: impl Fn(&A, &B) -> C + Send + Sync + 'static,
    ) -> Incr<C>
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        C: Send + Sync + 'static,
    {
        let node = Arc::new(Map2Node {
            meta: NodeMeta::new("map2", self.clone(), map_caps()),
            a: a.clone(),
            b: b.clone(),
            f: Box::new(f),
            value: RwLock::new(None),
        });
        let erased: ErasedIncr = node.clone();
        link(&erased, a.erased());
        link(&erased, b.erased());
        Incr::from_erased(erased)
    }

    /// Apply `f` to the values of three inputs.
    pub fn map3<A, B, C, D>(
        &self,
        a: &Incr<A>,
        b: &Incr<B>,
        c: &Incr<C>,
        f: impl Fn(&A, &B, &C) -> D + Send + Sync + 'static,
    ) -> Incr<D>
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        C: Send + Sync + 'static,
        D: Send + Sync + 'static,
    {
        let node = Arc::new(Map3Node {
            meta: NodeMeta::new("map3", self.clone(), map_caps()),
            a: a.clone(),
            b: b.clone(),
            c: c.clone(),
            f: Box::new(f),
            value: RwLock::new(None),
        });
        let erased: ErasedIncr = node.clone();
        link(&erased, a.erased());
        link(&erased, b.erased());
        link(&erased, c.erased());
        Incr::from_erased(erased)
    }

    /// Apply `f` to a homogeneous, growable list of inputs.
    ///
    /// Unlike the fixed-arity maps, a [`MapN`] accepts further inputs after
    /// construction through [`MapN::add_input`].
    pub fn mapn<A, B>(
        &self,
        inputs: Vec<Incr<A>>,
        f: impl Fn(&[Arc<A>]) -> B + Send + Sync + 'static,
    ) -> MapN<A, B>
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
    {
        let node = Arc::new(MapNNode {
            meta: NodeMeta::new("mapn", self.clone(), map_caps()),
            inputs: Mutex::new(inputs),
            f: Box::new(f),
            value: RwLock::new(None),
        });
        let erased: ErasedIncr = node.clone();
        for input in node.inputs.lock().iter() {
            link(&erased, input.erased());
        }
        MapN { node }
    }
}

struct MapNode<A, B> {
    meta: Arc<NodeMeta>,
    input: Incr<A>,
    f: Box<dyn Fn(&A) -> B + Send + Sync>,
    value: RwLock<Option<Arc<B>>>,
}

impl<A, B> ErasedNode for MapNode<A, B>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    fn meta(&self) -> &Arc<NodeMeta> {
        &self.meta
    }

    fn inputs(&self) -> Vec<ErasedIncr> {
        vec![self.input.erased().clone()]
    }

    fn stabilize_erased(&self, _ctx: &Context) -> Result<(), GraphError> {
        let a = self
            .input
            .value_arc()
            .ok_or_else(|| missing_input(&self.meta))?;
        let value = (self.f)(&a);
        *self.value.write() = Some(Arc::new(value));
        Ok(())
    }

    fn value_dyn(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.value
            .read()
            .clone()
            .map(|value| value as Arc<dyn Any + Send + Sync>)
    }
}

struct Map2Node<A, B, C> {
    meta: Arc<NodeMeta>,
    a: Incr<A>,
    b: Incr<B>,
    f: Box<dyn Fn(&A, &B) -> C + Send + Sync>,
    value: RwLock<Option<Arc<C>>>,
}

impl<A, B, C> ErasedNode for Map2Node<A, B, C>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn meta(&self) -> &Arc<NodeMeta> {
        &self.meta
    }

    fn inputs(&self) -> Vec<ErasedIncr> {
        vec![self.a.erased().clone(), self.b.erased().clone()]
    }

    fn stabilize_erased(&self, _ctx: &Context) -> Result<(), GraphError> {
        let a = self.a.value_arc().ok_or_else(|| missing_input(&self.meta))?;
        let b = self.b.value_arc().ok_or_else(|| missing_input(&self.meta))?;
        let value = (self.f)(&a, &b);
        *self.value.write() = Some(Arc::new(value));
        Ok(())
    }

    fn value_dyn(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.value
            .read()
            .clone()
            .map(|value| value as Arc<dyn Any + Send + Sync>)
    }
}

struct Map3Node<A, B, C, D> {
    meta: Arc<NodeMeta>,
    a: Incr<A>,
    b: Incr<B>,
    c: Incr<C>,
    f: Box<dyn Fn(&A, &B, &C) -> D + Send + Sync>,
    value: RwLock<Option<Arc<D>>>,
}

impl<A, B, C, D> ErasedNode for Map3Node<A, B, C, D>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    C: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn meta(&self) -> &Arc<NodeMeta> {
        &self.meta
    }

    fn inputs(&self) -> Vec<ErasedIncr> {
        vec![
            self.a.erased().clone(),
            self.b.erased().clone(),
            self.c.erased().clone(),
        ]
    }

    fn stabilize_erased(&self, _ctx: &Context) -> Result<(), GraphError> {
        let a = self.a.value_arc().ok_or_else(|| missing_input(&self.meta))?;
        let b = self.b.value_arc().ok_or_else(|| missing_input(&self.meta))?;
        let c = self.c.value_arc().ok_or_else(|| missing_input(&self.meta))?;
        let value = (self.f)(&a, &b, &c);
        *self.value.write() = Some(Arc::new(value));
        Ok(())
    }

    fn value_dyn(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.value
            .read()
            .clone()
            .map(|value| value as Arc<dyn Any + Send + Sync>)
    }
}

/// Handle to a variadic map node.
pub struct MapN<A, B> {
    node: Arc<MapNNode<A, B>>,
}

impl<A, B> Clone for MapN<A, B> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<A, B> MapN<A, B>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    /// The node as a graph input.
    pub fn incr(&self) -> Incr<B> {
        Incr::from_erased(self.node.clone() as ErasedIncr)
    }

    pub fn id(&self) -> Identifier {
        self.node.meta.id()
    }

    /// Add another input, rejecting edges that would create a cycle.
    ///
    /// If the node is already observed, the new edge participates in the
    /// running graph immediately (heights repaired, staleness propagated).
    pub fn add_input(&self, input: &Incr<A>) -> Result<(), GraphError> {
        let erased: ErasedIncr = self.node.clone();
        detect_cycle_if_linked_erased(&erased, input.erased())?;
        self.node.inputs.lock().push(input.clone());
        if self.node.meta.in_graph() {
            if let Some(graph) = self.node.meta.graph() {
                graph.add_child(&erased, input.erased())?;
                return Ok(());
            }
        }
        link(&erased, input.erased());
        Ok(())
    }
}

impl<A, B> std::fmt::Debug for MapN<A, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.node.meta.describe())
    }
}

struct MapNNode<A, B> {
    meta: Arc<NodeMeta>,
    inputs: Mutex<Vec<Incr<A>>>,
    f: Box<dyn Fn(&[Arc<A>]) -> B + Send + Sync>,
    value: RwLock<Option<Arc<B>>>,
}

impl<A, B> ErasedNode for MapNNode<A, B>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    fn meta(&self) -> &Arc<NodeMeta> {
        &self.meta
    }

    fn inputs(&self) -> Vec<ErasedIncr> {
        self.inputs
            .lock()
            .iter()
            .map(|input| input.erased().clone())
            .collect()
    }

    fn stabilize_erased(&self, _ctx: &Context) -> Result<(), GraphError> {
        let inputs = self.inputs.lock().clone();
        let mut values = Vec::with_capacity(inputs.len());
        for input in &inputs {
            values.push(input.value_arc().ok_or_else(|| missing_input(&self.meta))?);
        }
        let value = (self.f)(&values);
        *self.value.write() = Some(Arc::new(value));
        Ok(())
    }

    fn value_dyn(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.value
            .read()
            .clone()
            .map(|value| value as Arc<dyn Any + Send + Sync>)
    }
}
