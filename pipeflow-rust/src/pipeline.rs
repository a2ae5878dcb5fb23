use crate::{
    edge::{AbortHandle, AbortSignal, Edge},
    error::{Error, Result},
    node::Node,
    port::PortInfo,
    process::{Process, State},
    registry::Registry,
};
use indexmap::IndexMap;
use log::{debug, info};
use pipeflow_config::{ConfigBlock, GraphConfig, Ident, IntoIdent, IntoPortAddr, PortAddr};
use serde_loader::Json5Path;
use std::{
    fs::File,
    io::{self, BufWriter},
    path::Path,
};

/// An edge together with the ports it connects.
#[derive(Debug, Clone)]
pub struct Link {
    pub from: PortAddr,
    pub to: PortAddr,
    pub edge: Edge,
}

/// A graph of configured processes connected by edges.
///
/// Processes are configured when they are added, so that their ports
/// are known when they are connected. [setup](Pipeline::setup)
/// initializes every process; a [scheduler](crate::scheduler) does so
/// implicitly before running.
#[derive(Debug)]
pub struct Pipeline {
    nodes: IndexMap<Ident, Node>,
    links: Vec<Link>,
    abort: AbortHandle,
    signal: AbortSignal,
    initialized: bool,
}

fn load_config(file: &Path) -> anyhow::Result<GraphConfig> {
    Ok(Json5Path::open_and_take(file)?)
}

impl Pipeline {
    pub fn new() -> Self {
        let (abort, signal) = AbortHandle::new();
        Self {
            nodes: IndexMap::new(),
            links: vec![],
            abort,
            signal,
            initialized: false,
        }
    }

    /// Open a pipeline configuration file in JSON5 format.
    pub fn open<F>(file: F, registry: &Registry) -> Result<Self>
    where
        F: AsRef<Path>,
    {
        let config = load_config(file.as_ref())?;
        Self::from_config(&config, registry)
    }

    /// Construct a pipeline from configuration data.
    ///
    /// Every process is created from the registry and configured, and
    /// every connection becomes an edge.
    pub fn from_config(config: &GraphConfig, registry: &Registry) -> Result<Self> {
        config.validate().map_err(|err| {
            Error::configuration("pipeline", "connections", None, format!("{:#}", err))
        })?;

        let mut pipeline = Self::new();

        for (name, process) in &config.processes {
            pipeline.create_process(name, &process.kind, process.config.clone(), registry)?;
        }

        for conn in &config.connections {
            pipeline.connect(&conn.from, &conn.to, config.capacity_of(conn))?;
        }

        info!(
            "pipeline constructed with {} processes and {} edges",
            pipeline.nodes.len(),
            pipeline.links.len()
        );
        Ok(pipeline)
    }

    /// Create a process from the registry and add it.
    pub fn create_process(
        &mut self,
        name: impl IntoIdent,
        kind: &str,
        config: ConfigBlock,
        registry: &Registry,
    ) -> Result<()> {
        let name = name.into();
        let process = registry.create_process(kind, &config).map_err(|err| match err {
            Error::Config(err) => Error::from_config_error(&name, err),
            err => err,
        })?;
        self.add_process(name, kind, process, config)
    }

    /// Add a process instance and configure it.
    pub fn add_process(
        &mut self,
        name: impl IntoIdent,
        kind: &str,
        process: Box<dyn Process>,
        config: ConfigBlock,
    ) -> Result<()> {
        let name = name.into();
        if self.initialized {
            return Err(Error::invalid_transition(&name, State::Created, State::Configured));
        }
        if self.nodes.contains_key(&name) {
            return Err(Error::configuration(
                "pipeline",
                "processes",
                Some(name.to_string()),
                "the process name is used twice",
            ));
        }

        let mut node = Node::new(&name, kind, process, config);
        node.configure()?;
        debug!("process `{}` of type `{}` added", name, kind);
        self.nodes.insert(name, node);
        Ok(())
    }

    /// Connect an output port to an input port with an edge of `capacity`.
    pub fn connect(
        &mut self,
        from: impl IntoPortAddr,
        to: impl IntoPortAddr,
        capacity: usize,
    ) -> Result<()> {
        let from = from.into();
        let to = to.into();

        let from_type = {
            let node = self
                .nodes
                .get(from.process())
                .ok_or_else(|| Error::process_not_found(from.process()))?;
            let port = node
                .ports()
                .output(from.port().as_str())
                .ok_or_else(|| Error::output_not_found(from.process(), from.port()))?;
            port.info().type_name.clone()
        };
        let to_type = {
            let node = self
                .nodes
                .get(to.process())
                .ok_or_else(|| Error::process_not_found(to.process()))?;
            let port = node
                .ports()
                .input(to.port().as_str())
                .ok_or_else(|| Error::input_not_found(to.process(), to.port()))?;
            port.info().type_name.clone()
        };

        if !PortInfo::types_compatible(&from_type, &to_type) {
            return Err(Error::configuration(
                to.process(),
                to.port().as_str(),
                Some(from.to_string()),
                format!(
                    "port type `{}` cannot be fed from port type `{}`",
                    to_type, from_type
                ),
            ));
        }

        let edge = Edge::new(capacity)
            .map_err(|_| {
                Error::configuration(
                    "pipeline",
                    "capacity",
                    Some(capacity.to_string()),
                    format!("edge {} -> {} must have capacity at least 1", from, to),
                )
            })?
            .with_abort(self.signal.clone());

        self.node_mut(to.process())?
            .connect_input(to.port().as_str(), edge.clone())?;
        self.node_mut(from.process())?
            .connect_output(from.port().as_str(), edge.clone())?;

        debug!("connected {} -> {} (capacity {})", from, to, capacity);
        self.links.push(Link { from, to, edge });
        Ok(())
    }

    fn node_mut(&mut self, name: &Ident) -> Result<&mut Node> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| Error::process_not_found(name))
    }

    /// Initialize every process in declaration order.
    ///
    /// Fails on the first process with an unconnected required port or
    /// a failing initialization.
    pub fn setup(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        for node in self.nodes.values_mut() {
            node.initialize()?;
        }
        self.initialized = true;
        info!("pipeline initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Save the pipeline graph to the GraphViz DOT file.
    pub fn save_dot_file<F>(&self, file: F) -> io::Result<()>
    where
        F: AsRef<Path>,
    {
        let mut writer = BufWriter::new(File::create(file)?);
        dot::render(self, &mut writer)?;
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (IndexMap<Ident, Node>, AbortHandle) {
        (self.nodes, self.abort)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

mod graphviz {
    use super::*;
    use dot::{Edges, GraphWalk, Id, LabelText, Labeller, Nodes};
    use std::borrow::Cow;

    fn dot_id(name: &Ident) -> Id<'static> {
        // identifiers only contain alphanumerics, '-' and '_'
        Id::new(format!("p_{}", name.as_str().replace('-', "_"))).unwrap()
    }

    impl<'a> Labeller<'a, &'a Ident, &'a Link> for Pipeline {
        fn graph_id(&'a self) -> Id<'a> {
            Id::new("pipeline").unwrap()
        }

        fn node_id(&'a self, node: &&'a Ident) -> Id<'a> {
            dot_id(node)
        }

        fn node_label(&'a self, node: &&'a Ident) -> LabelText<'a> {
            let label = match self.nodes.get(*node) {
                Some(n) => format!("{} ({})", node, n.kind()),
                None => node.to_string(),
            };
            LabelText::LabelStr(Into::into(label))
        }

        fn node_shape(&'a self, _node: &&'a Ident) -> Option<LabelText<'a>> {
            Some(LabelText::LabelStr(Into::into("box")))
        }

        fn edge_label(&'a self, link: &&'a Link) -> LabelText<'a> {
            LabelText::LabelStr(Into::into(format!(
                "{} -> {} [{}]",
                link.from.port(),
                link.to.port(),
                link.edge.capacity()
            )))
        }
    }

    impl<'a> GraphWalk<'a, &'a Ident, &'a Link> for Pipeline {
        fn nodes(&'a self) -> Nodes<'a, &'a Ident> {
            Cow::Owned(self.nodes.keys().collect())
        }

        fn edges(&'a self) -> Edges<'a, &'a Link> {
            Cow::Owned(self.links.iter().collect())
        }

        fn source(&'a self, link: &&'a Link) -> &'a Ident {
            link.from.process()
        }

        fn target(&'a self, link: &&'a Link) -> &'a Ident {
            link.to.process()
        }
    }
}
