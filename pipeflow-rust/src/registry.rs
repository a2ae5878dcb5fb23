//! Plugin factories and the registry that holds them.
//!
//! A factory is keyed by a [PluginSignature]: the interface it
//! produces, the concrete type behind it and the name it is looked up
//! by. Every factory passes the registry's [PluginFilter]s before it
//! is added; the default [DuplicateFilter] refuses a second factory
//! with the same signature and reports both origins. Factories are
//! grouped into [PluginModule]s which register through a [Registrar]
//! and are loaded at most once.

use crate::{
    error::{Error, Result},
    process::Process,
};
use derivative::Derivative;
use indexmap::{map::Entry, IndexMap, IndexSet};
use log::{debug, trace};
use pipeflow_config::ConfigBlock;
use std::{
    any::{type_name, Any},
    path::Path,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// The origin of a factory registered outside a module.
pub const HOST_ORIGIN: &str = "<host>";

type Constructor<I> = Arc<dyn Fn(&ConfigBlock) -> Result<Box<I>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginSignature {
    pub interface_type: String,
    pub concrete_type: String,
    pub name: String,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct PluginFactory {
    signature: PluginSignature,
    description: String,
    origin: String,
    #[derivative(Debug = "ignore")]
    constructor: Arc<dyn Any + Send + Sync>,
}

impl PluginFactory {
    /// A factory producing `I` objects backed by the concrete type `C`.
    pub fn new<I, C, F>(name: impl Into<String>, constructor: F) -> Self
    where
        I: ?Sized + 'static,
        C: 'static,
        F: Fn(&ConfigBlock) -> Result<Box<I>> + Send + Sync + 'static,
    {
        let constructor: Constructor<I> = Arc::new(constructor);
        Self {
            signature: PluginSignature {
                interface_type: type_name::<I>().to_string(),
                concrete_type: type_name::<C>().to_string(),
                name: name.into(),
            },
            description: String::new(),
            origin: HOST_ORIGIN.to_string(),
            constructor: Arc::new(constructor),
        }
    }

    /// A factory producing processes of type `P`.
    pub fn process<P, F>(name: impl Into<String>, constructor: F) -> Self
    where
        P: Process + 'static,
        F: Fn(&ConfigBlock) -> Result<P> + Send + Sync + 'static,
    {
        Self::new::<dyn Process, P, _>(name, move |config| {
            let process: Box<dyn Process> = Box::new(constructor(config)?);
            Ok(process)
        })
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn signature(&self) -> &PluginSignature {
        &self.signature
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn interface_type(&self) -> &str {
        &self.signature.interface_type
    }

    pub fn concrete_type(&self) -> &str {
        &self.signature.concrete_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The module or host that registered the factory.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn create<I>(&self, config: &ConfigBlock) -> Result<Box<I>>
    where
        I: ?Sized + 'static,
    {
        let constructor = self
            .constructor
            .downcast_ref::<Constructor<I>>()
            .ok_or_else(|| Error::not_found(type_name::<I>(), self.name()))?;
        constructor(config)
    }
}

/// A group of factories registered together.
pub trait PluginModule {
    fn name(&self) -> &str;

    /// The file the module was loaded from, if any.
    fn path(&self) -> Option<&Path> {
        None
    }

    fn register(&self, registrar: &Registrar<'_>) -> Result<()>;
}

/// Registration context handed to a loading module.
pub struct Registrar<'a> {
    registry: &'a Registry,
    module: &'a str,
}

impl<'a> Registrar<'a> {
    pub fn module_name(&self) -> &str {
        self.module
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// Register a factory on behalf of the module.
    pub fn register(&self, factory: PluginFactory) -> Result<Arc<PluginFactory>> {
        self.registry.register(factory.with_origin(self.module))
    }
}

/// Called after a module finished registering.
pub trait LoadHook: Send + Sync {
    fn on_load(&self, module: &str, path: Option<&Path>, registry: &Registry) -> Result<()>;
}

impl<F> LoadHook for F
where
    F: Fn(&str, Option<&Path>, &Registry) -> Result<()> + Send + Sync,
{
    fn on_load(&self, module: &str, path: Option<&Path>, registry: &Registry) -> Result<()> {
        self(module, path, registry)
    }
}

/// Decides which modules are loaded and which factories are added.
///
/// Filters run in the order they were added and the first refusal wins.
pub trait PluginFilter: Send + Sync {
    /// Whether the module may be loaded. A refused module is skipped.
    fn load_module(&self, _module: &str, _path: Option<&Path>) -> bool {
        true
    }

    /// Check a factory before it is added. An error refuses it.
    ///
    /// `existing` is the factory registered under the same signature, if any.
    fn add_factory(&self, factory: &PluginFactory, existing: Option<&PluginFactory>)
        -> Result<()>;
}

/// Refuses a factory whose signature is already registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateFilter;

impl PluginFilter for DuplicateFilter {
    fn add_factory(&self, factory: &PluginFactory, existing: Option<&PluginFactory>) -> Result<()> {
        match existing {
            Some(existing) => Err(duplicate(factory, existing)),
            None => Ok(()),
        }
    }
}

fn duplicate(factory: &PluginFactory, existing: &PluginFactory) -> Error {
    Error::DuplicatePlugin {
        interface_type: factory.signature.interface_type.clone(),
        concrete_type: factory.signature.concrete_type.clone(),
        name: factory.signature.name.clone(),
        origin: factory.origin.clone(),
        existing_origin: existing.origin.clone(),
    }
}

/// A shared plugin registry.
///
/// Clones refer to the same registry. Registration and lookup are
/// serialized by a registry-wide lock.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Derivative)]
#[derivative(Debug, Default)]
struct Inner {
    factories: IndexMap<PluginSignature, Arc<PluginFactory>>,
    modules: IndexSet<String>,
    #[derivative(Debug = "ignore")]
    hooks: Vec<Arc<dyn LoadHook>>,
    #[derivative(Debug = "ignore")]
    #[derivative(Default(value = "default_filters()"))]
    filters: Vec<Arc<dyn PluginFilter>>,
}

fn default_filters() -> Vec<Arc<dyn PluginFilter>> {
    let duplicates: Arc<dyn PluginFilter> = Arc::new(DuplicateFilter);
    vec![duplicates]
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::Other(anyhow::anyhow!("the plugin registry lock is poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::Other(anyhow::anyhow!("the plugin registry lock is poisoned")))
    }

    /// Add a factory once every filter has accepted it.
    ///
    /// The registry holds one factory per signature, so a second one
    /// is refused even if no filter objects.
    pub fn register(&self, factory: PluginFactory) -> Result<Arc<PluginFactory>> {
        let mut inner = self.write()?;

        let existing = inner.factories.get(&factory.signature).cloned();
        for filter in &inner.filters {
            filter.add_factory(&factory, existing.as_deref())?;
        }

        match inner.factories.entry(factory.signature.clone()) {
            Entry::Occupied(entry) => Err(duplicate(&factory, entry.get())),
            Entry::Vacant(entry) => {
                trace!(
                    "registering plugin `{}` for {} from {}",
                    factory.name(),
                    factory.interface_type(),
                    factory.origin()
                );
                let factory = Arc::new(factory);
                entry.insert(factory.clone());
                Ok(factory)
            }
        }
    }

    /// Append a filter to the chain every module and factory passes.
    pub fn add_filter<F>(&self, filter: F) -> Result<()>
    where
        F: PluginFilter + 'static,
    {
        self.write()?.filters.push(Arc::new(filter));
        Ok(())
    }

    /// Find the earliest registered factory with the interface and name.
    pub fn lookup(&self, interface_type: &str, name: &str) -> Result<Arc<PluginFactory>> {
        let inner = self.read()?;
        inner
            .factories
            .values()
            .find(|factory| factory.interface_type() == interface_type && factory.name() == name)
            .cloned()
            .ok_or_else(|| Error::not_found(interface_type, name))
    }

    pub fn lookup_as<I>(&self, name: &str) -> Result<Arc<PluginFactory>>
    where
        I: ?Sized + 'static,
    {
        self.lookup(type_name::<I>(), name)
    }

    /// Look up a factory and construct an object from it.
    pub fn create<I>(&self, name: &str, config: &ConfigBlock) -> Result<Box<I>>
    where
        I: ?Sized + 'static,
    {
        // the lock is released before the constructor runs
        let factory = self.lookup_as::<I>(name)?;
        factory.create::<I>(config)
    }

    pub fn create_process(&self, name: &str, config: &ConfigBlock) -> Result<Box<dyn Process>> {
        self.create::<dyn Process>(name, config)
    }

    /// Every factory in registration order.
    pub fn factories(&self) -> Result<Vec<Arc<PluginFactory>>> {
        Ok(self.read()?.factories.values().cloned().collect())
    }

    /// The names of the factories producing `interface_type`.
    pub fn names(&self, interface_type: &str) -> Result<Vec<String>> {
        let inner = self.read()?;
        let names = inner
            .factories
            .values()
            .filter(|factory| factory.interface_type() == interface_type)
            .map(|factory| factory.name().to_string())
            .collect();
        Ok(names)
    }

    pub fn is_module_loaded(&self, module: &str) -> Result<bool> {
        Ok(self.read()?.modules.contains(module))
    }

    /// Record the module as loaded. Returns false if it already was.
    pub fn mark_module_as_loaded(&self, module: &str) -> Result<bool> {
        Ok(self.write()?.modules.insert(module.to_string()))
    }

    pub fn add_load_hook<H>(&self, hook: H) -> Result<()>
    where
        H: LoadHook + 'static,
    {
        self.write()?.hooks.push(Arc::new(hook));
        Ok(())
    }

    /// Register the factories of a module unless it is already loaded.
    ///
    /// Returns false if the module was loaded before or a filter
    /// refused it. If the module
    /// fails to register, it is not recorded as loaded, but the
    /// factories it registered before the failure stay.
    pub fn load_module(&self, module: &dyn PluginModule) -> Result<bool> {
        let name = module.name();
        let filters = self.read()?.filters.clone();
        if !filters
            .iter()
            .all(|filter| filter.load_module(name, module.path()))
        {
            debug!("plugin module `{}` is refused by a filter", name);
            return Ok(false);
        }

        if !self.mark_module_as_loaded(name)? {
            debug!("plugin module `{}` is already loaded", name);
            return Ok(false);
        }

        let registrar = Registrar {
            registry: self,
            module: name,
        };
        if let Err(err) = module.register(&registrar) {
            self.write()?.modules.shift_remove(name);
            return Err(err);
        }
        debug!("plugin module `{}` loaded", name);

        let hooks = self.read()?.hooks.clone();
        for hook in hooks {
            hook.on_load(name, module.path(), self)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::ensure;

    trait Greeter {
        fn greet(&self) -> String;
    }

    struct English;
    struct French;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    impl Greeter for French {
        fn greet(&self) -> String {
            "bonjour".into()
        }
    }

    fn english() -> PluginFactory {
        PluginFactory::new::<dyn Greeter, English, _>("greeter", |_| {
            let greeter: Box<dyn Greeter> = Box::new(English);
            Ok(greeter)
        })
    }

    #[test]
    fn duplicate_signature_is_refused() -> anyhow::Result<()> {
        let registry = Registry::new();
        registry.register(english().with_origin("first"))?;

        let err = registry
            .register(english().with_origin("second"))
            .err()
            .ok_or_else(|| anyhow::anyhow!("duplicate was accepted"))?;
        match &err {
            Error::DuplicatePlugin {
                origin,
                existing_origin,
                ..
            } => {
                ensure!(origin == "second");
                ensure!(existing_origin == "first");
            }
            other => anyhow::bail!("unexpected error {}", other),
        }
        let message = err.to_string();
        ensure!(message.contains("first") && message.contains("second"));
        ensure!(registry.factories()?.len() == 1);
        Ok(())
    }

    #[test]
    fn lookup_returns_earliest_registration() -> anyhow::Result<()> {
        let registry = Registry::new();
        registry.register(english())?;
        // same name and interface, different concrete type
        registry.register(PluginFactory::new::<dyn Greeter, French, _>(
            "greeter",
            |_| {
                let greeter: Box<dyn Greeter> = Box::new(French);
                Ok(greeter)
            },
        ))?;

        let greeter = registry.create::<dyn Greeter>("greeter", &ConfigBlock::new())?;
        ensure!(greeter.greet() == "hello");
        ensure!(registry.names(type_name::<dyn Greeter>())? == ["greeter", "greeter"]);

        ensure!(matches!(
            registry.create::<dyn Greeter>("missing", &ConfigBlock::new()),
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn module_loads_once() -> anyhow::Result<()> {
        struct Greeters;

        impl PluginModule for Greeters {
            fn name(&self) -> &str {
                "greeters"
            }

            fn register(&self, registrar: &Registrar<'_>) -> Result<()> {
                registrar.register(english())?;
                Ok(())
            }
        }

        let registry = Registry::new();
        let (tx, rx) = flume::unbounded();
        registry.add_load_hook(move |module: &str, _: Option<&Path>, _: &Registry| {
            let _ = tx.send(module.to_string());
            Ok(())
        })?;

        ensure!(!registry.is_module_loaded("greeters")?);
        ensure!(registry.load_module(&Greeters)?);
        ensure!(registry.is_module_loaded("greeters")?);
        ensure!(!registry.load_module(&Greeters)?);

        ensure!(rx.try_iter().collect::<Vec<_>>() == ["greeters"]);
        ensure!(registry.lookup_as::<dyn Greeter>("greeter")?.origin() == "greeters");
        Ok(())
    }
}
