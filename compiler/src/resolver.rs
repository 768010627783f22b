// resolver.rs — Adapter lookup
//
// Maps model objects to adapters. A registry keyed by (package, class)
// replaces reflective class lookup; the search walks the object's class
// chain for every candidate package, then retries with each package
// truncated by one dotted segment, and finally asks the auto-adapter.
// Found adapters are cached per object until `reset`.
//
// Preconditions: the package list is non-empty.
// Postconditions: repeated resolution of an object returns the identical
//   `Rc` until `reset`.
// Failure modes: empty package list (E0100); no adapter after every
//   package and superclass (E0200, message lists every attempt).
// Side effects: trace-level logging of each attempt.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;

use crate::adapter::Adapter;
use crate::diag::{codes, CgError, Result};
use crate::model::{Model, ObjectRef};

/// Builds an adapter for one object.
pub type AdapterFactory = fn(&Model, ObjectRef) -> Result<Rc<dyn Adapter>>;

/// Fallback consulted when no registered adapter fits an object.
pub trait AutoAdapter {
    /// An adapter for `obj`, or `None` if this fallback does not apply.
    fn create(&self, model: &Model, obj: ObjectRef) -> Result<Option<Rc<dyn Adapter>>>;
}

/// Split a package list on `;`, `:`, space and `*`, dropping empty entries.
pub fn parse_package_list(value: &str) -> Result<Vec<String>> {
    let packages: Vec<String> = value
        .split(|c: char| matches!(c, ';' | ':' | ' ' | '*'))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if packages.is_empty() {
        return Err(CgError::config(format!(
            "the generator package list \"{}\" names no packages",
            value
        ))
        .with_code(codes::E0100)
        .with_hint("set --generator-package-list, e.g. generic.program.procedural.c"));
    }
    Ok(packages)
}

/// Diagnostic name of a registry key.
pub fn adapter_class_name(package: &str, class: &str) -> String {
    format!("ptolemy.cg.adapter.{}.adapters.{}", package, class)
}

// ── Registry ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<(String, String), AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, package: &str, class: &str, factory: AdapterFactory) {
        self.factories
            .insert((package.to_string(), class.to_string()), factory);
    }

    pub fn get(&self, package: &str, class: &str) -> Option<AdapterFactory> {
        self.factories
            .get(&(package.to_string(), class.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

// ── Resolver ────────────────────────────────────────────────────────────────

/// How an object's adapter was found, for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub object: String,
    pub adapter: String,
    /// `package.adapters.class` that matched, or `auto`.
    pub found_as: String,
}

struct CacheEntry {
    adapter: Rc<dyn Adapter>,
    found_as: String,
}

pub struct AdapterResolver {
    registry: AdapterRegistry,
    auto: Option<Box<dyn AutoAdapter>>,
    packages: Vec<String>,
    cache: RefCell<HashMap<ObjectRef, CacheEntry>>,
}

impl AdapterResolver {
    pub fn new(registry: AdapterRegistry, package_list: &str) -> Result<Self> {
        Ok(AdapterResolver {
            registry,
            auto: None,
            packages: parse_package_list(package_list)?,
            cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn with_auto_adapter(mut self, auto: Box<dyn AutoAdapter>) -> Self {
        self.auto = Some(auto);
        self
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    /// Drop every cached adapter.
    pub fn reset(&self) {
        self.cache.borrow_mut().clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn resolve(&self, model: &Model, obj: ObjectRef) -> Result<Rc<dyn Adapter>> {
        if let Some(entry) = self.cache.borrow().get(&obj) {
            return Ok(Rc::clone(&entry.adapter));
        }

        let (adapter, found_as) = self.search(model, obj)?;
        log::debug!(
            "adapter for {} found as {}",
            model.object_full_name(obj),
            found_as
        );
        self.cache.borrow_mut().insert(
            obj,
            CacheEntry {
                adapter: Rc::clone(&adapter),
                found_as,
            },
        );
        Ok(adapter)
    }

    fn search(&self, model: &Model, obj: ObjectRef) -> Result<(Rc<dyn Adapter>, String)> {
        let chain = model.class_chain(obj);
        let mut packages = self.packages.clone();
        let mut trail: Vec<String> = Vec::new();

        while !packages.is_empty() {
            for class in &chain {
                for package in &packages {
                    let name = adapter_class_name(package, class);
                    log::trace!("trying {}", name);
                    if let Some(factory) = self.registry.get(package, class) {
                        match factory(model, obj) {
                            Ok(adapter) => return Ok((adapter, name)),
                            Err(e) => {
                                log::warn!("failed to instantiate {}: {}", name, e.root_message());
                                trail.push(format!("{} (failed: {})", name, e.root_message()));
                                continue;
                            }
                        }
                    }
                    trail.push(name);
                }
            }
            // Past the top of the hierarchy: retry one package level up.
            packages = packages
                .iter()
                .filter_map(|p| p.rfind('.').map(|i| p[..i].to_string()))
                .collect();
        }

        if let Some(auto) = &self.auto {
            if let Some(adapter) = auto.create(model, obj)? {
                return Ok((adapter, "auto".to_string()));
            }
        }

        Err(CgError::resolution(format!(
            "Cannot find adapter class for {} ({})",
            model.object_full_name(obj),
            model.class_of(obj)
        ))
        .with_cause(format!("tried:\n    {}", trail.join("\n    ")), None)
        .with_hint("check --generator-package-list or add an embeddedCode parameter"))
    }

    /// Every cached resolution, ordered by object.
    pub fn report(&self, model: &Model) -> Vec<Resolution> {
        let cache = self.cache.borrow();
        let mut objects: Vec<&ObjectRef> = cache.keys().collect();
        objects.sort();
        objects
            .into_iter()
            .filter_map(|obj| {
                cache.get(obj).map(|entry| Resolution {
                    object: model.object_full_name(*obj),
                    adapter: entry.adapter.kind().to_string(),
                    found_as: entry.found_as.clone(),
                })
            })
            .collect()
    }
}
