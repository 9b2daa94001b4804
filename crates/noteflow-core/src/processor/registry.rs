//! Registry de processors: nombre -> implementación, en orden de registro.
//!
//! El grafo de dependencias (`requires`) se valida al construir: nombres
//! duplicados/vacíos, dependencias desconocidas y ciclos son errores de
//! configuración. La construcción por lote es todo-o-nada.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, warn};

use super::definition::{Processor, ProcessorInfo};
use crate::errors::ConfigError;

#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: IndexMap<String, Arc<dyn Processor>>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
         .field("processors", &self.processors.keys().collect::<Vec<_>>())
         .finish()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construye el registry validando el grafo completo. Ante cualquier
    /// error no se devuelve registry alguno.
    pub fn from_processors(list: Vec<Arc<dyn Processor>>) -> Result<Self, ConfigError> {
        let mut processors: IndexMap<String, Arc<dyn Processor>> = IndexMap::new();
        for p in list {
            let name = p.name().to_string();
            if name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if processors.contains_key(&name) {
                return Err(ConfigError::DuplicateProcessor(name));
            }
            processors.insert(name, p);
        }
        let graph: IndexMap<String, Vec<String>> = processors.iter()
                                                             .map(|(n, p)| (n.clone(), p.requires()))
                                                             .collect();
        topological_order(&graph)?;
        Ok(Self { processors })
    }

    /// Registro incremental: las dependencias deben estar registradas antes.
    pub fn register(&mut self, processor: Arc<dyn Processor>) -> Result<(), ConfigError> {
        let name = processor.name().to_string();
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.processors.contains_key(&name) {
            return Err(ConfigError::DuplicateProcessor(name));
        }
        for dep in processor.requires() {
            if dep == name {
                return Err(ConfigError::DependencyCycle(vec![name.clone(), name]));
            }
            if !self.processors.contains_key(&dep) {
                return Err(ConfigError::UnknownDependency { processor: name,
                                                            dependency: dep });
            }
        }
        debug!("registered processor '{name}'");
        self.processors.insert(name, processor);
        Ok(())
    }

    /// Carga lo que se pueda sin importar el orden de la lista y devuelve un
    /// error por cada processor rechazado; los demás quedan registrados.
    pub fn register_all(&mut self, list: Vec<Arc<dyn Processor>>) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut pending: Vec<Arc<dyn Processor>> = Vec::new();
        for p in list {
            let name = p.name();
            if name.is_empty() {
                errors.push(ConfigError::EmptyName);
            } else if self.processors.contains_key(name) || pending.iter().any(|q| q.name() == name) {
                errors.push(ConfigError::DuplicateProcessor(name.to_string()));
            } else {
                pending.push(p);
            }
        }

        // pasadas hasta que no haya progreso
        loop {
            let before = pending.len();
            let mut blocked = Vec::new();
            for p in pending {
                if p.requires().iter().all(|d| self.processors.contains_key(d)) {
                    if let Err(e) = self.register(p) {
                        errors.push(e);
                    }
                } else {
                    blocked.push(p);
                }
            }
            pending = blocked;
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        // lo bloqueado: primero dependencias inexistentes (transitivamente),
        // el resto sólo puede estar bloqueado por un ciclo
        let mut unresolved: HashSet<String> = pending.iter().map(|p| p.name().to_string()).collect();
        let mut failed: Vec<(String, String)> = Vec::new();
        loop {
            let mut newly = Vec::new();
            for p in pending.iter().filter(|p| unresolved.contains(p.name())) {
                let missing = p.requires()
                               .into_iter()
                               .find(|d| !self.processors.contains_key(d) && !unresolved.contains(d));
                if let Some(dep) = missing {
                    newly.push((p.name().to_string(), dep));
                }
            }
            if newly.is_empty() {
                break;
            }
            for (name, _) in &newly {
                unresolved.remove(name);
            }
            failed.extend(newly);
        }
        for (processor, dependency) in failed {
            warn!("processor '{processor}' not loaded: unknown dependency '{dependency}'");
            errors.push(ConfigError::UnknownDependency { processor, dependency });
        }
        let graph: HashMap<String, Vec<String>> = pending.iter()
                                                         .filter(|p| unresolved.contains(p.name()))
                                                         .map(|p| (p.name().to_string(), p.requires()))
                                                         .collect();
        for p in pending.iter().filter(|p| unresolved.contains(p.name())) {
            let cycle = find_cycle(p.name(), &graph);
            warn!("processor '{}' not loaded: dependency cycle {}", p.name(), cycle.join(" -> "));
            errors.push(ConfigError::DependencyCycle(cycle));
        }
        errors
    }

    /// Quita un processor; se rechaza si otro lo requiere.
    pub fn unregister(&mut self, name: &str) -> Result<Option<Arc<dyn Processor>>, ConfigError> {
        let dependents = self.dependents(name);
        if !dependents.is_empty() {
            return Err(ConfigError::HasDependents { processor: name.to_string(),
                                                    dependents });
        }
        Ok(self.processors.shift_remove(name))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.processors.keys().map(String::as_str).collect()
    }

    /// Processors en orden de registro, con su índice.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<dyn Processor>)> {
        self.processors.values().enumerate()
    }

    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.processors
            .get(name)
            .map(|p| p.requires())
            .unwrap_or_default()
    }

    /// Processors que requieren directamente a `name`.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.processors
            .iter()
            .filter(|(_, p)| p.requires().iter().any(|d| d == name))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Dependencias transitivas de `name`, cada una antes que quien la
    /// requiere.
    pub fn all_dependencies(&self, name: &str) -> Vec<String> {
        fn visit(reg: &ProcessorRegistry, name: &str, seen: &mut HashSet<String>, out: &mut Vec<String>) {
            for dep in reg.dependencies(name) {
                if seen.insert(dep.clone()) {
                    visit(reg, &dep, seen, out);
                    out.push(dep);
                }
            }
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        visit(self, name, &mut seen, &mut out);
        out
    }

    /// Orden topológico estable (Kahn, desempate por orden de registro).
    pub fn execution_order(&self) -> Result<Vec<String>, ConfigError> {
        topological_order(&self.graph())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.execution_order().map(|_| ())
    }

    pub fn describe(&self) -> Vec<ProcessorInfo> {
        self.processors
            .values()
            .map(|p| ProcessorInfo::of(p.as_ref()))
            .collect()
    }

    fn graph(&self) -> IndexMap<String, Vec<String>> {
        self.processors
            .iter()
            .map(|(n, p)| (n.clone(), p.requires()))
            .collect()
    }
}

/// Kahn sobre `nodo -> requires`. Dependencias desconocidas y ciclos son
/// errores.
fn topological_order(graph: &IndexMap<String, Vec<String>>) -> Result<Vec<String>, ConfigError> {
    for (name, deps) in graph {
        if let Some(dep) = deps.iter().find(|d| !graph.contains_key(*d)) {
            return Err(ConfigError::UnknownDependency { processor: name.clone(),
                                                        dependency: dep.clone() });
        }
    }
    let mut in_degree: IndexMap<&str, usize> = graph.iter()
                                                    .map(|(n, deps)| {
                                                        let unique: HashSet<&String> = deps.iter().collect();
                                                        (n.as_str(), unique.len())
                                                    })
                                                    .collect();
    let mut queue: VecDeque<&str> = in_degree.iter()
                                             .filter(|(_, d)| **d == 0)
                                             .map(|(n, _)| *n)
                                             .collect();
    let mut order = Vec::with_capacity(graph.len());
    while let Some(node) = queue.pop_front() {
        order.push(node.to_string());
        for (name, deps) in graph {
            if deps.iter().any(|d| d == node) {
                if let Some(deg) = in_degree.get_mut(name.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(name.as_str());
                    }
                }
            }
        }
    }
    if order.len() < graph.len() {
        let remaining: HashMap<String, Vec<String>> = graph.iter()
                                                           .filter(|(n, _)| !order.contains(*n))
                                                           .map(|(n, d)| (n.clone(), d.clone()))
                                                           .collect();
        let start = graph.keys()
                         .find(|n| remaining.contains_key(*n))
                         .map(String::as_str)
                         .unwrap_or_default();
        return Err(ConfigError::DependencyCycle(find_cycle(start, &remaining)));
    }
    Ok(order)
}

/// Sigue aristas `requires` dentro de `graph` desde `start` hasta repetir un
/// nodo; devuelve el ciclo cerrado (`a -> b -> a`).
fn find_cycle(start: &str, graph: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut path: Vec<String> = Vec::new();
    let mut cur = start.to_string();
    loop {
        if let Some(pos) = path.iter().position(|n| *n == cur) {
            let mut cycle = path.split_off(pos);
            cycle.push(cur);
            return cycle;
        }
        path.push(cur.clone());
        match graph.get(&cur).and_then(|deps| deps.iter().find(|d| graph.contains_key(*d))) {
            Some(next) => cur = next.clone(),
            None => return path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::model::Job;
    use crate::processor::StepRunResult;
    use async_trait::async_trait;
    use serde_json::Map;

    struct Named {
        name: &'static str,
        requires: Vec<&'static str>,
    }

    #[async_trait]
    impl Processor for Named {
        fn name(&self) -> &str {
            self.name
        }
        fn requires(&self) -> Vec<String> {
            self.requires.iter().map(|s| s.to_string()).collect()
        }
        async fn process(&self, _job: &mut Job, _ctx: &mut ExecutionContext) -> StepRunResult {
            StepRunResult::success(Map::new())
        }
    }

    fn p(name: &'static str, requires: &[&'static str]) -> Arc<dyn Processor> {
        Arc::new(Named { name,
                         requires: requires.to_vec() })
    }

    #[test]
    fn batch_with_cycle_is_rejected_entirely() {
        let err = ProcessorRegistry::from_processors(vec![p("a", &["b"]), p("b", &["a"]), p("c", &[])]).unwrap_err();
        match err {
            ConfigError::DependencyCycle(c) => {
                assert_eq!(c.first(), c.last());
                assert!(c.contains(&"a".to_string()) && c.contains(&"b".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn batch_rejects_unknown_and_duplicates() {
        assert_eq!(ProcessorRegistry::from_processors(vec![p("a", &["zz"])]).unwrap_err(),
                   ConfigError::UnknownDependency { processor: "a".into(),
                                                    dependency: "zz".into() });
        assert_eq!(ProcessorRegistry::from_processors(vec![p("a", &[]), p("a", &[])]).unwrap_err(),
                   ConfigError::DuplicateProcessor("a".into()));
        assert_eq!(ProcessorRegistry::from_processors(vec![p("", &[])]).unwrap_err(), ConfigError::EmptyName);
    }

    #[test]
    fn incremental_register_leaves_registry_unchanged_on_error() {
        let mut reg = ProcessorRegistry::new();
        reg.register(p("a", &[])).unwrap();
        assert!(reg.register(p("b", &["missing"])).is_err());
        assert!(matches!(reg.register(p("c", &["c"])), Err(ConfigError::DependencyCycle(_))));
        assert!(matches!(reg.register(p("a", &[])), Err(ConfigError::DuplicateProcessor(_))));
        assert_eq!(reg.names(), vec!["a"]);
    }

    #[test]
    fn register_all_loads_out_of_order_and_reports_offenders() {
        let mut reg = ProcessorRegistry::new();
        let errors = reg.register_all(vec![p("counter", &["echo"]),
                                           p("echo", &[]),
                                           p("x", &["y"]),
                                           p("y", &["x"]),
                                           p("orphan", &["nope"]),
                                           p("child", &["orphan"])]);
        assert_eq!(reg.names(), vec!["echo", "counter"]);
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ConfigError::UnknownDependency { processor: "orphan".into(),
                                                                  dependency: "nope".into() }));
        assert!(errors.contains(&ConfigError::UnknownDependency { processor: "child".into(),
                                                                  dependency: "orphan".into() }));
        assert_eq!(errors.iter()
                         .filter(|e| matches!(e, ConfigError::DependencyCycle(_)))
                         .count(),
                   2);
    }

    #[test]
    fn graph_queries() {
        let reg = ProcessorRegistry::from_processors(vec![p("c", &["b"]), p("a", &[]), p("b", &["a"]), p("d", &["a"])]).unwrap();
        assert_eq!(reg.execution_order().unwrap(), vec!["a", "b", "d", "c"]);
        assert_eq!(reg.all_dependencies("c"), vec!["a", "b"]);
        assert_eq!(reg.dependents("a"), vec!["b", "d"]);
        assert_eq!(reg.dependencies("c"), vec!["b"]);
        assert!(reg.validate().is_ok());
        assert_eq!(reg.describe().len(), 4);
    }

    #[test]
    fn unregister_refuses_with_dependents() {
        let mut reg = ProcessorRegistry::from_processors(vec![p("a", &[]), p("b", &["a"])]).unwrap();
        assert!(matches!(reg.unregister("a"), Err(ConfigError::HasDependents { .. })));
        assert!(reg.unregister("b").unwrap().is_some());
        assert!(reg.unregister("a").unwrap().is_some());
        assert!(reg.unregister("a").unwrap().is_none());
        assert!(reg.is_empty());
    }
}
