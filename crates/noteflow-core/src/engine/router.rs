//! Router: consulta pura que decide el próximo processor de un job.
//!
//! Candidatos: processors cuyos `requires` tienen un StepResult `completed` y
//! que aún no tienen una entrada `completed`, `awaiting_input` ni `skipped`
//! propia. Orden: hint `initial_processor` (si es candidato y no corrió),
//! luego prioridad declarada (mayor primero), luego orden de registro.
use std::sync::Arc;

use crate::model::{Job, StepStatus};
use crate::processor::{Processor, ProcessorRegistry};

/// Decisión del router.
#[derive(Clone)]
pub enum Route {
    Next(Arc<dyn Processor>),
    Complete,
}

impl Route {
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Route::Next(p) => Some(p.name()),
            Route::Complete => None,
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Next(p) => write!(f, "Next({})", p.name()),
            Route::Complete => f.write_str("Complete"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Router {
    registry: Arc<ProcessorRegistry>,
}

impl Router {
    pub fn new(registry: Arc<ProcessorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Nombres candidatos en orden de registro.
    pub fn candidates(&self, job: &Job) -> Vec<&str> {
        self.registry
            .iter()
            .filter(|(_, p)| is_candidate(job, p.as_ref()))
            .map(|(_, p)| p.name())
            .collect()
    }

    pub fn next_step(&self, job: &Job) -> Route {
        if let Some(hint) = job.initial_processor.as_deref() {
            let untouched = !job.history.iter().any(|r| r.step_name == hint);
            if untouched {
                if let Some(p) = self.registry.get(hint) {
                    if is_candidate(job, p.as_ref()) {
                        return Route::Next(p);
                    }
                }
            }
        }
        let mut best: Option<(i32, usize, &Arc<dyn Processor>)> = None;
        for (idx, p) in self.registry.iter() {
            if !is_candidate(job, p.as_ref()) {
                continue;
            }
            let prio = p.priority();
            let better = match best {
                None => true,
                Some((bp, bi, _)) => prio > bp || (prio == bp && idx < bi),
            };
            if better {
                best = Some((prio, idx, p));
            }
        }
        match best {
            Some((_, _, p)) => Route::Next(p.clone()),
            None => Route::Complete,
        }
    }

    /// Processors que nunca llegarán a correr para este job (dependen de un
    /// step omitido o no ejecutado). Informativo para logs/API.
    pub fn unreachable(&self, job: &Job) -> Vec<String> {
        self.registry
            .iter()
            .filter(|(_, p)| !job.history.iter().any(|r| r.step_name == p.name()) && !is_candidate(job, p.as_ref()))
            .map(|(_, p)| p.name().to_string())
            .collect()
    }
}

fn is_candidate(job: &Job, p: &dyn Processor) -> bool {
    let name = p.name();
    let already = job.history.iter().any(|r| {
                                        r.step_name == name
                                        && matches!(r.status,
                                                    StepStatus::Completed
                                                    | StepStatus::AwaitingInput
                                                    | StepStatus::Skipped)
                                    });
    !already
    && p.requires()
        .iter()
        .all(|dep| job.has_step_with_status(dep, StepStatus::Completed))
}
