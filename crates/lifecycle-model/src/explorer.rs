//! Breadth-first exploration of every interleaving
//!
//! Each reachable world is visited once. Every edge is checked against the
//! [`TransitionTable`] and every world against the safety properties of the
//! load protocol. The first trace reaching each kind of violation is kept.

use crate::model::{Protocol, Role, Step, World};
use crate::{EntryState, TransitionTable};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use thiserror::Error;

/// Largest number of concurrent callers the explorer accepts, blocking and
/// volatile together
pub const MAX_CALLERS: usize = 4;

/// Invalid explorer settings
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("at least one caller is required")]
    NoCallers,

    #[error("{requested} callers requested, at most {max} supported")]
    TooManyCallers { requested: usize, max: usize },

    #[error("horizon must be at least 1 step")]
    ZeroHorizon,
}

/// What went wrong in a violating world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// The entry changed state along a forbidden edge
    ForbiddenTransition { from: EntryState, to: EntryState },
    /// Two actors were reading storage for the same entry at once
    ConcurrentLoaders,
    /// One entry was read from storage twice without a failed load between
    DuplicateLoad,
    /// A caller returned a cell flagged valid whose data was not written
    HalfWrittenRead,
    /// A blocking caller returned a placeholder
    InvalidReturn,
    /// No actor can move but some request is unanswered
    Deadlock,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::ForbiddenTransition { from, to } => {
                write!(f, "forbidden transition {from} -> {to}")
            }
            ViolationKind::ConcurrentLoaders => f.write_str("concurrent loaders"),
            ViolationKind::DuplicateLoad => f.write_str("duplicate load"),
            ViolationKind::HalfWrittenRead => f.write_str("half-written read"),
            ViolationKind::InvalidReturn => f.write_str("invalid cell returned"),
            ViolationKind::Deadlock => f.write_str("deadlock"),
        }
    }
}

/// A violation and the steps that lead to it from the initial world
#[derive(Debug, Clone)]
pub struct Violation {
    pub kind: ViolationKind,
    pub trace: Vec<Step>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} after {} steps", self.kind, self.trace.len())?;
        for (i, step) in self.trace.iter().enumerate() {
            write!(f, "\n  {:>3}. {step}", i + 1)?;
        }
        Ok(())
    }
}

/// Outcome of one exploration
#[derive(Debug, Clone)]
pub struct Report {
    pub protocol: Protocol,
    pub states_explored: usize,
    /// Longest step sequence explored
    pub depth: usize,
    /// False if the horizon cut off part of the state space
    pub complete: bool,
    pub violations: Vec<Violation>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// First violation matching `predicate`
    pub fn find(&self, predicate: impl Fn(&ViolationKind) -> bool) -> Option<&Violation> {
        self.violations.iter().find(|v| predicate(&v.kind))
    }

    pub fn has(&self, kind: ViolationKind) -> bool {
        self.find(|k| *k == kind).is_some()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} states, depth {}{}, {} violation(s)",
            self.protocol,
            self.states_explored,
            self.depth,
            if self.complete { "" } else { " (truncated)" },
            self.violations.len()
        )?;
        for violation in &self.violations {
            write!(f, "\n{violation}")?;
        }
        Ok(())
    }
}

/// Exhaustive interleaving explorer for one protocol variant
///
/// # Example
///
/// ```
/// use pyramid_lifecycle_model::{Explorer, Protocol};
///
/// let report = Explorer::new(Protocol::Locked).explore().unwrap();
/// assert!(report.complete);
/// assert!(report.is_clean(), "{report}");
/// ```
#[derive(Debug, Clone)]
pub struct Explorer {
    protocol: Protocol,
    callers: usize,
    volatile_callers: usize,
    evictions: u8,
    failures: u8,
    horizon: usize,
    table: TransitionTable,
}

struct Node {
    world: World,
    parent: Option<(usize, Step)>,
    depth: usize,
}

impl Explorer {
    /// Two blocking callers, one eviction, no failed loads, horizon 64, the
    /// entry life-cycle table
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            callers: 2,
            volatile_callers: 0,
            evictions: 1,
            failures: 0,
            horizon: 64,
            table: TransitionTable::entry_lifecycle(),
        }
    }

    pub fn with_callers(mut self, callers: usize) -> Self {
        self.callers = callers;
        self
    }

    /// Add volatile callers that enqueue the key for a fetcher actor
    ///
    /// The fetcher only exists when at least one volatile caller does.
    pub fn with_volatile_callers(mut self, callers: usize) -> Self {
        self.volatile_callers = callers;
        self
    }

    /// Let up to `failures` loads fail in total
    pub fn with_failures(mut self, failures: u8) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_evictions(mut self, evictions: u8) -> Self {
        self.evictions = evictions;
        self
    }

    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    /// Check state changes against `table` instead of the entry life-cycle
    pub fn with_table(mut self, table: TransitionTable) -> Self {
        self.table = table;
        self
    }

    fn validate(&self) -> Result<(), ModelError> {
        let requested = self.callers + self.volatile_callers;
        if requested == 0 {
            return Err(ModelError::NoCallers);
        }
        if requested > MAX_CALLERS {
            return Err(ModelError::TooManyCallers {
                requested,
                max: MAX_CALLERS,
            });
        }
        if self.horizon == 0 {
            return Err(ModelError::ZeroHorizon);
        }
        Ok(())
    }

    pub fn explore(&self) -> Result<Report, ModelError> {
        self.validate()?;

        let initial = World::new(self.callers, self.evictions)
            .with_volatile(self.volatile_callers)
            .with_failures(self.failures);
        let mut nodes = vec![Node {
            world: initial.clone(),
            parent: None,
            depth: 0,
        }];
        let mut index: HashMap<World, usize> = HashMap::from([(initial, 0)]);
        let mut frontier = VecDeque::from([0]);
        let mut found: Vec<(ViolationKind, usize, Option<Step>)> = Vec::new();
        let mut complete = true;
        let mut depth = 0;

        let mut report = |kind: ViolationKind, node: usize, last: Option<Step>| {
            if !found.iter().any(|(k, _, _)| *k == kind) {
                found.push((kind, node, last));
            }
        };

        while let Some(current) = frontier.pop_front() {
            let world = nodes[current].world.clone();
            let current_depth = nodes[current].depth;
            depth = depth.max(current_depth);

            for kind in safety_violations(&world) {
                report(kind, current, None);
            }

            let successors = world.successors(self.protocol);
            if successors.is_empty() && !world.is_finished() {
                report(ViolationKind::Deadlock, current, None);
            }
            if current_depth >= self.horizon {
                if !successors.is_empty() {
                    complete = false;
                }
                continue;
            }

            for (step, next) in successors {
                let (from, to) = (world.entry_state(), next.entry_state());
                if !self.table.is_allowed(from, to) {
                    report(
                        ViolationKind::ForbiddenTransition { from, to },
                        current,
                        Some(step),
                    );
                }
                if index.contains_key(&next) {
                    continue;
                }
                let id = nodes.len();
                index.insert(next.clone(), id);
                nodes.push(Node {
                    world: next,
                    parent: Some((current, step)),
                    depth: current_depth + 1,
                });
                frontier.push_back(id);
            }
        }

        let violations = found
            .into_iter()
            .map(|(kind, node, last)| {
                let mut trace = trace_to(&nodes, node);
                trace.extend(last);
                Violation { kind, trace }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            protocol = %self.protocol,
            states = nodes.len(),
            depth,
            complete,
            violations = violations.len(),
            "exploration finished"
        );

        Ok(Report {
            protocol: self.protocol,
            states_explored: nodes.len(),
            depth,
            complete,
            violations,
        })
    }
}

fn safety_violations(world: &World) -> Vec<ViolationKind> {
    let mut kinds = Vec::new();
    if world.callers.iter().filter(|c| c.loading).count() > 1 {
        kinds.push(ViolationKind::ConcurrentLoaders);
    }
    if world.entry.as_ref().is_some_and(|entry| entry.loads > 1) {
        kinds.push(ViolationKind::DuplicateLoad);
    }
    for caller in &world.callers {
        let Some(returned) = caller.returned else {
            continue;
        };
        if returned.valid && !returned.data_written {
            kinds.push(ViolationKind::HalfWrittenRead);
        }
        if !returned.valid && caller.role == Role::Blocking {
            kinds.push(ViolationKind::InvalidReturn);
        }
    }
    kinds
}

fn trace_to(nodes: &[Node], mut node: usize) -> Vec<Step> {
    let mut steps = Vec::new();
    while let Some((parent, step)) = nodes[node].parent {
        steps.push(step);
        node = parent;
    }
    steps.reverse();
    steps
}
