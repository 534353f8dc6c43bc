//! Protocol model of concurrent requests for one key
//!
//! Every actor runs the get/load protocol as a sequence of atomic steps.
//! An eviction actor may reclaim the entry whenever nothing pins it. The
//! [`Explorer`](crate::Explorer) interleaves the steps in every possible
//! order.
//!
//! Blocking caller program:
//!
//! 1. `Lookup` the slot. Empty: go to `Create`. Evicted: go to
//!    `RemoveAndRetry`. Still being created: wait. Otherwise pin the entry.
//! 2. `Create` an entry under the table lock, then `SetPlaceholder`.
//! 3. `CheckValid`. Valid: `Return`. Invalid: `AcquireLock`, then
//!    `Recheck` (valid now: `Return`), then `Load` and `Swap`.
//! 4. `Return` the observed cell and unpin.
//!
//! A volatile caller runs steps 1 and 2 too, but an invalid cell is
//! followed by `Enqueue` and the placeholder is returned as is. The fetcher
//! waits in `Take` for a queued key, skips it when the slot is empty or
//! evicted, and otherwise runs the blocking load steps without returning a
//! cell to anyone.
//!
//! While failures remain, any loader at `Swap` or `WriteData` may instead
//! `Fail`: the placeholder stays, the load lock is released and a blocking
//! caller finishes with an error.

use crate::EntryState;
use std::fmt;

/// Variant of the load protocol to check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Per-entry load lock, load off to the side, single pointer swap
    Locked,
    /// No load lock: every caller that sees a placeholder loads
    Unlocked,
    /// Load lock held, but the valid flag is raised before the data is
    /// written into the existing cell
    InPlaceWrite,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Locked, Protocol::Unlocked, Protocol::InPlaceWrite];

    fn uses_lock(self) -> bool {
        !matches!(self, Protocol::Unlocked)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Locked => "locked",
            Protocol::Unlocked => "unlocked",
            Protocol::InPlaceWrite => "in-place-write",
        };
        f.write_str(name)
    }
}

/// Position of a caller in its program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pc {
    Lookup,
    Create,
    SetPlaceholder,
    CheckValid,
    AcquireLock,
    Recheck,
    Load,
    Swap,
    WriteData,
    RemoveAndRetry,
    Return,
    Done,
    /// Volatile caller pushes the key to the fetch queue
    Enqueue,
    /// Fetcher waits for a queued key
    Take,
    /// Label of a failed-load step; no actor rests here
    Fail,
}

/// Who performs a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    Caller(usize),
    Fetcher,
    Evictor,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Caller(id) => write!(f, "caller {id}"),
            Actor::Fetcher => f.write_str("fetcher"),
            Actor::Evictor => f.write_str("evictor"),
        }
    }
}

/// One atomic step of one actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Step {
    pub actor: Actor,
    /// Program position the step was taken from, [`Pc::Fail`] for a failed
    /// load; `None` for eviction
    pub pc: Option<Pc>,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pc {
            Some(pc) => write!(f, "{}: {:?}", self.actor, pc),
            None => write!(f, "{}: Evict", self.actor),
        }
    }
}

/// A cell as seen by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Observation {
    pub(crate) valid: bool,
    pub(crate) data_written: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntryModel {
    pub(crate) state: EntryState,
    pub(crate) valid_flag: bool,
    pub(crate) data_written: bool,
    pub(crate) lock_holder: Option<usize>,
    /// Storage reads since the entry was created or a load last failed
    pub(crate) loads: u8,
}

impl EntryModel {
    fn observe(&self) -> Observation {
        Observation {
            valid: self.valid_flag,
            data_written: self.data_written,
        }
    }
}

/// What kind of request an actor serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Role {
    /// Loads on the calling thread and must return a valid cell
    Blocking,
    /// Enqueues the key and returns whatever cell is present
    Volatile,
    /// Background worker draining the fetch queue
    Fetcher,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CallerModel {
    pub(crate) role: Role,
    pub(crate) pc: Pc,
    pub(crate) pinned: bool,
    pub(crate) loading: bool,
    pub(crate) observed: Option<Observation>,
    /// Set by the `Return` step
    pub(crate) returned: Option<Observation>,
}

/// Global state: the slot for one key plus every actor's local state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct World {
    pub(crate) entry: Option<EntryModel>,
    pub(crate) callers: Vec<CallerModel>,
    /// Copies of the key waiting in the fetch queue
    pub(crate) queued: u8,
    pub(crate) evictions_left: u8,
    pub(crate) failures_left: u8,
}

impl CallerModel {
    fn new(role: Role) -> Self {
        Self {
            role,
            pc: if role == Role::Fetcher {
                Pc::Take
            } else {
                Pc::Lookup
            },
            pinned: false,
            loading: false,
            observed: None,
            returned: None,
        }
    }
}

impl World {
    /// `callers` blocking callers and `evictions` evictions, no failures
    pub(crate) fn new(callers: usize, evictions: u8) -> Self {
        Self {
            entry: None,
            callers: vec![CallerModel::new(Role::Blocking); callers],
            queued: 0,
            evictions_left: evictions,
            failures_left: 0,
        }
    }

    /// Add `callers` volatile callers and, if any, one fetcher
    pub(crate) fn with_volatile(mut self, callers: usize) -> Self {
        if callers > 0 {
            self.callers
                .extend((0..callers).map(|_| CallerModel::new(Role::Volatile)));
            self.callers.push(CallerModel::new(Role::Fetcher));
        }
        self
    }

    pub(crate) fn with_failures(mut self, failures: u8) -> Self {
        self.failures_left = failures;
        self
    }

    fn actor(&self, id: usize) -> Actor {
        match self.callers[id].role {
            Role::Fetcher => Actor::Fetcher,
            Role::Blocking | Role::Volatile => Actor::Caller(id),
        }
    }

    /// Life-cycle state of the slot
    pub(crate) fn entry_state(&self) -> EntryState {
        self.entry
            .as_ref()
            .map_or(EntryState::NotLoaded, |entry| entry.state)
    }

    /// Every request answered and the fetch queue drained
    pub(crate) fn is_finished(&self) -> bool {
        self.queued == 0
            && self.callers.iter().all(|caller| match caller.role {
                Role::Fetcher => caller.pc == Pc::Take,
                Role::Blocking | Role::Volatile => caller.pc == Pc::Done,
            })
    }

    /// Every step that changes the world, with the world it leads to
    pub(crate) fn successors(&self, protocol: Protocol) -> Vec<(Step, World)> {
        let mut next = Vec::new();
        for id in 0..self.callers.len() {
            let pc = self.callers[id].pc;
            if pc == Pc::Done {
                continue;
            }
            let actor = self.actor(id);
            if let Some(world) = self.caller_step(id, protocol) {
                next.push((Step { actor, pc: Some(pc) }, world));
            }
            if let Some(world) = self.fail_load(id) {
                next.push((
                    Step {
                        actor,
                        pc: Some(Pc::Fail),
                    },
                    world,
                ));
            }
        }
        if let Some(world) = self.evict() {
            next.push((
                Step {
                    actor: Actor::Evictor,
                    pc: None,
                },
                world,
            ));
        }
        next
    }

    fn evict(&self) -> Option<World> {
        if self.evictions_left == 0 || self.callers.iter().any(|caller| caller.pinned) {
            return None;
        }
        let entry = self.entry.as_ref()?;
        if !matches!(entry.state, EntryState::Placeholder | EntryState::Valid) {
            return None;
        }

        let mut world = self.clone();
        world.evictions_left -= 1;
        if let Some(entry) = world.entry.as_mut() {
            entry.state = EntryState::Evicted;
        }
        Some(world)
    }

    /// Load in progress at `id` fails instead of swapping in the data
    ///
    /// The placeholder stays. The read no longer counts toward the entry's
    /// loads, so a later request may try again.
    fn fail_load(&self, id: usize) -> Option<World> {
        if self.failures_left == 0 || !matches!(self.callers[id].pc, Pc::Swap | Pc::WriteData) {
            return None;
        }
        let mut world = self.clone();
        world.failures_left -= 1;
        let World { entry, callers, .. } = &mut world;
        let entry = entry.as_mut()?;
        entry.loads = 0;
        if entry.lock_holder == Some(id) {
            entry.lock_holder = None;
        }

        let caller = &mut callers[id];
        caller.loading = false;
        caller.observed = None;
        caller.pinned = false;
        caller.pc = match caller.role {
            Role::Fetcher => Pc::Take,
            Role::Blocking | Role::Volatile => Pc::Done,
        };
        Some(world)
    }

    /// Next world after actor `id` takes its step, or `None` if it is blocked
    fn caller_step(&self, id: usize, protocol: Protocol) -> Option<World> {
        let mut world = self.clone();
        let World {
            entry,
            callers,
            queued,
            ..
        } = &mut world;
        let caller = &mut callers[id];
        let fetcher = caller.role == Role::Fetcher;

        match caller.pc {
            Pc::Take => {
                if *queued == 0 {
                    return None;
                }
                *queued -= 1;
                caller.pc = Pc::Lookup;
            }
            Pc::Lookup => match entry.as_ref().map(|e| e.state) {
                None | Some(EntryState::NotLoaded | EntryState::Evicted) if fetcher => {
                    caller.pc = Pc::Take;
                }
                None | Some(EntryState::NotLoaded) => caller.pc = Pc::Create,
                Some(EntryState::Evicted) => caller.pc = Pc::RemoveAndRetry,
                Some(EntryState::Created) => return None,
                Some(_) => {
                    caller.pinned = true;
                    caller.pc = Pc::CheckValid;
                }
            },
            Pc::Create => {
                if entry.is_none() {
                    *entry = Some(EntryModel {
                        state: EntryState::Created,
                        valid_flag: false,
                        data_written: false,
                        lock_holder: None,
                        loads: 0,
                    });
                    caller.pinned = true;
                    caller.pc = Pc::SetPlaceholder;
                } else {
                    caller.pc = Pc::Lookup;
                }
            }
            Pc::SetPlaceholder => {
                let entry = entry.as_mut()?;
                entry.state = EntryState::Placeholder;
                caller.pc = Pc::CheckValid;
            }
            Pc::CheckValid => {
                let seen = entry.as_ref()?.observe();
                if seen.valid {
                    caller.observed = Some(seen);
                    caller.pc = Pc::Return;
                } else if caller.role == Role::Volatile {
                    caller.observed = Some(seen);
                    caller.pc = Pc::Enqueue;
                } else if protocol.uses_lock() {
                    caller.pc = Pc::AcquireLock;
                } else {
                    caller.pc = Pc::Load;
                }
            }
            Pc::AcquireLock => {
                let entry = entry.as_mut()?;
                if entry.lock_holder.is_some() {
                    return None;
                }
                entry.lock_holder = Some(id);
                caller.pc = Pc::Recheck;
            }
            Pc::Recheck => {
                let entry = entry.as_mut()?;
                let seen = entry.observe();
                if seen.valid {
                    entry.lock_holder = None;
                    caller.observed = Some(seen);
                    caller.pc = Pc::Return;
                } else {
                    caller.pc = Pc::Load;
                }
            }
            Pc::Load => {
                let entry = entry.as_mut()?;
                entry.loads = entry.loads.saturating_add(1);
                caller.loading = true;
                if protocol == Protocol::InPlaceWrite {
                    entry.valid_flag = true;
                    entry.state = EntryState::Valid;
                    caller.pc = Pc::WriteData;
                } else {
                    caller.pc = Pc::Swap;
                }
            }
            Pc::Swap | Pc::WriteData => {
                let entry = entry.as_mut()?;
                entry.valid_flag = true;
                entry.data_written = true;
                entry.state = EntryState::Valid;
                if entry.lock_holder == Some(id) {
                    entry.lock_holder = None;
                }
                caller.loading = false;
                caller.observed = Some(entry.observe());
                caller.pc = Pc::Return;
            }
            Pc::RemoveAndRetry => {
                if entry
                    .as_ref()
                    .is_some_and(|e| e.state == EntryState::Evicted)
                {
                    *entry = None;
                }
                caller.pc = Pc::Lookup;
            }
            Pc::Enqueue => {
                *queued = queued.saturating_add(1);
                caller.pc = Pc::Return;
            }
            Pc::Return if fetcher => {
                caller.observed = None;
                caller.pinned = false;
                caller.pc = Pc::Take;
            }
            Pc::Return => {
                caller.returned = caller.observed.take();
                caller.pinned = false;
                caller.pc = Pc::Done;
            }
            Pc::Done | Pc::Fail => return None,
        }

        Some(world)
    }
}
