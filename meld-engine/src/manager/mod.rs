//! The CRDT instance manager.
//!
//! One [`Manager`] per process. It owns every named instance (state,
//! op log, version vector), mints Lamport stamps for local mutations,
//! and runs the conflict resolver after every merge. All entry points
//! take `&self`; instances are sharded in a [`DashMap`] and each one
//! is guarded by its own lock, so operations on different instances
//! never contend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use meld_core::{
    ConflictRecord, MeldError, MeldResult, MergeReport, NodeId, OpId, RegistryError,
};
use meld_crdt::{snapshot, CrdtKind, CrdtState, Mutation, OpLog, OpLogEntry, VectorClock};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::resolver::Resolver;
use crate::sync::wire::{AckMessage, DeltaMessage};

/// One named CRDT with its replication bookkeeping.
struct Instance {
    state: CrdtState,
    log: OpLog,
    /// High-water mark per origin node over the ops this instance has
    /// incorporated. Gates duplicate delivery and drives delta sync.
    clock: VectorClock,
}

impl Instance {
    fn new(state: CrdtState) -> Self {
        Self {
            state,
            log: OpLog::new(),
            clock: VectorClock::new(),
        }
    }
}

/// Owns all CRDT instances on one node.
pub struct Manager {
    node: NodeId,
    /// Lamport counter for local mutations, shared across instances.
    lamport: AtomicU64,
    instances: DashMap<String, Arc<RwLock<Instance>>>,
    resolver: Resolver,
    /// Append-only audit of every conflict the resolver recorded.
    conflicts: Mutex<Vec<ConflictRecord>>,
}

impl Manager {
    /// A manager with the default detector set.
    pub fn new(node: impl Into<NodeId>) -> Self {
        Self::with_resolver(node, Resolver::with_default_detectors())
    }

    pub fn with_resolver(node: impl Into<NodeId>, resolver: Resolver) -> Self {
        Self {
            node: node.into(),
            lamport: AtomicU64::new(0),
            instances: DashMap::new(),
            resolver,
            conflicts: Mutex::new(Vec::new()),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node
    }

    /// Register an empty instance of `kind` under `name`. Registering
    /// the same name with the same kind again is a no-op; a different
    /// kind is rejected.
    pub fn register(&self, name: &str, kind: CrdtKind) -> MeldResult<()> {
        self.register_with_state(name, CrdtState::new(kind))
    }

    /// Register an instance with explicit initial state. This is how
    /// workflows get their transition table and initial state.
    pub fn register_with_state(&self, name: &str, state: CrdtState) -> MeldResult<()> {
        match self.instances.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                let existing_kind = existing
                    .get()
                    .read()
                    .map_err(lock_poisoned)?
                    .state
                    .kind();
                if existing_kind == state.kind() {
                    Ok(())
                } else {
                    Err(RegistryError::AlreadyRegistered {
                        name: name.to_string(),
                        existing: existing_kind.to_string(),
                        requested: state.kind().to_string(),
                    }
                    .into())
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(instance = name, kind = %state.kind(), "registered instance");
                slot.insert(Arc::new(RwLock::new(Instance::new(state))));
                Ok(())
            }
        }
    }

    /// Names of all registered instances, sorted.
    pub fn instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn kind_of(&self, name: &str) -> MeldResult<CrdtKind> {
        let handle = self.handle(name)?;
        let inst = handle.read().map_err(lock_poisoned)?;
        Ok(inst.state.kind())
    }

    /// Apply a local mutation: validate it against the current state,
    /// mint its effect, stamp it, and log it. The returned entry is
    /// what peers will eventually replay.
    #[instrument(skip(self, mutation), fields(node = %self.node))]
    pub fn apply_operation(&self, name: &str, mutation: &Mutation) -> MeldResult<OpLogEntry> {
        let handle = self.handle(name)?;
        let mut inst = handle.write().map_err(lock_poisoned)?;
        let op = match mutation {
            // Time-series appends mint their effect during application.
            Mutation::Append {
                timestamp,
                value,
                metadata,
            } => inst
                .state
                .append(*timestamp, *value, metadata.clone(), &self.node)?,
            other => {
                let op = inst.state.prepare(other, &self.node)?;
                inst.state.apply(&op, &self.node)?;
                op
            }
        };
        let lamport = self.lamport.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = OpLogEntry {
            crdt_name: name.to_string(),
            op,
            origin: self.node.clone(),
            lamport,
            op_id: OpId::new(),
        };
        inst.log.append(entry.clone());
        inst.clock.observe(&self.node, lamport);
        debug!(instance = name, lamport, op = entry.op.kind_label(), "applied local op");
        Ok(entry)
    }

    /// Deterministic current value of an instance.
    pub fn get_value(&self, name: &str) -> MeldResult<Value> {
        let handle = self.handle(name)?;
        let inst = handle.read().map_err(lock_poisoned)?;
        Ok(inst.state.value())
    }

    /// The instance's version vector: per-origin high-water marks of
    /// everything it has incorporated.
    pub fn version_vector(&self, name: &str) -> MeldResult<VectorClock> {
        let handle = self.handle(name)?;
        let inst = handle.read().map_err(lock_poisoned)?;
        Ok(inst.clock.clone())
    }

    /// Number of entries currently held in the instance's op log.
    pub fn log_len(&self, name: &str) -> MeldResult<usize> {
        let handle = self.handle(name)?;
        let inst = handle.read().map_err(lock_poisoned)?;
        Ok(inst.log.len())
    }

    /// Merge a full remote state into the local instance. Never loses
    /// data; semantic conflicts are recorded (and repaired where the
    /// type supports it) by the resolver.
    ///
    /// `remote_clock` is the remote's version vector for the instance
    /// (the snapshot envelope carries it). It is folded into the
    /// instance clock, so operations incorporated through this merge
    /// are not replayed when the same history later arrives as a
    /// delta. Counter increments are not idempotent at the op level;
    /// without the clock the two delivery channels would double-apply.
    #[instrument(skip(self, remote, remote_clock), fields(node = %self.node))]
    pub fn merge_remote(
        &self,
        name: &str,
        remote: &CrdtState,
        remote_clock: &VectorClock,
    ) -> MeldResult<MergeReport> {
        let handle = self.handle(name)?;
        let mut inst = handle.write().map_err(lock_poisoned)?;
        let before = inst.state.clone();
        let changed = inst
            .state
            .merge(remote)
            .map_err(|e| named(name, e))?;
        inst.clock.merge(remote_clock);
        let conflicts = self
            .resolver
            .inspect(name, &before, &mut inst.state);
        self.record_conflicts(&conflicts)?;
        Ok(MergeReport { changed, conflicts })
    }

    /// Entries a peer is missing, given its last acknowledged clock.
    /// Bounded by `max_entries`, oldest first; a peer that is up to
    /// date gets an empty batch.
    pub fn delta_for(
        &self,
        name: &str,
        peer_clock: &VectorClock,
        max_entries: usize,
    ) -> MeldResult<DeltaMessage> {
        let handle = self.handle(name)?;
        let inst = handle.read().map_err(lock_poisoned)?;
        let mut entries = inst.log.entries_since(peer_clock);
        entries.sort_by_key(|e| (e.lamport, e.origin.clone()));
        entries.truncate(max_entries);
        Ok(DeltaMessage {
            instance: name.to_string(),
            kind: inst.state.kind(),
            sender: self.node.clone(),
            sender_clock: inst.clock.clone(),
            entries,
        })
    }

    /// Apply a delta received from a peer. Idempotent per entry: an
    /// entry whose `(origin, lamport)` the instance clock already
    /// covers is skipped. A malformed entry is logged and skipped
    /// without poisoning the rest of the batch. Unknown instances are
    /// registered on first contact using the kind carried in the
    /// message.
    #[instrument(skip(self, delta), fields(node = %self.node, instance = %delta.instance))]
    pub fn apply_delta(&self, delta: &DeltaMessage) -> MeldResult<AckMessage> {
        self.register(&delta.instance, delta.kind)?;
        let handle = self.handle(&delta.instance)?;
        let mut inst = handle.write().map_err(lock_poisoned)?;
        let before = inst.state.clone();
        let mut applied = 0usize;
        for entry in &delta.entries {
            if entry.crdt_name != delta.instance {
                warn!(
                    expected = %delta.instance,
                    found = %entry.crdt_name,
                    "delta entry for wrong instance, skipping"
                );
                continue;
            }
            if entry.lamport <= inst.clock.get(&entry.origin) {
                continue;
            }
            match inst.state.apply(&entry.op, &entry.origin) {
                Ok(()) => {
                    inst.clock.observe(&entry.origin, entry.lamport);
                    inst.log.append(entry.clone());
                    applied += 1;
                }
                Err(e) => {
                    warn!(
                        origin = %entry.origin,
                        lamport = entry.lamport,
                        error = %e,
                        "malformed delta entry, skipping"
                    );
                }
            }
        }
        if applied > 0 {
            let conflicts = self
                .resolver
                .inspect(&delta.instance, &before, &mut inst.state);
            self.record_conflicts(&conflicts)?;
            debug!(applied, total = delta.entries.len(), "applied delta batch");
        }
        Ok(AckMessage {
            instance: delta.instance.clone(),
            sender: self.node.clone(),
            applied_up_to: inst.clock.clone(),
        })
    }

    /// Serialize an instance for the archival layer.
    pub fn snapshot(&self, name: &str) -> MeldResult<Vec<u8>> {
        let handle = self.handle(name)?;
        let inst = handle.read().map_err(lock_poisoned)?;
        let bytes = snapshot::encode(
            &inst.state,
            &inst.clock,
            self.lamport.load(Ordering::SeqCst),
            &self.node,
        )?;
        Ok(bytes)
    }

    /// Restore an instance from a snapshot, replacing any live state
    /// under the same name. The op log restarts empty; anything the
    /// snapshot predates comes back through merge or delta sync. The
    /// local Lamport counter is raised to at least the snapshot's floor
    /// so new stamps never collide with pre-snapshot ones.
    pub fn restore(&self, name: &str, bytes: &[u8]) -> MeldResult<()> {
        let envelope = snapshot::decode(bytes)?;
        self.lamport.fetch_max(envelope.lamport, Ordering::SeqCst);
        if let Some(existing) = self.instances.get(name) {
            let existing_kind = existing.read().map_err(lock_poisoned)?.state.kind();
            if existing_kind != envelope.kind {
                return Err(RegistryError::KindMismatch {
                    name: name.to_string(),
                    expected: existing_kind.to_string(),
                    found: envelope.kind.to_string(),
                }
                .into());
            }
        }
        let mut instance = Instance::new(envelope.state);
        instance.clock = envelope.version_vector;
        self.instances
            .insert(name.to_string(), Arc::new(RwLock::new(instance)));
        debug!(instance = name, kind = %envelope.kind, "restored from snapshot");
        Ok(())
    }

    /// Drop op-log entries at or below `floor` (the pointwise minimum
    /// of every peer's acknowledged clock). When the floor covers the
    /// whole instance clock, every peer has everything local, and
    /// tombstones are pruned too. Returns the number of log entries
    /// dropped.
    pub fn compact(&self, name: &str, floor: &VectorClock) -> MeldResult<usize> {
        let handle = self.handle(name)?;
        let mut inst = handle.write().map_err(lock_poisoned)?;
        let dropped = inst.log.compact(floor);
        let fully_acknowledged = inst
            .clock
            .nodes()
            .all(|n| floor.get(n) >= inst.clock.get(n));
        if fully_acknowledged {
            let pruned = inst.state.prune_tombstones();
            if pruned > 0 {
                debug!(instance = name, pruned, "pruned tombstones");
            }
        }
        if dropped > 0 {
            debug!(instance = name, dropped, "compacted op log");
        }
        Ok(dropped)
    }

    /// Every conflict recorded on this node, oldest first.
    pub fn conflict_log(&self) -> MeldResult<Vec<ConflictRecord>> {
        Ok(self
            .conflicts
            .lock()
            .map_err(lock_poisoned)?
            .clone())
    }

    fn handle(&self, name: &str) -> MeldResult<Arc<RwLock<Instance>>> {
        self.instances
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| RegistryError::UnknownInstance(name.to_string()).into())
    }

    fn record_conflicts(&self, records: &[ConflictRecord]) -> MeldResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.conflicts
            .lock()
            .map_err(lock_poisoned)?
            .extend_from_slice(records);
        Ok(())
    }
}

fn lock_poisoned<E: std::fmt::Display>(e: E) -> MeldError {
    MeldError::Internal(format!("instance lock poisoned: {e}"))
}

/// Fill in the instance name on kind mismatches surfacing from the
/// state layer, which does not know it.
fn named(name: &str, e: RegistryError) -> MeldError {
    match e {
        RegistryError::KindMismatch {
            expected, found, ..
        } => RegistryError::KindMismatch {
            name: name.to_string(),
            expected,
            found,
        }
        .into(),
        other => other.into(),
    }
}
