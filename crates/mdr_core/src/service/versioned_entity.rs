//! Versioned-entity façade.
//!
//! # Responsibility
//! - Run every save as one locked transaction: snapshot proposal, ledger
//!   transition and audit record commit together or not at all.
//! - Serve temporal reads through the read cache.
//!
//! # Invariants
//! - Version allocation happens after the root claim, so concurrent saves on
//!   one root never produce duplicate or skipped versions.
//! - Mutating a root of a non-editable library is rejected unless the kind's
//!   equality strategy allows it.
//! - Reads inside an open transaction bypass the cache; commits invalidate it.
//! - Cached reads are validated against the root's `lock_token`, so saves
//!   made through any other façade or connection are seen on the next read.

use crate::db::ensure_schema_ready;
use crate::error::{VersioningError, VersioningResult};
use crate::model::audit::{diff, AuditDiff};
use crate::model::entity::{
    AuditAction, AuditKind, EntityRoot, EntityState, Library, ResolvedEntity, VersionEdge,
};
use crate::model::equality::StrategyRegistry;
use crate::model::ledger;
use crate::model::snapshot::{EntityKind, RootUid, SnapshotContent};
use crate::model::temporal::{edges_valid_at, resolve, ResolveMode, Resolution};
use crate::model::version::{LibraryItemStatus, ObjectAction, Version};
use crate::repo::audit_repo::SqliteAuditRepository;
use crate::repo::ledger_repo::{NewVersionEdge, SqliteLedgerRepository};
use crate::repo::library_repo::SqliteLibraryRepository;
use crate::repo::lock;
use crate::repo::snapshot_repo::SqliteSnapshotRepository;
use crate::service::cache::EntityCache;
use crate::service::collaborators::{
    AuthorIdAsUsername, AuthorUsernameResolver, Clock, DisplayVersionPicker,
    HighestVersionPicker, SystemClock,
};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// Desired change handed to [`VersionedEntityService::save`].
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub action: ObjectAction,
    /// Target library; only read by `Create`.
    pub library_name: Option<String>,
    pub content: Option<SnapshotContent>,
    pub author_id: String,
    pub change_description: Option<String>,
}

impl SaveRequest {
    fn new(action: ObjectAction, author_id: impl Into<String>) -> Self {
        Self {
            action,
            library_name: None,
            content: None,
            author_id: author_id.into(),
            change_description: None,
        }
    }

    pub fn create(
        library_name: impl Into<String>,
        content: SnapshotContent,
        author_id: impl Into<String>,
    ) -> Self {
        let mut request = Self::new(ObjectAction::Create, author_id).with_content(content);
        request.library_name = Some(library_name.into());
        request
    }

    pub fn edit(content: SnapshotContent, author_id: impl Into<String>) -> Self {
        Self::new(ObjectAction::Edit, author_id).with_content(content)
    }

    pub fn approve(author_id: impl Into<String>) -> Self {
        Self::new(ObjectAction::Approve, author_id)
    }

    /// Opens a draft on top of the Final version. Content is optional.
    pub fn new_version(author_id: impl Into<String>) -> Self {
        Self::new(ObjectAction::NewVersion, author_id)
    }

    pub fn inactivate(author_id: impl Into<String>) -> Self {
        Self::new(ObjectAction::Inactivate, author_id)
    }

    pub fn reactivate(author_id: impl Into<String>) -> Self {
        Self::new(ObjectAction::Reactivate, author_id)
    }

    pub fn delete(author_id: impl Into<String>) -> Self {
        Self::new(ObjectAction::Delete, author_id)
    }

    pub fn with_content(mut self, content: SnapshotContent) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_change_description(mut self, description: impl Into<String>) -> Self {
        self.change_description = Some(description.into());
        self
    }
}

/// Result of a committed save.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    pub root: EntityRoot,
    /// Newly opened edge. `None` after `Delete`.
    pub edge: Option<VersionEdge>,
    /// Whether the content differs from the base snapshot.
    pub changed: bool,
    pub audit_action_id: i64,
}

/// Read selector for [`VersionedEntityService::find_by_uid`].
///
/// `version` wins over `at_date`; without either, `status` picks the latest
/// edge of that status and no selector means `Latest`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub version: Option<Version>,
    pub status: Option<LibraryItemStatus>,
    pub at_date: Option<i64>,
}

impl FindOptions {
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn at_date(at: i64) -> Self {
        Self {
            at_date: Some(at),
            ..Self::default()
        }
    }

    pub fn version(version: Version) -> Self {
        Self {
            version: Some(version),
            ..Self::default()
        }
    }

    pub fn status(status: LibraryItemStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn mode(&self) -> ResolveMode {
        match (self.version, self.at_date, self.status) {
            (Some(version), _, _) => ResolveMode::Version(version),
            (None, Some(at), _) => ResolveMode::AtDate(at),
            (None, None, Some(LibraryItemStatus::Final)) => ResolveMode::LatestFinal,
            (None, None, Some(LibraryItemStatus::Retired)) => ResolveMode::LatestRetired,
            (None, None, _) => ResolveMode::Latest,
        }
    }
}

impl Display for FindOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(version) = self.version {
            parts.push(format!("version={version}"));
        }
        if let Some(status) = self.status {
            parts.push(format!("status={status}"));
        }
        if let Some(at) = self.at_date {
            parts.push(format!("at_date={at}"));
        }
        if parts.is_empty() {
            parts.push("latest".to_string());
        }
        f.write_str(&parts.join(" "))
    }
}

/// An entity with each reference resolved as of the entity's own start date.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGraph {
    pub entity: ResolvedEntity,
    pub references: BTreeMap<String, Vec<ResolvedEntity>>,
}

/// Façade composing snapshot store, ledger, lock manager and audit trail.
pub struct VersionedEntityService<'conn> {
    conn: &'conn Connection,
    strategies: StrategyRegistry,
    cache: EntityCache,
    picker: Box<dyn DisplayVersionPicker>,
    usernames: Box<dyn AuthorUsernameResolver + 'conn>,
    clock: Arc<dyn Clock>,
}

impl<'conn> VersionedEntityService<'conn> {
    /// Builds a façade with default collaborators over a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> VersioningResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self {
            conn,
            strategies: StrategyRegistry::default(),
            cache: EntityCache::default(),
            picker: Box::new(HighestVersionPicker),
            usernames: Box::new(AuthorIdAsUsername),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    /// Shares `cache` with other façades, e.g. one per worker connection.
    pub fn with_cache(mut self, cache: EntityCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_display_version_picker(
        mut self,
        picker: impl DisplayVersionPicker + 'static,
    ) -> Self {
        self.picker = Box::new(picker);
        self
    }

    pub fn with_username_resolver(
        mut self,
        resolver: impl AuthorUsernameResolver + 'conn,
    ) -> Self {
        self.usernames = Box::new(resolver);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn create_library(&self, name: &str, is_editable: bool) -> VersioningResult<Library> {
        SqliteLibraryRepository::new(self.conn).create_library(name, is_editable)
    }

    pub fn set_library_editable(&self, name: &str, is_editable: bool) -> VersioningResult<()> {
        SqliteLibraryRepository::new(self.conn).set_editable(name, is_editable)
    }

    /// Applies one lifecycle action atomically.
    ///
    /// `uid` is `None` only for `Create`, which allocates a fresh uid.
    ///
    /// # Errors
    /// - `InvalidTransition` when the action is not allowed in the current state.
    /// - `BusinessRule` for non-editable libraries, deleting released roots
    ///   and dangling references.
    /// - `Concurrency` when the root stays claimed past the busy timeout.
    pub fn save(&self, uid: Option<&str>, request: SaveRequest) -> VersioningResult<SaveOutcome> {
        let started_at = Instant::now();
        let action = request.action;
        let result = match uid {
            Some(uid) => lock::with_lock(self.conn, uid, |tx| {
                self.save_in(tx, Some(uid), request)
            }),
            None => lock::with_write_transaction(self.conn, |tx| self.save_in(tx, None, request)),
        };

        match &result {
            Ok(outcome) => {
                self.cache.invalidate([outcome.root.uid.as_str()]);
                info!(
                    "event=entity_save module=service status=ok action={} root_uid={} version={} changed={} duration_ms={}",
                    action,
                    outcome.root.uid,
                    outcome
                        .edge
                        .as_ref()
                        .map_or_else(|| "-".to_string(), |edge| edge.version.to_string()),
                    outcome.changed,
                    started_at.elapsed().as_millis()
                );
            }
            Err(err) => warn!(
                "event=entity_save module=service status=error action={} root_uid={} retryable={} duration_ms={} error={}",
                action,
                uid.unwrap_or("-"),
                err.is_retryable(),
                started_at.elapsed().as_millis(),
                err
            ),
        }

        result
    }

    /// Runs `f` with an exclusive claim on `uid` for several saves at once.
    ///
    /// Everything done through the scope commits together. Every uid saved
    /// through the scope is evicted from the cache after commit.
    pub fn with_lock<T, F>(&self, uid: &str, f: F) -> VersioningResult<T>
    where
        F: FnOnce(&LockedScope<'_, 'conn>) -> VersioningResult<T>,
    {
        let touched = RefCell::new(BTreeSet::from([uid.to_string()]));
        let result = lock::with_lock(self.conn, uid, |tx| {
            let conn: &Connection = tx;
            let scope = LockedScope {
                service: self,
                conn,
                touched: &touched,
            };
            f(&scope)
        });

        if result.is_ok() {
            let touched = touched.borrow();
            self.cache.invalidate(touched.iter().map(String::as_str));
        }
        result
    }

    /// Resolves one version of `uid`.
    ///
    /// # Errors
    /// - `NotFound` for unknown or deleted roots and unmatched selectors.
    pub fn find_by_uid(&self, uid: &str, options: &FindOptions) -> VersioningResult<ResolvedEntity> {
        let root = SqliteLibraryRepository::new(self.conn).require_active_root(uid)?;
        let edges = self.cached_edges(uid)?;
        self.resolve_entity(self.conn, root, &edges, options)
    }

    /// Every edge of `uid`, ordered by `(major, minor, start_date)`.
    pub fn get_all_versions(&self, uid: &str) -> VersioningResult<Vec<ResolvedEntity>> {
        let root = SqliteLibraryRepository::new(self.conn).require_active_root(uid)?;
        let edges = self.cached_edges(uid)?;
        edges
            .iter()
            .map(|edge| {
                self.materialize(
                    self.conn,
                    &root,
                    &edges,
                    Resolution {
                        edge,
                        date_conflict: false,
                    },
                    edge.start_date,
                )
            })
            .collect()
    }

    /// Audit actions of `uid`, newest first. Deleted roots keep their history.
    pub fn history(&self, uid: &str) -> VersioningResult<Vec<AuditAction>> {
        if SqliteLibraryRepository::new(self.conn)
            .get_root(uid)?
            .is_none()
        {
            return Err(VersioningError::not_found_root(uid));
        }
        let audits = SqliteAuditRepository::new(self.conn);
        let Some(lock_token) = self.cacheable_token(uid)? else {
            return audits.history(uid);
        };
        if let Some(actions) = self.cache.history(uid, lock_token) {
            return Ok(actions.to_vec());
        }

        let actions = Arc::new(audits.history(uid)?);
        self.cache.store_history(uid, lock_token, Arc::clone(&actions));
        Ok(actions.to_vec())
    }

    /// Changed attribute names per audit entry, oldest first.
    pub fn history_diff(&self, uid: &str) -> VersioningResult<Vec<AuditDiff>> {
        Ok(diff(&self.history(uid)?))
    }

    /// Resolves `uid`, then each referenced root as of the resolved edge's start.
    ///
    /// References whose root has since been deleted are skipped.
    pub fn find_with_references(
        &self,
        uid: &str,
        options: &FindOptions,
    ) -> VersioningResult<ResolvedGraph> {
        let entity = self.find_by_uid(uid, options)?;
        let reference_options = FindOptions::at_date(entity.edge.start_date);

        let mut references = BTreeMap::new();
        for (category, uids) in &entity.content.references {
            let mut resolved = Vec::with_capacity(uids.len());
            for target in uids {
                match self.find_by_uid(target, &reference_options) {
                    Ok(reference) => resolved.push(reference),
                    Err(VersioningError::NotFound(reason)) => warn!(
                        "event=temporal_resolve module=service status=missing_reference root_uid={} category={} target_uid={} reason={}",
                        uid, category, target, reason
                    ),
                    Err(err) => return Err(err),
                }
            }
            references.insert(category.clone(), resolved);
        }

        Ok(ResolvedGraph { entity, references })
    }

    pub fn possible_actions(&self, uid: &str) -> VersioningResult<BTreeSet<ObjectAction>> {
        SqliteLibraryRepository::new(self.conn).require_active_root(uid)?;
        let edges = self.cached_edges(uid)?;
        Ok(ledger::possible_actions(&edges))
    }

    /// Checks the stored ledger of `uid`. Reads storage directly, repairs nothing.
    pub fn verify(&self, uid: &str) -> VersioningResult<()> {
        if SqliteLibraryRepository::new(self.conn)
            .get_root(uid)?
            .is_none()
        {
            return Err(VersioningError::not_found_root(uid));
        }
        let edges = SqliteLedgerRepository::new(self.conn).list_edges(uid)?;
        let verdict = ledger::verify_ledger(uid, &edges);
        if let Err(err) = &verdict {
            error!(
                "event=ledger_verify module=service status=violation root_uid={} error={}",
                uid, err
            );
        }
        verdict
    }

    /// Active roots of `kind`, ordered by uid.
    pub fn list_roots(&self, kind: EntityKind) -> VersioningResult<Vec<EntityRoot>> {
        SqliteLibraryRepository::new(self.conn).list_roots(kind)
    }

    /// Ledger of `uid`, served from the cache while its `lock_token` holds.
    ///
    /// The token is read before the edges. A save committing in between
    /// leaves the entry stamped with the older token, so the next read
    /// reloads instead of serving it.
    fn cached_edges(&self, uid: &str) -> VersioningResult<Arc<Vec<VersionEdge>>> {
        let ledgers = SqliteLedgerRepository::new(self.conn);
        let Some(lock_token) = self.cacheable_token(uid)? else {
            return Ok(Arc::new(ledgers.list_edges(uid)?));
        };
        if let Some(edges) = self.cache.ledger(uid, lock_token) {
            return Ok(edges);
        }
        let edges = Arc::new(ledgers.list_edges(uid)?);
        self.cache.store_ledger(uid, lock_token, Arc::clone(&edges));
        Ok(edges)
    }

    /// Token to stamp cache entries of `uid` with, or `None` when the read
    /// runs inside an open transaction and must not touch the cache.
    fn cacheable_token(&self, uid: &str) -> VersioningResult<Option<i64>> {
        if !self.conn.is_autocommit() {
            debug!("event=cache_bypass module=service status=in_transaction root_uid={uid}");
            return Ok(None);
        }
        SqliteLibraryRepository::new(self.conn)
            .lock_token(uid)?
            .map(Some)
            .ok_or_else(|| VersioningError::not_found_root(uid))
    }

    fn save_in(
        &self,
        conn: &Connection,
        uid: Option<&str>,
        request: SaveRequest,
    ) -> VersioningResult<SaveOutcome> {
        if request.author_id.trim().is_empty() {
            return Err(VersioningError::InvalidData(
                "author_id must not be blank".to_string(),
            ));
        }

        match (uid, request.action) {
            (None, ObjectAction::Create) => self.create_in(conn, request),
            (Some(uid), _) => self.transition_in(conn, uid, request),
            (None, action) => Err(VersioningError::InvalidData(format!(
                "`{action}` needs the uid of an existing root"
            ))),
        }
    }

    fn create_in(&self, conn: &Connection, request: SaveRequest) -> VersioningResult<SaveOutcome> {
        let SaveRequest {
            library_name,
            content,
            author_id,
            change_description,
            ..
        } = request;
        let content = content
            .ok_or_else(|| VersioningError::InvalidData("create needs content".to_string()))?;
        content.validate()?;
        let library_name = library_name
            .ok_or_else(|| VersioningError::InvalidData("create needs a library".to_string()))?;

        let libraries = SqliteLibraryRepository::new(conn);
        let library = libraries.require_library(&library_name)?;
        if !library.is_editable {
            return Err(VersioningError::BusinessRule(format!(
                "library `{}` is not editable; new {} roots cannot be created in it",
                library.name, content.kind
            )));
        }
        ensure_references_active(&libraries, &content)?;

        let now = self.clock.now_ms();
        let root = libraries.create_root(content.kind, &library.name, now)?;
        let strategy = self.strategies.for_kind(content.kind);
        let proposal = SqliteSnapshotRepository::new(conn).propose(None, &content, strategy, now)?;

        let description = change_description
            .unwrap_or_else(|| ObjectAction::Create.default_change_description().to_string());
        let edge = SqliteLedgerRepository::new(conn).insert_edge(&NewVersionEdge {
            root_uid: &root.uid,
            snapshot_id: &proposal.snapshot_id,
            status: LibraryItemStatus::Draft,
            version: Version::INITIAL_DRAFT,
            start_date: now,
            author_id: &author_id,
            change_description: &description,
        })?;

        let after = EntityState::from_edge(&edge, &content);
        let action = SqliteAuditRepository::new(conn).record(
            &root.uid,
            AuditKind::Create,
            None,
            Some(&after),
            &author_id,
            now,
        )?;

        Ok(SaveOutcome {
            root,
            edge: Some(edge),
            changed: proposal.changed,
            audit_action_id: action.action_id,
        })
    }

    fn transition_in(
        &self,
        conn: &Connection,
        uid: &str,
        request: SaveRequest,
    ) -> VersioningResult<SaveOutcome> {
        let SaveRequest {
            action,
            content: desired,
            author_id,
            change_description,
            ..
        } = request;

        let libraries = SqliteLibraryRepository::new(conn);
        let mut root = libraries.require_active_root(uid)?;
        let library = libraries.require_library(&root.library_name)?;
        let ledger_repo = SqliteLedgerRepository::new(conn);
        let edges = ledger_repo.list_edges(uid)?;
        let plan = ledger::plan_transition(uid, &edges, action)?;

        let strategy = self.strategies.for_kind(root.kind);
        if !library.is_editable && !strategy.edit_allowed_in_non_editable_library() {
            return Err(VersioningError::BusinessRule(format!(
                "library `{}` is not editable; {uid} cannot be changed",
                library.name
            )));
        }

        let base = plan.base.as_ref().ok_or_else(|| VersioningError::InvalidTransition {
            uid: uid.to_string(),
            status: None,
            action,
        })?;
        let now = ledger::next_start_date(&edges, self.clock.now_ms());
        let snapshots = SqliteSnapshotRepository::new(conn);
        let base_snapshot = snapshots.require(&base.snapshot_id)?;
        let before = EntityState::from_edge(base, &base_snapshot.content);
        let audit = SqliteAuditRepository::new(conn);

        let Some(next) = plan.next else {
            for snapshot_id in ledger_repo.delete_edges(uid)? {
                snapshots.delete_if_unreferenced(&snapshot_id)?;
            }
            libraries.tombstone_root(uid, now)?;
            root.deleted_at = Some(now);
            let recorded =
                audit.record(uid, AuditKind::Delete, Some(&before), None, &author_id, now)?;
            return Ok(SaveOutcome {
                root,
                edge: None,
                changed: true,
                audit_action_id: recorded.action_id,
            });
        };

        let (snapshot_id, content, changed) = match desired {
            Some(desired) if plan.accepts_content => {
                desired.validate()?;
                ensure_references_active(&libraries, &desired)?;
                let proposal =
                    snapshots.propose(Some((base, &base_snapshot)), &desired, strategy, now)?;
                let content = if proposal.changed {
                    desired
                } else {
                    base_snapshot.content.clone()
                };
                (proposal.snapshot_id, content, proposal.changed)
            }
            Some(_) => {
                return Err(VersioningError::InvalidData(format!(
                    "`{action}` keeps the current content and does not accept new content"
                )))
            }
            None if action == ObjectAction::Edit => {
                return Err(VersioningError::InvalidData(
                    "edit needs content".to_string(),
                ))
            }
            None => (base.snapshot_id.clone(), base_snapshot.content.clone(), false),
        };

        ledger_repo.close_edges(uid, &plan.close, now)?;
        let description = change_description
            .unwrap_or_else(|| action.default_change_description().to_string());
        let edge = ledger_repo.insert_edge(&NewVersionEdge {
            root_uid: uid,
            snapshot_id: &snapshot_id,
            status: next.status,
            version: next.version,
            start_date: now,
            author_id: &author_id,
            change_description: &description,
        })?;

        let after = EntityState::from_edge(&edge, &content);
        let recorded = audit.record(
            uid,
            AuditKind::Edit,
            Some(&before),
            Some(&after),
            &author_id,
            now,
        )?;

        Ok(SaveOutcome {
            root,
            edge: Some(edge),
            changed,
            audit_action_id: recorded.action_id,
        })
    }

    fn resolve_entity(
        &self,
        conn: &Connection,
        root: EntityRoot,
        edges: &[VersionEdge],
        options: &FindOptions,
    ) -> VersioningResult<ResolvedEntity> {
        let resolution = match (options.version, options.status) {
            (Some(version), Some(status)) => {
                let same_status: Vec<VersionEdge> = edges
                    .iter()
                    .filter(|edge| edge.status == status)
                    .cloned()
                    .collect();
                let found = resolve(&same_status, ResolveMode::Version(version))
                    .and_then(|found| edges.iter().find(|edge| edge.edge_id == found.edge.edge_id));
                found.map(|edge| Resolution {
                    edge,
                    date_conflict: false,
                })
            }
            _ => resolve(edges, options.mode()),
        };

        let resolution = resolution
            .filter(|resolution| {
                options
                    .status
                    .map_or(true, |status| resolution.edge.status == status)
            })
            .ok_or_else(|| {
                VersioningError::NotFound(format!("{} has no version matching {options}", root.uid))
            })?;

        let display_at = match options.at_date {
            Some(at) if options.version.is_none() && !resolution.date_conflict => at,
            _ => resolution.edge.start_date,
        };
        if resolution.date_conflict {
            info!(
                "event=temporal_resolve module=service status=date_conflict root_uid={} requested={} fallback_version={}",
                root.uid,
                options.at_date.unwrap_or_default(),
                resolution.edge.version
            );
        } else {
            debug!(
                "event=temporal_resolve module=service status=ok root_uid={} version={}",
                root.uid, resolution.edge.version
            );
        }

        self.materialize(conn, &root, edges, resolution, display_at)
    }

    fn materialize(
        &self,
        conn: &Connection,
        root: &EntityRoot,
        edges: &[VersionEdge],
        resolution: Resolution<'_>,
        display_at: i64,
    ) -> VersioningResult<ResolvedEntity> {
        let edge = resolution.edge;
        let snapshot = SqliteSnapshotRepository::new(conn).require(&edge.snapshot_id)?;
        let display_version = self
            .picker
            .pick(&edges_valid_at(edges, display_at))
            .unwrap_or(edge.version);

        Ok(ResolvedEntity {
            root: root.clone(),
            edge: edge.clone(),
            content: snapshot.content,
            date_conflict: resolution.date_conflict,
            display_version,
            author_username: self.usernames.username(&edge.author_id),
        })
    }
}

/// Handle for saves and reads inside [`VersionedEntityService::with_lock`].
pub struct LockedScope<'s, 'conn> {
    service: &'s VersionedEntityService<'conn>,
    conn: &'s Connection,
    touched: &'s RefCell<BTreeSet<RootUid>>,
}

impl LockedScope<'_, '_> {
    /// Saves inside the surrounding transaction, claiming `uid` first if needed.
    pub fn save(&self, uid: Option<&str>, request: SaveRequest) -> VersioningResult<SaveOutcome> {
        if let Some(uid) = uid {
            let claimed = self.touched.borrow().contains(uid);
            if !claimed {
                lock::claim_root(self.conn, uid)?;
                self.touched.borrow_mut().insert(uid.to_string());
            }
        }

        let outcome = self.service.save_in(self.conn, uid, request)?;
        self.touched.borrow_mut().insert(outcome.root.uid.clone());
        Ok(outcome)
    }

    /// Uncached read that sees this transaction's uncommitted writes.
    pub fn find_by_uid(&self, uid: &str, options: &FindOptions) -> VersioningResult<ResolvedEntity> {
        let root = SqliteLibraryRepository::new(self.conn).require_active_root(uid)?;
        let edges = SqliteLedgerRepository::new(self.conn).list_edges(uid)?;
        self.service.resolve_entity(self.conn, root, &edges, options)
    }
}

fn ensure_references_active(
    libraries: &SqliteLibraryRepository<'_>,
    content: &SnapshotContent,
) -> VersioningResult<()> {
    for (category, uids) in &content.references {
        for uid in uids {
            match libraries.get_root(uid)? {
                Some(root) if !root.is_deleted() => {}
                _ => {
                    return Err(VersioningError::BusinessRule(format!(
                        "reference `{uid}` in `{category}` does not point to an existing entity"
                    )))
                }
            }
        }
    }
    Ok(())
}
