//! Function service
//!
//! The facade a query executor talks to. Every operation checks
//! permissions through the [`PermissionGate`] first, every definition
//! change is written to the [`MetadataStore`] before it is published in
//! the [`FunctionRegistry`], and every call runs through the [`Invoker`].
//!
//! DDL is serialized by one mutex so that the check, persist and publish
//! steps of one statement cannot interleave with another's. Invocations
//! never take it.

use crate::aggregate::AggregateDriver;
use crate::config::{EngineConfig, CONFIG_FILE_NAME};
use crate::invoke::Invoker;
use crate::registry::{DropPolicy, DroppedFunction, FunctionRegistry, Routine};
use ferrule_core::{
    AggregateDefinition, CqlType, Error, FunctionDefinition, FunctionKey, FunctionName, Result,
    RoutineKind, SchemaEntry, SchemaKey, Value,
};
use ferrule_durability::{FileMetadataStore, MetadataStore};
use ferrule_sandbox::{PreparedFunction, Sandbox};
use ferrule_security::{
    FunctionResource, GrantTable, Permission, PermissionCache, PermissionGate, PermissionGrant,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// How a CREATE statement treats an existing key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// `CREATE`: fail with `AlreadyExists`
    Create,
    /// `CREATE ... IF NOT EXISTS`: keep the existing definition
    CreateIfNotExists,
    /// `CREATE OR REPLACE`: replace it
    CreateOrReplace,
}

impl CreateMode {
    fn replace(self) -> bool {
        self == CreateMode::CreateOrReplace
    }
}

/// What a CREATE statement did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// New key defined
    Created,
    /// Existing definition replaced
    Replaced,
    /// Key existed and the statement was `IF NOT EXISTS`
    Skipped,
}

/// User-defined function and aggregate service
pub struct FunctionService {
    registry: FunctionRegistry,
    invoker: Invoker,
    gate: Arc<dyn PermissionGate>,
    store: Arc<dyn MetadataStore>,
    drop_policy: DropPolicy,
    ddl: Mutex<()>,
}

impl std::fmt::Debug for FunctionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionService")
            .field("registry", &self.registry)
            .field("sandbox", self.invoker.sandbox())
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl FunctionService {
    /// Open a service rooted at `path`
    ///
    /// Creates the directory and a default `ferrule.toml` if missing, opens
    /// the schema log in it and replays every persisted definition.
    /// Permission decisions from `grants` are cached for the configured
    /// validity window.
    ///
    /// # Example
    ///
    /// ```text
    /// use ferrule_engine::FunctionService;
    /// use ferrule_security::GrantTable;
    ///
    /// let service = FunctionService::open("/path/to/data", GrantTable::new().with_superuser("admin"))?;
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, grants: GrantTable) -> Result<Self> {
        let data_dir = path.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        EngineConfig::write_default_if_missing(&config_path)?;
        let config = EngineConfig::from_file(&config_path)?;
        Self::open_at(data_dir, config, grants)
    }

    /// Open with an explicit configuration
    ///
    /// The configuration is written to `ferrule.toml` so that later
    /// [`open`](Self::open) calls pick up the same settings.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: EngineConfig,
        grants: GrantTable,
    ) -> Result<Self> {
        let data_dir = path.as_ref();
        std::fs::create_dir_all(data_dir)?;
        config.validate()?;
        config.write_to_file(&data_dir.join(CONFIG_FILE_NAME))?;
        Self::open_at(data_dir, config, grants)
    }

    fn open_at(data_dir: &Path, config: EngineConfig, grants: GrantTable) -> Result<Self> {
        let store = FileMetadataStore::open(data_dir)?;
        let gate = PermissionCache::new(grants, config.permissions_validity());
        let service = Self::with_parts(&config, Arc::new(gate), Arc::new(store))?;
        info!(
            target: "ferrule::engine",
            path = %data_dir.display(),
            routines = service.registry.len(),
            "Opened function service"
        );
        Ok(service)
    }

    /// Build a service from explicit parts and replay `store`
    ///
    /// # Errors
    ///
    /// `Config` for invalid settings, or `Corruption` when a persisted
    /// definition can no longer be prepared or registered.
    pub fn with_parts(
        config: &EngineConfig,
        gate: Arc<dyn PermissionGate>,
        store: Arc<dyn MetadataStore>,
    ) -> Result<Self> {
        let languages = config.languages()?;
        let sandbox = Sandbox::new(
            &languages,
            config.sandbox_limits()?,
            config.sandbox.disallowed_prefixes.iter().cloned(),
        )?;
        let service = Self {
            registry: FunctionRegistry::new(),
            invoker: Invoker::new(Arc::new(sandbox)),
            gate,
            store,
            drop_policy: config.drop_policy()?,
            ddl: Mutex::new(()),
        };
        service.replay()?;
        Ok(service)
    }

    fn replay(&self) -> Result<()> {
        let sandbox = self.invoker.sandbox();
        let mut functions = Vec::new();
        let mut aggregates = Vec::new();
        for entry in self.store.load_all()? {
            match entry {
                SchemaEntry::Function(def) => {
                    let prepared = sandbox.prepare(&def).map_err(|e| {
                        Error::Corruption(format!(
                            "Persisted function {} no longer prepares: {}",
                            def.key(),
                            e
                        ))
                    })?;
                    functions.push(prepared);
                }
                SchemaEntry::Aggregate(def) => aggregates.push(def),
            }
        }
        self.registry
            .load(functions, aggregates)
            .map_err(|e| Error::Corruption(format!("Persisted schema does not load: {}", e)))
    }

    /// The registry
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// The invoker
    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// The permission gate
    pub fn gate(&self) -> &Arc<dyn PermissionGate> {
        &self.gate
    }

    /// Drop policy in effect
    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    fn require_create(
        &self,
        grantee: &str,
        key: &FunctionKey,
        mode: CreateMode,
    ) -> Result<()> {
        self.gate.require(
            grantee,
            Permission::Create,
            &FunctionResource::Keyspace(key.name.keyspace.clone()),
        )?;
        if mode.replace() {
            self.gate
                .require(grantee, Permission::Alter, &FunctionResource::from_key(key))?;
        }
        Ok(())
    }

    /// `CREATE [OR REPLACE] FUNCTION [IF NOT EXISTS]`
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` / `FrozenSignatureViolation` whatever the
    /// caller's permissions, then `Unauthorized`, then any verification or
    /// compilation error, then `AlreadyExists`; a failed persist leaves the
    /// registry unchanged.
    pub fn create_function(
        &self,
        grantee: &str,
        def: FunctionDefinition,
        mode: CreateMode,
    ) -> Result<CreateOutcome> {
        def.validate()?;
        let key = def.key();
        self.require_create(grantee, &key, mode)?;

        let _ddl = self.ddl.lock();
        if mode == CreateMode::CreateIfNotExists && self.exists(&key) {
            return Ok(CreateOutcome::Skipped);
        }

        let prepared = self.invoker.sandbox().prepare(&def)?;
        let replaces = self.registry.check_function(&prepared, mode.replace())?;
        self.store.persist(&SchemaEntry::Function(def))?;
        self.registry.define_function(prepared, mode.replace())?;
        Ok(if replaces {
            CreateOutcome::Replaced
        } else {
            CreateOutcome::Created
        })
    }

    /// `CREATE [OR REPLACE] AGGREGATE [IF NOT EXISTS]`
    pub fn create_aggregate(
        &self,
        grantee: &str,
        def: AggregateDefinition,
        mode: CreateMode,
    ) -> Result<CreateOutcome> {
        let key = def.key();
        self.require_create(grantee, &key, mode)?;

        let _ddl = self.ddl.lock();
        let existed = self.exists(&key);
        if mode == CreateMode::CreateIfNotExists && existed {
            return Ok(CreateOutcome::Skipped);
        }

        self.registry.check_aggregate(&def, mode.replace())?;
        self.store.persist(&SchemaEntry::Aggregate(def.clone()))?;
        self.registry.define_aggregate(def, mode.replace())?;
        Ok(if existed {
            CreateOutcome::Replaced
        } else {
            CreateOutcome::Created
        })
    }

    fn exists(&self, key: &FunctionKey) -> bool {
        self.registry
            .resolve(&key.name.keyspace, &key.name.name, key.signature.types())
            .is_ok()
    }

    /// Find the one routine of `kind` a DROP names
    ///
    /// Ambiguity is reported before anything else, permission checks
    /// included.
    fn drop_target(
        &self,
        kind: RoutineKind,
        name: &FunctionName,
        arg_types: Option<&[CqlType]>,
        if_exists: bool,
    ) -> Result<Option<FunctionKey>> {
        let routine = match self.registry.find_unique(name, arg_types) {
            Ok(routine) => routine,
            Err(Error::NotFound { .. }) if if_exists => return Ok(None),
            Err(e) => return Err(e),
        };
        if routine.kind() != kind {
            if if_exists {
                return Ok(None);
            }
            return Err(Error::NotFound {
                kind: kind.as_str(),
                name: routine.key().to_string(),
            });
        }
        Ok(Some(routine.key()))
    }

    /// `DROP FUNCTION [IF EXISTS] ks.name[(types)]`
    ///
    /// Returns `None` when `if_exists` is set and nothing matched.
    ///
    /// # Errors
    ///
    /// - `AmbiguousSignature` when no types are given and several overloads exist
    /// - `Unauthorized` without DROP on the function
    /// - `DependentAggregateExists` under [`DropPolicy::Reject`]
    pub fn drop_function(
        &self,
        grantee: &str,
        keyspace: &str,
        name: &str,
        arg_types: Option<&[CqlType]>,
        if_exists: bool,
    ) -> Result<Option<DroppedFunction>> {
        let _ddl = self.ddl.lock();
        let name = FunctionName::new(keyspace, name);
        let Some(key) = self.drop_target(RoutineKind::Function, &name, arg_types, if_exists)?
        else {
            return Ok(None);
        };
        self.gate
            .require(grantee, Permission::Drop, &FunctionResource::from_key(&key))?;

        let dependents = self.registry.dependents(&key);
        if let (DropPolicy::Reject, Some(first)) = (self.drop_policy, dependents.first()) {
            return Err(Error::DependentAggregateExists {
                function: key.to_string(),
                aggregate: first.key().to_string(),
            });
        }
        let mut removed = Vec::with_capacity(dependents.len());
        let mut outcome = Ok(());
        for agg in &dependents {
            outcome = self.store.remove(&SchemaKey {
                kind: RoutineKind::Aggregate,
                key: agg.key(),
            });
            if outcome.is_err() {
                break;
            }
            removed.push(agg);
        }
        if outcome.is_ok() {
            outcome = self.store.remove(&SchemaKey {
                kind: RoutineKind::Function,
                key: key.clone(),
            });
        }
        if let Err(e) = outcome {
            // The registry still publishes every dependent, so the store must too
            for agg in removed {
                if let Err(restore) = self
                    .store
                    .persist(&SchemaEntry::Aggregate(AggregateDefinition::clone(agg)))
                {
                    warn!(
                        target: "ferrule::engine",
                        aggregate = %agg.key(),
                        error = %restore,
                        "Failed to restore aggregate after aborted cascade"
                    );
                }
            }
            return Err(e);
        }

        let dropped = self.registry.drop_function(&key, self.drop_policy)?;
        self.revoke_all_on(&key);
        for agg in &dropped.cascaded {
            self.revoke_all_on(&agg.key());
        }
        Ok(Some(dropped))
    }

    /// `DROP AGGREGATE [IF EXISTS] ks.name[(types)]`
    pub fn drop_aggregate(
        &self,
        grantee: &str,
        keyspace: &str,
        name: &str,
        arg_types: Option<&[CqlType]>,
        if_exists: bool,
    ) -> Result<Option<Arc<AggregateDefinition>>> {
        let _ddl = self.ddl.lock();
        let name = FunctionName::new(keyspace, name);
        let Some(key) = self.drop_target(RoutineKind::Aggregate, &name, arg_types, if_exists)?
        else {
            return Ok(None);
        };
        self.gate
            .require(grantee, Permission::Drop, &FunctionResource::from_key(&key))?;

        self.store.remove(&SchemaKey {
            kind: RoutineKind::Aggregate,
            key: key.clone(),
        })?;
        let dropped = self.registry.drop_aggregate(&key)?;
        self.revoke_all_on(&key);
        Ok(Some(dropped))
    }

    fn revoke_all_on(&self, key: &FunctionKey) {
        if let Err(e) = self.gate.revoke_all_on(&FunctionResource::from_key(key)) {
            warn!(
                target: "ferrule::engine",
                routine = %key,
                error = %e,
                "Failed to revoke permissions on dropped routine"
            );
        }
    }

    fn executable_function(
        &self,
        grantee: &str,
        keyspace: &str,
        name: &str,
        arg_types: &[CqlType],
    ) -> Result<Arc<PreparedFunction>> {
        let function = match self.registry.resolve(keyspace, name, arg_types)? {
            Routine::Function(f) => f,
            Routine::Aggregate(a) => {
                return Err(Error::NotFound {
                    kind: RoutineKind::Function.as_str(),
                    name: a.key().to_string(),
                })
            }
        };
        self.gate.require(
            grantee,
            Permission::Execute,
            &FunctionResource::from_key(&function.definition.key()),
        )?;
        Ok(function)
    }

    /// Call a function with decoded arguments
    ///
    /// EXECUTE is checked on every call.
    pub fn execute(
        &self,
        grantee: &str,
        keyspace: &str,
        name: &str,
        arg_types: &[CqlType],
        args: Vec<Value>,
    ) -> Result<Value> {
        let function = self.executable_function(grantee, keyspace, name, arg_types)?;
        self.invoker.execute(&function, args)
    }

    /// Call a function with serialized cells
    pub fn execute_serialized(
        &self,
        grantee: &str,
        keyspace: &str,
        name: &str,
        arg_types: &[CqlType],
        args: Vec<Option<Vec<u8>>>,
    ) -> Result<Option<Vec<u8>>> {
        let function = self.executable_function(grantee, keyspace, name, arg_types)?;
        self.invoker.execute_serialized(&function, args)
    }

    /// Start an aggregate run
    ///
    /// The driver holds its own snapshot of the aggregate and its
    /// functions, so later DDL does not affect a run in progress.
    pub fn aggregate_driver(
        &self,
        grantee: &str,
        keyspace: &str,
        name: &str,
        arg_types: &[CqlType],
    ) -> Result<AggregateDriver> {
        let aggregate = match self.registry.resolve(keyspace, name, arg_types)? {
            Routine::Aggregate(a) => a,
            Routine::Function(f) => {
                return Err(Error::NotFound {
                    kind: RoutineKind::Aggregate.as_str(),
                    name: f.definition.key().to_string(),
                })
            }
        };
        self.gate.require(
            grantee,
            Permission::Execute,
            &FunctionResource::from_key(&aggregate.key()),
        )?;

        let state_function = self
            .registry
            .resolve_function(&aggregate.state_function_key())?;
        let final_function = aggregate
            .final_function_key()
            .map(|key| self.registry.resolve_function(&key))
            .transpose()?;
        Ok(AggregateDriver::new(
            aggregate,
            state_function,
            final_function,
            self.invoker.clone(),
        ))
    }

    /// Run an aggregate over `rows` in order
    pub fn aggregate<I>(
        &self,
        grantee: &str,
        keyspace: &str,
        name: &str,
        arg_types: &[CqlType],
        rows: I,
    ) -> Result<Value>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        self.aggregate_driver(grantee, keyspace, name, arg_types)?
            .run(rows)
    }

    fn check_grant(
        &self,
        grantor: &str,
        permission: Permission,
        resource: &FunctionResource,
    ) -> Result<()> {
        self.gate.require(grantor, Permission::Authorize, resource)?;
        self.gate.require(grantor, permission, resource)?;
        if !resource.applicable_permissions().contains(&permission) {
            return Err(Error::InvalidResource {
                resource: resource.name(),
                reason: format!("{} is not applicable", permission),
            });
        }
        if let Some(key) = resource.key() {
            if !self.exists(&key) {
                return Err(Error::InvalidResource {
                    resource: resource.name(),
                    reason: format!("{} does not exist", resource),
                });
            }
        }
        Ok(())
    }

    /// `GRANT permission ON resource TO grantee`
    ///
    /// # Errors
    ///
    /// - `Unauthorized` unless `grantor` holds AUTHORIZE and `permission` on the resource
    /// - `InvalidResource` for an inapplicable permission or a function that does not exist
    pub fn grant(
        &self,
        grantor: &str,
        grantee: &str,
        permission: Permission,
        resource: &FunctionResource,
    ) -> Result<()> {
        self.check_grant(grantor, permission, resource)?;
        self.gate.grant(grantee, permission, resource)
    }

    /// `REVOKE permission ON resource FROM grantee`
    ///
    /// Returns whether a grant was removed. Cached decisions may keep
    /// honouring it until they expire.
    pub fn revoke(
        &self,
        grantor: &str,
        grantee: &str,
        permission: Permission,
        resource: &FunctionResource,
    ) -> Result<bool> {
        self.check_grant(grantor, permission, resource)?;
        self.gate.revoke(grantee, permission, resource)
    }

    /// `LIST [permission] [OF grantee]`
    pub fn list_permissions(
        &self,
        grantee: Option<&str>,
        permission: Option<Permission>,
    ) -> Vec<PermissionGrant> {
        self.gate.list(grantee, permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrule_core::{Language, NullPolicy};
    use ferrule_durability::InMemoryMetadataStore;

    const ADMIN: &str = "admin";
    const USER: &str = "alice";

    fn service_with(config: EngineConfig, store: Arc<dyn MetadataStore>) -> FunctionService {
        let gate = Arc::new(GrantTable::new().with_superuser(ADMIN));
        FunctionService::with_parts(&config, gate, store).unwrap()
    }

    fn service() -> FunctionService {
        service_with(EngineConfig::default(), Arc::new(InMemoryMetadataStore::new()))
    }

    fn lua(name: &str, args: &[(&str, CqlType)], ret: CqlType, body: &str) -> FunctionDefinition {
        FunctionDefinition {
            name: FunctionName::new("ks", name),
            arg_names: args.iter().map(|(n, _)| n.to_string()).collect(),
            arg_types: args.iter().map(|(_, t)| t.clone()).collect(),
            return_type: ret,
            null_policy: NullPolicy::CalledOnNull,
            language: Language::Lua,
            body: body.to_string(),
        }
    }

    fn plus() -> FunctionDefinition {
        lua(
            "plus",
            &[("s", CqlType::int()), ("v", CqlType::int())],
            CqlType::int(),
            "return s + v",
        )
    }

    fn total() -> AggregateDefinition {
        AggregateDefinition {
            name: FunctionName::new("ks", "total"),
            arg_types: vec![CqlType::int()],
            state_func: "plus".to_string(),
            state_type: CqlType::int(),
            final_func: None,
            initcond: Value::Int(0),
        }
    }

    #[test]
    fn test_create_modes() {
        let svc = service();
        let def = lua("f", &[("x", CqlType::int())], CqlType::int(), "return x");
        assert_eq!(
            svc.create_function(ADMIN, def.clone(), CreateMode::Create).unwrap(),
            CreateOutcome::Created
        );
        assert!(matches!(
            svc.create_function(ADMIN, def.clone(), CreateMode::Create),
            Err(Error::AlreadyExists { .. })
        ));
        assert_eq!(
            svc.create_function(ADMIN, def.clone(), CreateMode::CreateIfNotExists).unwrap(),
            CreateOutcome::Skipped
        );
        assert_eq!(
            svc.create_function(ADMIN, def, CreateMode::CreateOrReplace).unwrap(),
            CreateOutcome::Replaced
        );
    }

    #[test]
    fn test_create_requires_permissions() {
        let svc = service();
        let def = lua("f", &[("x", CqlType::int())], CqlType::int(), "return x");
        let err = svc
            .create_function(USER, def.clone(), CreateMode::Create)
            .unwrap_err();
        assert!(err.is_permission_error());

        svc.grant(ADMIN, USER, Permission::Create, &FunctionResource::Keyspace("ks".into()))
            .unwrap();
        assert!(svc
            .create_function(USER, def.clone(), CreateMode::CreateOrReplace)
            .unwrap_err()
            .is_permission_error());
        svc.create_function(USER, def, CreateMode::Create).unwrap();
    }

    #[test]
    fn test_failed_verification_persists_nothing() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let svc = service_with(EngineConfig::default(), store.clone());
        let def = lua("f", &[("x", CqlType::int())], CqlType::int(), "os.exit() return x");
        assert!(matches!(
            svc.create_function(ADMIN, def, CreateMode::Create),
            Err(Error::VerificationFailure { .. })
        ));
        assert!(store.is_empty());
        assert!(svc.registry().is_empty());
    }

    #[test]
    fn test_execute_checks_permission_every_call() {
        let svc = service();
        svc.create_function(
            ADMIN,
            lua("f", &[("x", CqlType::int())], CqlType::int(), "return x * 3"),
            CreateMode::Create,
        )
        .unwrap();
        let resource = FunctionResource::function("ks", "f", &[CqlType::int()]);

        assert!(svc
            .execute(USER, "ks", "f", &[CqlType::int()], vec![Value::Int(1)])
            .unwrap_err()
            .is_permission_error());
        svc.grant(ADMIN, USER, Permission::Execute, &resource).unwrap();
        assert_eq!(
            svc.execute(USER, "ks", "f", &[CqlType::int()], vec![Value::Int(2)])
                .unwrap(),
            Value::Int(6)
        );
        assert!(svc.revoke(ADMIN, USER, Permission::Execute, &resource).unwrap());
        assert!(svc
            .execute(USER, "ks", "f", &[CqlType::int()], vec![Value::Int(2)])
            .is_err());
    }

    #[test]
    fn test_drop_ambiguity_before_permission() {
        let svc = service();
        svc.create_function(
            ADMIN,
            lua("f", &[("x", CqlType::int())], CqlType::int(), "return x"),
            CreateMode::Create,
        )
        .unwrap();
        svc.create_function(
            ADMIN,
            lua("f", &[("x", CqlType::text())], CqlType::text(), "return x"),
            CreateMode::Create,
        )
        .unwrap();

        assert!(matches!(
            svc.drop_function(USER, "ks", "f", None, false),
            Err(Error::AmbiguousSignature { candidates: 2, .. })
        ));
        assert!(svc
            .drop_function(USER, "ks", "f", Some(&[CqlType::int()]), false)
            .unwrap_err()
            .is_permission_error());
        svc.drop_function(ADMIN, "ks", "f", Some(&[CqlType::int()]), false)
            .unwrap();
        svc.drop_function(ADMIN, "ks", "f", None, false).unwrap();
        assert!(svc
            .drop_function(ADMIN, "ks", "f", None, true)
            .unwrap()
            .is_none());
        assert!(matches!(
            svc.drop_function(ADMIN, "ks", "f", None, false),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_drop_revokes_grants() {
        let svc = service();
        let def = lua("f", &[("x", CqlType::int())], CqlType::int(), "return x");
        svc.create_function(ADMIN, def, CreateMode::Create).unwrap();
        let resource = FunctionResource::function("ks", "f", &[CqlType::int()]);
        svc.grant(ADMIN, USER, Permission::Execute, &resource).unwrap();
        assert_eq!(svc.list_permissions(Some(USER), None).len(), 1);

        svc.drop_function(ADMIN, "ks", "f", None, false).unwrap();
        assert!(svc.list_permissions(Some(USER), None).is_empty());
    }

    #[test]
    fn test_aggregate_lifecycle() {
        let svc = service();
        svc.create_function(ADMIN, plus(), CreateMode::Create).unwrap();
        svc.create_aggregate(ADMIN, total(), CreateMode::Create).unwrap();

        let rows = (1..=4).map(|v| vec![Value::Int(v)]);
        assert_eq!(
            svc.aggregate(ADMIN, "ks", "total", &[CqlType::int()], rows).unwrap(),
            Value::Int(10)
        );
        assert!(matches!(
            svc.drop_function(ADMIN, "ks", "plus", None, false),
            Err(Error::DependentAggregateExists { .. })
        ));
        assert!(svc
            .drop_function(ADMIN, "ks", "total", None, false)
            .is_err());
        svc.drop_aggregate(ADMIN, "ks", "total", None, false).unwrap();
        svc.drop_function(ADMIN, "ks", "plus", None, false).unwrap();
        assert!(svc.registry().is_empty());
    }

    #[test]
    fn test_cascade_drop() {
        let config = EngineConfig {
            drop_policy: "cascade".to_string(),
            ..EngineConfig::default()
        };
        let store = Arc::new(InMemoryMetadataStore::new());
        let svc = service_with(config, store.clone());
        svc.create_function(ADMIN, plus(), CreateMode::Create).unwrap();
        svc.create_aggregate(ADMIN, total(), CreateMode::Create).unwrap();

        let dropped = svc
            .drop_function(ADMIN, "ks", "plus", None, false)
            .unwrap()
            .unwrap();
        assert_eq!(dropped.cascaded.len(), 1);
        assert!(store.is_empty());
    }

    /// Fails every function removal, passes everything else through
    struct FunctionRemovalFails(InMemoryMetadataStore);

    impl MetadataStore for FunctionRemovalFails {
        fn persist(&self, entry: &SchemaEntry) -> Result<()> {
            self.0.persist(entry)
        }

        fn remove(&self, key: &SchemaKey) -> Result<()> {
            if key.kind == RoutineKind::Function {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.0.remove(key)
        }

        fn load_all(&self) -> Result<Vec<SchemaEntry>> {
            self.0.load_all()
        }
    }

    #[test]
    fn test_failed_cascade_keeps_store_and_registry_aligned() {
        let config = EngineConfig {
            drop_policy: "cascade".to_string(),
            ..EngineConfig::default()
        };
        let store = Arc::new(FunctionRemovalFails(InMemoryMetadataStore::new()));
        let svc = service_with(config, store.clone());
        svc.create_function(ADMIN, plus(), CreateMode::Create).unwrap();
        svc.create_aggregate(ADMIN, total(), CreateMode::Create).unwrap();

        let err = svc.drop_function(ADMIN, "ks", "plus", None, false).unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        let stored: Vec<SchemaKey> = store
            .load_all()
            .unwrap()
            .iter()
            .map(SchemaEntry::schema_key)
            .collect();
        assert_eq!(stored.len(), 2);
        assert!(stored.contains(&SchemaKey {
            kind: RoutineKind::Aggregate,
            key: total().key(),
        }));
        assert_eq!(svc.registry.dependents(&plus().key()).len(), 1);

        // A restart sees the same schema the live registry publishes
        let reopened = service_with(EngineConfig::default(), store);
        assert_eq!(reopened.registry.dependents(&plus().key()).len(), 1);
    }

    #[test]
    fn test_frozen_udt_rejected_before_permission_check() {
        let svc = service();
        let point = Arc::new(ferrule_core::UserType::new(
            "ks",
            "point",
            vec![("x".to_string(), CqlType::int())],
        ));
        let def = lua(
            "f",
            &[("p", CqlType::udt(point).frozen())],
            CqlType::int(),
            "return 1",
        );
        assert!(matches!(
            svc.create_function(USER, def, CreateMode::Create),
            Err(Error::FrozenSignatureViolation { .. })
        ));
    }

    #[test]
    fn test_grant_checks() {
        let svc = service();
        let missing = FunctionResource::function("ks", "nope", &[CqlType::int()]);
        assert!(matches!(
            svc.grant(ADMIN, USER, Permission::Execute, &missing),
            Err(Error::InvalidResource { .. })
        ));

        svc.create_function(
            ADMIN,
            lua("f", &[("x", CqlType::int())], CqlType::int(), "return x"),
            CreateMode::Create,
        )
        .unwrap();
        let resource = FunctionResource::function("ks", "f", &[CqlType::int()]);
        assert!(matches!(
            svc.grant(ADMIN, USER, Permission::Create, &resource),
            Err(Error::InvalidResource { .. })
        ));

        // AUTHORIZE alone is not enough to hand out EXECUTE
        svc.grant(ADMIN, USER, Permission::Authorize, &FunctionResource::All)
            .unwrap();
        assert!(svc
            .grant(USER, "bob", Permission::Execute, &resource)
            .unwrap_err()
            .is_permission_error());
        svc.grant(ADMIN, USER, Permission::Execute, &FunctionResource::All)
            .unwrap();
        svc.grant(USER, "bob", Permission::Execute, &resource).unwrap();
    }

    #[test]
    fn test_replay_from_store() {
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        {
            let svc = service_with(EngineConfig::default(), Arc::clone(&store));
            svc.create_function(ADMIN, plus(), CreateMode::Create).unwrap();
            svc.create_aggregate(ADMIN, total(), CreateMode::Create).unwrap();
        }
        let svc = service_with(EngineConfig::default(), store);
        assert_eq!(svc.registry().len(), 2);
        let rows = vec![vec![Value::Int(5)], vec![Value::Int(6)]];
        assert_eq!(
            svc.aggregate(ADMIN, "ks", "total", &[CqlType::int()], rows).unwrap(),
            Value::Int(11)
        );
    }

    #[test]
    fn test_replay_rejects_disabled_language() {
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        service_with(EngineConfig::default(), Arc::clone(&store))
            .create_function(ADMIN, plus(), CreateMode::Create)
            .unwrap();

        let config = EngineConfig {
            languages: vec!["wasm".to_string()],
            ..EngineConfig::default()
        };
        let gate = Arc::new(GrantTable::new());
        assert!(matches!(
            FunctionService::with_parts(&config, gate, store),
            Err(Error::Corruption(_))
        ));
    }
}
