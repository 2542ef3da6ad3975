// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fmt;
use std::sync::Arc;

use slog::{debug, o, trace};
use strum::EnumIter;

use crate::callback::ClientCookie;
use crate::callback::OperationCallback;
use crate::config::Config;
use crate::config::OperationsConfig;
use crate::pool::RetainRequest;
use crate::registry::DeviceStateRegistry;
use aal::AsicError;
use aal::AsicResult;
use aal::CheckError;
use aal::Completion;
use aal::DevTarget;
use aal::SessionHdl;
use aal::SyncDriver;
use aal::SyncPath;
use aal::SyncRequest;
use aal::TableId;
use aal::BF_SUCCESS;
use common::table::TableType;

/// The asynchronous operations a table can be asked to perform
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, strum::Display,
)]
pub enum OperationKind {
    #[strum(to_string = "register_sync")]
    RegisterSync,
    #[strum(to_string = "counter_sync")]
    CounterSync,
    #[strum(to_string = "hit_state_update")]
    HitStateUpdate,
}

/// What the runtime needs to know about the table an operation is issued
/// against
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
    /// The P4 program the table belongs to
    pub program: String,
    pub table_type: TableType,
}

/// Choose the driver request that carries out `kind` on a table of the given
/// type.  Resources attached to a match table are synced through the "direct"
/// path, while standalone resource tables use the "indirect" one.
pub fn sync_path(
    kind: OperationKind,
    table_type: TableType,
) -> AsicResult<SyncPath> {
    match (kind, table_type) {
        (OperationKind::HitStateUpdate, t) if t.is_match_table() => {
            Ok(SyncPath::IdleTimeHitState)
        }
        (OperationKind::RegisterSync, t) if t.is_match_table() => {
            Ok(SyncPath::DirectRegister)
        }
        (OperationKind::RegisterSync, TableType::Register) => {
            Ok(SyncPath::IndirectRegister)
        }
        (OperationKind::CounterSync, t) if t.is_match_table() => {
            Ok(SyncPath::DirectCounter)
        }
        (OperationKind::CounterSync, TableType::Counter) => {
            Ok(SyncPath::IndirectCounter)
        }
        _ => Err(AsicError::OperationUnsupported),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// The driver will complete the request later, and the client's
    /// callback will fire then
    Async,
    /// The driver finished the request before returning
    Sync,
}

/// Where a [`TableOperation`] is in its life
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationStage {
    Idle,
    Configured,
    Retaining,
    Dispatched(DispatchMode),
    Failed,
}

impl fmt::Display for OperationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStage::Idle => write!(f, "idle"),
            OperationStage::Configured => write!(f, "configured"),
            OperationStage::Retaining => write!(f, "retaining"),
            OperationStage::Dispatched(DispatchMode::Async) => {
                write!(f, "dispatched (async)")
            }
            OperationStage::Dispatched(DispatchMode::Sync) => {
                write!(f, "dispatched (sync)")
            }
            OperationStage::Failed => write!(f, "failed"),
        }
    }
}

/// A client's request to run one operation against one table
#[derive(Clone, Debug)]
pub struct TableOperation {
    kind: OperationKind,
    session: SessionHdl,
    target: DevTarget,
    callback: OperationCallback,
    cookie: ClientCookie,
    stage: OperationStage,
}

impl TableOperation {
    pub fn new(kind: OperationKind) -> Self {
        TableOperation {
            kind,
            session: 0,
            target: DevTarget::default(),
            callback: OperationCallback::None,
            cookie: ClientCookie::null(),
            stage: OperationStage::Idle,
        }
    }

    /// Set up the operation.  Passing `OperationCallback::None` makes the
    /// request synchronous.
    pub fn configure(
        &mut self,
        session: SessionHdl,
        target: DevTarget,
        callback: OperationCallback,
        cookie: ClientCookie,
    ) {
        self.session = session;
        self.target = target;
        self.callback = callback;
        self.cookie = cookie;
        self.stage = OperationStage::Configured;
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn target(&self) -> DevTarget {
        self.target
    }

    pub fn stage(&self) -> OperationStage {
        self.stage
    }

    pub fn is_async(&self) -> bool {
        self.callback.is_some()
    }
}

/// Issues table operations to the driver, tracking each one in the pool
/// belonging to its table and kind.
pub struct TableOperations {
    log: slog::Logger,
    registry: Arc<DeviceStateRegistry>,
    driver: Arc<dyn SyncDriver>,
    config: OperationsConfig,
}

impl TableOperations {
    pub fn new(
        log: &slog::Logger,
        registry: Arc<DeviceStateRegistry>,
        driver: Arc<dyn SyncDriver>,
        config: OperationsConfig,
    ) -> Self {
        TableOperations {
            log: log.new(o!("unit" => "table_operations")),
            registry,
            driver,
            config,
        }
    }

    /// Set up the runtime as described by a [`Config`]: its logger, an
    /// empty device registry, and its operation limits.
    pub fn from_config(
        name: &str,
        config: &Config,
        driver: Arc<dyn SyncDriver>,
    ) -> AsicResult<Self> {
        let log = config.logger(name)?;
        let registry = Arc::new(DeviceStateRegistry::new(&log));
        Ok(TableOperations::new(
            &log,
            registry,
            driver,
            config.operations,
        ))
    }

    pub fn registry(&self) -> &Arc<DeviceStateRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OperationsConfig {
        &self.config
    }

    /// Hand the operation to the driver.
    ///
    /// An `AsicError::Again` means every slot for this table and kind is
    /// busy.  The caller should back off and try again.  Every other error is
    /// final for this call.
    pub fn execute(
        &self,
        table: &TableInfo,
        op: &mut TableOperation,
    ) -> AsicResult<()> {
        if op.stage == OperationStage::Idle {
            return Err(AsicError::InvalidArg(format!(
                "{} on {} was never configured",
                op.kind, table.name
            )));
        }

        let path = sync_path(op.kind, table.table_type)?;

        let dev_id = op.target.dev_id;
        let device = self
            .registry
            .get_device_state(dev_id, &table.program)
            .ok_or_else(|| {
                AsicError::Missing(format!(
                    "no state for program {} on device {dev_id}",
                    table.program
                ))
            })?;

        let pool = device.operation_pool(table.id, op.kind);
        let limits = self.config.limits(op.kind);
        op.stage = OperationStage::Retaining;
        let Some(cookie) = pool.retain(RetainRequest {
            callback: op.callback.clone(),
            cookie: op.cookie,
            target: op.target,
            grace: limits.grace_period(),
            max_items: limits.max_states,
            max_threads: limits.max_threads,
        }) else {
            trace!(self.log, "operation state pool exhausted";
                "table" => &table.name,
                "op" => op.kind.to_string());
            op.stage = OperationStage::Failed;
            return Err(AsicError::Again(format!(
                "{} on {}: too many outstanding requests",
                op.kind, table.name
            )));
        };

        let mode = match op.callback.is_some() {
            true => DispatchMode::Async,
            false => DispatchMode::Sync,
        };
        let completion = match mode {
            DispatchMode::Async => {
                Some(Box::new(cookie.clone()) as Box<dyn Completion>)
            }
            DispatchMode::Sync => None,
        };

        let request = SyncRequest {
            session: op.session,
            target: op.target,
            table_id: table.id,
            path,
        };
        let status = self.driver.database_sync(&request, completion);

        // A synchronous request only held the slot to count against the
        // ceiling.  A refused one will never be completed.
        if status != BF_SUCCESS || mode == DispatchMode::Sync {
            pool.reset(&cookie);
        }

        if let Err(e) = status.check_error(&format!("{path} on {}", table.name))
        {
            op.stage = OperationStage::Failed;
            return Err(e);
        }

        debug!(self.log, "dispatched";
            "table" => &table.name,
            "path" => %path,
            "target" => %op.target,
            "slot" => cookie.index(),
            "mode" => ?mode);
        op.stage = OperationStage::Dispatched(mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperationLimits;
    use aal::bf_status_t;
    use aal::DevId;
    use aal::BF_HW_COMM_FAIL;
    use aal::BF_INTERNAL_ERROR;
    use aal::BF_OBJECT_NOT_FOUND;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use strum::IntoEnumIterator;

    mockall::mock! {
        pub Driver {}
        impl SyncDriver for Driver {
            fn database_sync(
                &self,
                request: &SyncRequest,
                completion: Option<Box<dyn Completion>>,
            ) -> bf_status_t;
        }
    }

    type Parked = Arc<Mutex<Vec<Box<dyn Completion>>>>;

    const PROGRAM: &str = "sidecar";

    fn table(table_type: TableType) -> TableInfo {
        TableInfo {
            id: 3,
            name: "pipe.Ingress.counters".to_string(),
            program: PROGRAM.to_string(),
            table_type,
        }
    }

    fn coordinator(driver: MockDriver) -> TableOperations {
        let log = common::logging::discard();
        let registry = Arc::new(DeviceStateRegistry::new(&log));
        registry.add_device(0, PROGRAM);
        let config = OperationsConfig {
            counter_sync: OperationLimits {
                grace_period_secs: 30,
                max_states: 2,
                max_threads: 0,
            },
            ..OperationsConfig::default()
        };
        TableOperations::new(&log, registry, Arc::new(driver), config)
    }

    // A driver that accepts every request and parks the completion until
    // the test decides to deliver it
    fn parking_driver(parked: &Parked) -> MockDriver {
        let parked = parked.clone();
        let mut driver = MockDriver::new();
        driver.expect_database_sync().returning(move |_, completion| {
            if let Some(c) = completion {
                parked.lock().unwrap().push(c);
            }
            BF_SUCCESS
        });
        driver
    }

    fn counting_op(count: &Arc<AtomicUsize>, token: usize) -> TableOperation {
        let count = count.clone();
        let mut op = TableOperation::new(OperationKind::CounterSync);
        op.configure(
            1,
            DevTarget::all_pipes(0),
            OperationCallback::native(move |_, _| {
                count.fetch_add(1, Ordering::SeqCst);
            }),
            ClientCookie::from_token(token),
        );
        op
    }

    fn complete_all(parked: &Parked, dev_id: DevId) {
        let done: Vec<_> = parked.lock().unwrap().drain(..).collect();
        for c in done {
            c.complete(dev_id);
        }
    }

    #[test]
    fn test_path_selection() {
        use TableType::*;
        assert_eq!(
            sync_path(OperationKind::HitStateUpdate, MatchDirect).unwrap(),
            SyncPath::IdleTimeHitState
        );
        assert_eq!(
            sync_path(OperationKind::RegisterSync, MatchIndirect).unwrap(),
            SyncPath::DirectRegister
        );
        assert_eq!(
            sync_path(OperationKind::RegisterSync, Register).unwrap(),
            SyncPath::IndirectRegister
        );
        assert_eq!(
            sync_path(OperationKind::CounterSync, MatchIndirectSelector)
                .unwrap(),
            SyncPath::DirectCounter
        );
        assert_eq!(
            sync_path(OperationKind::CounterSync, Counter).unwrap(),
            SyncPath::IndirectCounter
        );
        for kind in OperationKind::iter() {
            assert!(matches!(
                sync_path(kind, Meter),
                Err(AsicError::OperationUnsupported)
            ));
        }
        assert!(sync_path(OperationKind::HitStateUpdate, Counter).is_err());
        assert!(sync_path(OperationKind::CounterSync, Register).is_err());
    }

    #[test]
    fn test_unsupported_never_reaches_driver() {
        let mut driver = MockDriver::new();
        driver.expect_database_sync().times(0);
        let ops = coordinator(driver);

        let mut op = TableOperation::new(OperationKind::HitStateUpdate);
        op.configure(1, DevTarget::all_pipes(0), OperationCallback::None, ClientCookie::null());
        let err = ops.execute(&table(TableType::Counter), &mut op).unwrap_err();
        assert!(matches!(err, AsicError::OperationUnsupported));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unconfigured() {
        let mut driver = MockDriver::new();
        driver.expect_database_sync().times(0);
        let ops = coordinator(driver);
        let mut op = TableOperation::new(OperationKind::CounterSync);
        assert!(matches!(
            ops.execute(&table(TableType::Counter), &mut op),
            Err(AsicError::InvalidArg(_))
        ));
    }

    #[test]
    fn test_missing_device() {
        let mut driver = MockDriver::new();
        driver.expect_database_sync().times(0);
        let ops = coordinator(driver);

        let count = Arc::new(AtomicUsize::new(0));
        let mut op = counting_op(&count, 1);
        op.configure(1, DevTarget::all_pipes(4), OperationCallback::None, ClientCookie::null());
        assert!(matches!(
            ops.execute(&table(TableType::Counter), &mut op),
            Err(AsicError::Missing(_))
        ));

        let mut other = table(TableType::Counter);
        other.program = "other".to_string();
        let mut op = counting_op(&count, 1);
        assert!(matches!(
            ops.execute(&other, &mut op),
            Err(AsicError::Missing(_))
        ));
    }

    #[test]
    fn test_async_completion() -> anyhow::Result<()> {
        let parked = Parked::default();
        let ops = coordinator(parking_driver(&parked));
        let count = Arc::new(AtomicUsize::new(0));

        let mut op = counting_op(&count, 9);
        ops.execute(&table(TableType::Counter), &mut op)?;
        assert_eq!(op.stage(), OperationStage::Dispatched(DispatchMode::Async));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let pool = ops
            .registry()
            .get_device_state(0, PROGRAM)
            .and_then(|d| d.pool(3, OperationKind::CounterSync))
            .ok_or_else(|| anyhow::anyhow!("pool not created"))?;
        assert_eq!(pool.in_use_count(), 1);

        complete_all(&parked, 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(pool.in_use_count(), 0);
        Ok(())
    }

    #[test]
    fn test_synchronous_frees_slot() -> anyhow::Result<()> {
        let mut driver = MockDriver::new();
        driver
            .expect_database_sync()
            .withf(|req, completion| {
                req.path == SyncPath::DirectRegister && completion.is_none()
            })
            .times(3)
            .returning(|_, _| BF_SUCCESS);
        let ops = coordinator(driver);

        let t = table(TableType::MatchDirect);
        for _ in 0..3 {
            let mut op = TableOperation::new(OperationKind::RegisterSync);
            op.configure(1, DevTarget::all_pipes(0), OperationCallback::None, ClientCookie::null());
            ops.execute(&t, &mut op)?;
            assert_eq!(op.stage(), OperationStage::Dispatched(DispatchMode::Sync));
        }
        let pool = ops
            .registry()
            .get_device_state(0, PROGRAM)
            .and_then(|d| d.pool(3, OperationKind::RegisterSync))
            .ok_or_else(|| anyhow::anyhow!("pool not created"))?;
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.len(), 1);
        Ok(())
    }

    #[test]
    fn test_driver_failure() -> anyhow::Result<()> {
        let mut driver = MockDriver::new();
        driver
            .expect_database_sync()
            .times(1)
            .returning(|_, _| BF_HW_COMM_FAIL);
        let ops = coordinator(driver);
        let count = Arc::new(AtomicUsize::new(0));

        let mut op = counting_op(&count, 1);
        match ops.execute(&table(TableType::Counter), &mut op) {
            Err(AsicError::SdeError { ctx, err }) => {
                assert!(ctx.starts_with("stat_database_sync"));
                assert_eq!(err, "HW access fails");
            }
            x => panic!("unexpected result: {x:?}"),
        }
        assert_eq!(op.stage(), OperationStage::Failed);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let pool = ops
            .registry()
            .get_device_state(0, PROGRAM)
            .and_then(|d| d.pool(3, OperationKind::CounterSync))
            .ok_or_else(|| anyhow::anyhow!("pool not created"))?;
        assert_eq!(pool.in_use_count(), 0);
        Ok(())
    }

    #[test]
    fn test_driver_not_found_is_sde_failure() {
        let mut driver = MockDriver::new();
        driver
            .expect_database_sync()
            .times(1)
            .returning(|_, _| BF_OBJECT_NOT_FOUND);
        let ops = coordinator(driver);
        let count = Arc::new(AtomicUsize::new(0));

        let err = ops
            .execute(&table(TableType::Counter), &mut counting_op(&count, 1))
            .unwrap_err();
        match &err {
            AsicError::SdeError { ctx, err } => {
                assert_eq!(ctx, "stat_database_sync on pipe.Ingress.counters");
                assert_eq!(err, "Object not found");
            }
            x => panic!("unexpected result: {x:?}"),
        }
        assert_eq!(err.status(), BF_INTERNAL_ERROR);
    }

    #[test]
    fn test_from_config() -> anyhow::Result<()> {
        let config = Config::from_toml(
            r#"
            log_format = "human"

            [operations.counter_sync]
            max_states = 1
            max_threads = 0
            "#,
        )?;
        let parked = Parked::default();
        let ops = TableOperations::from_config(
            "operations-test",
            &config,
            Arc::new(parking_driver(&parked)),
        )?;
        assert_eq!(ops.config(), &config.operations);
        ops.registry().add_device(0, PROGRAM);

        let count = Arc::new(AtomicUsize::new(0));
        let t = table(TableType::Counter);
        ops.execute(&t, &mut counting_op(&count, 1))?;
        let err = ops.execute(&t, &mut counting_op(&count, 2)).unwrap_err();
        assert!(err.is_retryable());
        Ok(())
    }

    #[test]
    fn test_backpressure() -> anyhow::Result<()> {
        let parked = Parked::default();
        let ops = coordinator(parking_driver(&parked));
        let count = Arc::new(AtomicUsize::new(0));
        let t = table(TableType::Counter);

        ops.execute(&t, &mut counting_op(&count, 1))?;
        ops.execute(&t, &mut counting_op(&count, 2))?;

        let mut third = counting_op(&count, 3);
        let err = ops.execute(&t, &mut third).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(third.stage(), OperationStage::Failed);

        complete_all(&parked, 0);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        ops.execute(&t, &mut third)?;
        assert_eq!(parked.lock().unwrap().len(), 1);
        Ok(())
    }
}
