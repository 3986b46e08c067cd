//! Built-in order pipeline run by `taskfloor demo`.
//!
//! One process handles one order: `receive` fans out into a stock check and
//! pricing (parallel flows) plus a notification on the worker pool
//! (asynchronous flow), then `ship` runs between two inventory audits. An
//! order the inventory cannot cover fails the stock check with
//! [`OutOfStock`], which the check's escalation procedure turns into a
//! backorder.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::administrator::{Administrator, AdministratorSource, DutyKey};
use crate::clock::Clock;
use crate::config::{OfficeConfig, TeamConfig, TeamKind};
use crate::error::{Failure, RuntimeError};
use crate::escalation::{CauseMatcher, EscalationLevel, EscalationProcedure};
use crate::execution::ProcessSummary;
use crate::job::{DutyContext, TaskContext};
use crate::managed_object::{ManagedObject, ManagedObjectSource, ManagedObjectUser};
use crate::meta::{
    AdministratorMetaData, DutyMetaData, FlowInstigationStrategy, FlowMetaData, Parameter, ProcessMetaData, Scope,
    ScopeRegistry, TaskDutyAssociation, TaskMetaData, WorkMetaData,
};
use crate::office::OfficeBuilder;

pub const INLINE_TEAM: &str = "inline";
pub const WORKER_TEAM: &str = "workers";

const UNIT_PRICE_CENTS: u64 = 250;

#[derive(Debug, Clone, Copy)]
pub struct DemoOptions {
    pub quantity: u32,
    pub stock: u32,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self { quantity: 3, stock: 10 }
    }
}

#[derive(Debug, Error)]
#[error("only {available} of {requested} items in stock")]
pub struct OutOfStock {
    pub requested: u32,
    pub available: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Received,
    Reserved,
    Shipped,
    Backordered,
}

#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub order_status: OrderStatus,
    pub total_cents: Option<u64>,
    pub remaining_stock: u32,
    pub notified: bool,
    pub summary: ProcessSummary,
}

struct Order {
    quantity: u32,
    status: Mutex<OrderStatus>,
    total_cents: Mutex<Option<u64>>,
}

struct Inventory {
    stock: Mutex<u32>,
    notified: Mutex<bool>,
}

struct InventoryObject(Arc<Inventory>);

impl ManagedObject for InventoryObject {
    fn object(&self) -> anyhow::Result<Parameter> {
        Ok(self.0.clone())
    }

    fn extension(&self) -> Option<Parameter> {
        Some(self.0.clone())
    }
}

struct InventorySource(Arc<Inventory>);

impl ManagedObjectSource for InventorySource {
    fn source_managed_object(&self, user: ManagedObjectUser) {
        if let Err(err) = user.set_managed_object(Arc::new(InventoryObject(self.0.clone()))) {
            warn!(%err, "inventory rejected");
        }
    }
}

struct InventoryAudit;

impl Administrator for InventoryAudit {
    fn do_duty(&self, key: DutyKey, context: &mut DutyContext<'_>) -> anyhow::Result<()> {
        let inventory = context.extension_as::<Inventory>(0)?;
        info!(duty = context.duty_name(), %key, stock = *inventory.stock.lock(), "inventory audit");
        Ok(())
    }
}

struct InventoryAuditSource;

impl AdministratorSource for InventoryAuditSource {
    fn create_administrator(&self) -> anyhow::Result<Arc<dyn Administrator>> {
        Ok(Arc::new(InventoryAudit))
    }
}

fn receive(ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
    let order = ctx.work::<Order>()?;
    info!(process = %ctx.process_id(), quantity = order.quantity, "order received");
    ctx.do_flow(0, None)?;
    ctx.do_flow(1, None)?;
    ctx.do_flow(2, Some(Arc::new(order.quantity)))?;
    Ok(())
}

fn check_stock(ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
    let order = ctx.work::<Order>()?;
    let inventory = ctx.object_as::<Inventory>(0)?;
    let mut stock = inventory.stock.lock();
    if *stock < order.quantity {
        return Err(OutOfStock {
            requested: order.quantity,
            available: *stock,
        }
        .into());
    }
    *stock -= order.quantity;
    *order.status.lock() = OrderStatus::Reserved;
    Ok(())
}

fn price(ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
    let order = ctx.work::<Order>()?;
    let total = u64::from(order.quantity) * UNIT_PRICE_CENTS;
    *order.total_cents.lock() = Some(total);
    info!(total_cents = total, "order priced");
    Ok(())
}

fn backorder(ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
    let order = ctx.work::<Order>()?;
    if let Some(cause) = ctx.parameter_as::<Failure>() {
        warn!(%cause, "order backordered");
    }
    *order.status.lock() = OrderStatus::Backordered;
    Ok(())
}

fn ship(ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
    let order = ctx.work::<Order>()?;
    let mut status = order.status.lock();
    if *status == OrderStatus::Reserved {
        *status = OrderStatus::Shipped;
    }
    info!(status = ?*status, "order dispatched");
    Ok(())
}

/// Adds the demo's teams when the configuration does not define them.
pub fn demo_config(mut config: OfficeConfig) -> OfficeConfig {
    config.teams.entry(INLINE_TEAM.to_string()).or_insert(TeamConfig {
        kind: TeamKind::Passive,
        size: 1,
    });
    config.teams.entry(WORKER_TEAM.to_string()).or_insert(TeamConfig {
        kind: TeamKind::WorkerPool,
        size: 2,
    });
    config
}

/// Runs one order through the pipeline. Needs a tokio runtime for the
/// worker pool and the asset sweeper.
pub async fn run_demo(config: OfficeConfig, clock: Arc<dyn Clock>, options: DemoOptions) -> Result<DemoReport, RuntimeError> {
    let config = demo_config(config);
    let wait_limit = Duration::from_millis(config.default_timeout_ms);
    let builder = OfficeBuilder::new(config.clone(), clock)?;
    let inline = builder.team(INLINE_TEAM)?;
    let workers = builder.team(WORKER_TEAM)?;

    let inventory = Arc::new(Inventory {
        stock: Mutex::new(options.stock),
        notified: Mutex::new(false),
    });
    let mut registry = ScopeRegistry::new(Scope::Process);
    let (inventory_index, _) =
        registry.add_managed_object(builder.managed_object("inventory", Arc::new(InventorySource(inventory.clone()))));
    let (audit_index, _) = registry.add_administrator(AdministratorMetaData {
        name: "inventory-audit".into(),
        source: Arc::new(InventoryAuditSource),
        administered: vec![inventory_index],
        duties: vec![DutyMetaData {
            name: "snapshot".into(),
            flows: Vec::new(),
        }],
    });
    let (managed_objects, administrators) = registry.into_parts();
    let process_meta = ProcessMetaData {
        managed_objects,
        administrators,
        ..ProcessMetaData::default()
    };
    let office = builder.process_meta(process_meta).build();

    let order = Arc::new(Order {
        quantity: options.quantity,
        status: Mutex::new(OrderStatus::Received),
        total_cents: Mutex::new(None),
    });
    let placed = order.clone();
    let mut work = WorkMetaData::new("order");
    work.create_work = Some(Arc::new(move || Ok(placed.clone() as Parameter)));
    let work = Arc::new(work);

    let audit = TaskDutyAssociation {
        administrator: audit_index,
        duty: 0,
    };
    let mut ship_task = TaskMetaData::new("ship", inline.clone(), work.clone(), ship);
    ship_task.required_managed_objects = vec![inventory_index];
    ship_task.pre_duties = vec![audit];
    ship_task.post_duties = vec![audit];

    let backorder_flow = FlowMetaData::new(
        FlowInstigationStrategy::Parallel,
        TaskMetaData::new("backorder", inline.clone(), work.clone(), backorder).into(),
    );
    let mut check_task = TaskMetaData::new("check-stock", inline.clone(), work.clone(), check_stock);
    check_task.required_managed_objects = vec![inventory_index];
    check_task.escalation_procedure = Some(Arc::new(EscalationProcedure::new(vec![EscalationLevel {
        type_of_cause: CauseMatcher::of::<OutOfStock>(),
        reset_thread_state: false,
        flow: backorder_flow,
    }])));

    let notifier = inventory.clone();
    let notify_task = TaskMetaData::new("notify", workers, Arc::new(WorkMetaData::new("notification")), move |ctx| {
        let quantity = ctx.parameter_as::<u32>().map(|quantity| *quantity).unwrap_or_default();
        info!(quantity, "customer notified");
        *notifier.notified.lock() = true;
        Ok(())
    });

    let mut receive_task = TaskMetaData::new("receive", inline.clone(), work.clone(), receive);
    receive_task.flows = vec![
        FlowMetaData::new(FlowInstigationStrategy::Parallel, check_task.into()),
        FlowMetaData::new(
            FlowInstigationStrategy::Parallel,
            TaskMetaData::new("price", inline, work, price).into(),
        ),
        FlowMetaData::new(FlowInstigationStrategy::Asynchronous, notify_task.into()),
    ];
    receive_task.next_job = Some(ship_task.into());

    office.spawn_asset_sweeper()?;
    let future = office.invoke_process(
        &FlowMetaData::new(FlowInstigationStrategy::Sequential, receive_task.into()),
        None,
        None,
    );
    let summary = tokio::time::timeout(wait_limit, future.wait()).await;
    office.shutdown();
    let summary = summary.map_err(|_| {
        RuntimeError::IllegalState(format!("demo process did not complete within {}ms", wait_limit.as_millis()))
    })?;

    let order_status = *order.status.lock();
    let total_cents = *order.total_cents.lock();
    let remaining_stock = *inventory.stock.lock();
    let notified = *inventory.notified.lock();
    Ok(DemoReport {
        order_status,
        total_cents,
        remaining_stock,
        notified,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn order_in_stock_ships() {
        let report = run_demo(OfficeConfig::default(), Arc::new(SystemClock), DemoOptions::default())
            .await
            .unwrap();

        assert_eq!(report.order_status, OrderStatus::Shipped);
        assert_eq!(report.total_cents, Some(750));
        assert_eq!(report.remaining_stock, 7);
        assert!(report.notified);
        assert_eq!(report.summary.escalations_handled, 0);
        assert_eq!(report.summary.unhandled_failures, 0);
        assert_eq!(report.summary.jobs_completed, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn order_beyond_stock_is_backordered() {
        let options = DemoOptions { quantity: 5, stock: 2 };
        let report = run_demo(OfficeConfig::default(), Arc::new(SystemClock), options)
            .await
            .unwrap();

        assert_eq!(report.order_status, OrderStatus::Backordered);
        assert_eq!(report.remaining_stock, 2);
        assert_eq!(report.summary.escalations_handled, 1);
        assert_eq!(report.summary.unhandled_failures, 0);
    }

    #[test]
    fn demo_config_keeps_configured_teams() {
        let config = OfficeConfig::default().with_team(WORKER_TEAM, TeamKind::WorkerPool, 8);
        let config = demo_config(config);
        assert_eq!(config.teams[WORKER_TEAM].size, 8);
        assert_eq!(config.teams[INLINE_TEAM].kind, TeamKind::Passive);
    }
}
