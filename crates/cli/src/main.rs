use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use orderflow_core::OrderId;
use orderflow_infra::external::{FakeGateway, FraudCheckGateway};
use orderflow_infra::jobs::DeadLetterEntry;
use orderflow_infra::workers::PoolStats;
use orderflow_infra::{CheckoutError, CheckoutPipeline, PipelineConfig};
use orderflow_orders::Order;

/// Knobs for the simulated run (not part of the pipeline config).
#[derive(Debug)]
struct DemoSettings {
    orders: u64,
    fail_first: u32,
    blocked: Vec<OrderId>,
    drain_timeout: Duration,
}

impl DemoSettings {
    fn from_env() -> Result<Self> {
        let orders = env_string("ORDERFLOW_DEMO_ORDERS", "20")
            .parse::<u64>()
            .context("ORDERFLOW_DEMO_ORDERS must be u64")?;
        let fail_first = env_string("ORDERFLOW_DEMO_FAIL_FIRST", "1")
            .parse::<u32>()
            .context("ORDERFLOW_DEMO_FAIL_FIRST must be u32")?;
        let blocked = env_string("ORDERFLOW_DEMO_BLOCKED", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(OrderId::from)
            .collect();
        let drain_timeout_ms = env_string("ORDERFLOW_DEMO_DRAIN_TIMEOUT_MS", "15000")
            .parse::<u64>()
            .context("ORDERFLOW_DEMO_DRAIN_TIMEOUT_MS must be u64")?;

        Ok(Self {
            orders,
            fail_first,
            blocked,
            drain_timeout: Duration::from_millis(drain_timeout_ms),
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Serialize)]
struct RunSummary {
    config: PipelineConfig,
    drained: bool,
    rejected: Vec<OrderId>,
    stats: PoolStats,
    successful_charges: u32,
    orders: Vec<Order>,
    dead_letters: Vec<DeadLetterEntry>,
}

fn main() -> Result<()> {
    orderflow_observability::init();

    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;
    let demo = DemoSettings::from_env()?;
    tracing::info!(?demo, workers = config.workers, "starting checkout run");

    let gateway = Arc::new(FraudCheckGateway::new(
        FakeGateway::failing_first(demo.fail_first),
        demo.blocked.iter().cloned(),
    ));
    let pipeline = CheckoutPipeline::builder(config, gateway.clone())
        .build()
        .context("failed to build pipeline")?;
    pipeline.start().context("failed to start workers")?;

    let mut rejected = Vec::new();
    for i in 0..demo.orders {
        let order = Order::new(
            format!("order-{i}"),
            format!("user-{}", i % 5),
            1_000 + i * 25,
        )?;
        match pipeline.checkout(order) {
            Ok(_) => {}
            Err(CheckoutError::QueueFull { capacity }) => {
                tracing::warn!(order = i, capacity, "checkout rejected, queue full");
                rejected.push(OrderId::from(format!("order-{i}")));
            }
            Err(err) => return Err(err.into()),
        }
    }

    let drained = pipeline.wait_idle(demo.drain_timeout);
    if !drained {
        tracing::warn!(
            remaining = pipeline.queue().size(),
            "queue not drained before timeout; stopping anyway"
        );
    }
    pipeline.stop().context("worker pool did not stop cleanly")?;

    let summary = RunSummary {
        config: pipeline.config().clone(),
        drained,
        rejected,
        stats: pipeline.stats(),
        successful_charges: gateway.inner().total_charges(),
        orders: pipeline.orders(),
        dead_letters: pipeline.dead_letters(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
