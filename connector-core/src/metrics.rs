//! Prometheus metrics, grouped under one registry the way
//! `monitoring/metrics.rs` grouped `TradingMetrics`/`PerformanceMetrics`.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

pub struct ConnectorMetrics {
    pub registry: Arc<Registry>,
    pub orders_placed_total: IntCounter,
    pub orders_filled_total: IntCounter,
    pub orders_cancelled_total: IntCounter,
    pub orders_failed_total: IntCounterVec,
    pub post_latency_ms: Histogram,
    pub heartbeat_stale_total: IntCounter,
    pub reconnect_total: IntCounter,
    pub events_dropped_total: IntCounter,
    pub tracked_orders: IntGauge,
}

impl ConnectorMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::new());

        let orders_placed_total = IntCounter::with_opts(
            Opts::new("orders_placed_total", "Total orders placed").namespace("hl_connector"),
        )?;
        let orders_filled_total = IntCounter::with_opts(
            Opts::new("orders_filled_total", "Total orders fully filled")
                .namespace("hl_connector"),
        )?;
        let orders_cancelled_total = IntCounter::with_opts(
            Opts::new("orders_cancelled_total", "Total orders cancelled")
                .namespace("hl_connector"),
        )?;
        let orders_failed_total = IntCounterVec::new(
            Opts::new("orders_failed_total", "Total orders failed, by reason code")
                .namespace("hl_connector"),
            &["reason"],
        )?;
        let post_latency_ms = Histogram::with_opts(
            HistogramOpts::new("post_latency_ms", "Post request/response latency, ms")
                .namespace("hl_connector"),
        )?;
        let heartbeat_stale_total = IntCounter::with_opts(
            Opts::new("heartbeat_stale_total", "Times the transport was marked stale")
                .namespace("hl_connector"),
        )?;
        let reconnect_total = IntCounter::with_opts(
            Opts::new("reconnect_total", "Transport reconnection attempts")
                .namespace("hl_connector"),
        )?;
        let events_dropped_total = IntCounter::with_opts(
            Opts::new("events_dropped_total", "Events dropped due to publisher backpressure")
                .namespace("hl_connector"),
        )?;
        let tracked_orders = IntGauge::with_opts(
            Opts::new("tracked_orders", "Orders currently tracked").namespace("hl_connector"),
        )?;

        registry.register(Box::new(orders_placed_total.clone()))?;
        registry.register(Box::new(orders_filled_total.clone()))?;
        registry.register(Box::new(orders_cancelled_total.clone()))?;
        registry.register(Box::new(orders_failed_total.clone()))?;
        registry.register(Box::new(post_latency_ms.clone()))?;
        registry.register(Box::new(heartbeat_stale_total.clone()))?;
        registry.register(Box::new(reconnect_total.clone()))?;
        registry.register(Box::new(events_dropped_total.clone()))?;
        registry.register(Box::new(tracked_orders.clone()))?;

        Ok(Self {
            registry,
            orders_placed_total,
            orders_filled_total,
            orders_cancelled_total,
            orders_failed_total,
            post_latency_ms,
            heartbeat_stale_total,
            reconnect_total,
            events_dropped_total,
            tracked_orders,
        })
    }
}
