//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_transactions_total{kind}` - Committed ledger rows
//! - `ledger_rejections_total{reason}` - Mutations refused by the store or engines
//! - `ledger_apply_duration_seconds` - Histogram of commit latencies
//! - `ledger_accounts_opened_total` - Accounts created
//! - `ledger_reconciliation_backlog_total` - Side effects that failed after a committed debit

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Committed rows by kind
    pub transactions_total: IntCounterVec,

    /// Rejections by error code
    pub rejections_total: IntCounterVec,

    /// Commit duration histogram
    pub apply_duration: Histogram,

    /// Accounts created
    pub accounts_opened: IntCounter,

    /// Donation side effects needing manual reconciliation
    pub reconciliation_backlog: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total = IntCounterVec::new(
            Opts::new("ledger_transactions_total", "Committed ledger transactions"),
            &["kind"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("ledger_rejections_total", "Rejected ledger mutations"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let apply_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_apply_duration_seconds",
                "Histogram of ledger commit latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(apply_duration.clone()))?;

        let accounts_opened = IntCounter::new(
            "ledger_accounts_opened_total",
            "Accounts created",
        )?;
        registry.register(Box::new(accounts_opened.clone()))?;

        let reconciliation_backlog = IntCounter::new(
            "ledger_reconciliation_backlog_total",
            "Donation side effects that failed after a committed debit",
        )?;
        registry.register(Box::new(reconciliation_backlog.clone()))?;

        Ok(Self {
            transactions_total,
            rejections_total,
            apply_duration,
            accounts_opened,
            reconciliation_backlog,
            registry,
        })
    }

    /// Record a committed row
    pub fn record_transaction(&self, kind: crate::TransactionKind) {
        self.transactions_total.with_label_values(&[kind.as_str()]).inc();
    }

    /// Record a rejected mutation
    pub fn record_rejection(&self, error: &crate::Error) {
        self.rejections_total.with_label_values(&[error.code()]).inc();
    }

    /// Record commit duration
    pub fn record_apply_duration(&self, duration_seconds: f64) {
        self.apply_duration.observe(duration_seconds);
    }

    /// Render the registry in the text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
