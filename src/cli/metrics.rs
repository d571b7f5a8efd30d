//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了指标查询命令的实现。

use crate::cli::MetricsArgs;
use crate::client::CacheCoordinator;
use crate::metrics::{get_metrics_string, GLOBAL_METRICS};
use anyhow::Result;

pub fn execute(coordinator: &CacheCoordinator, args: &MetricsArgs) -> Result<()> {
    if args.prometheus {
        print!("{}", get_metrics_string());
        return Ok(());
    }

    let namespace = coordinator.namespace();
    println!("=== Cache Metrics ===\n");
    println!("Namespace: {}", namespace);
    println!("Instance:  {}", coordinator.instance_id());

    for tier in ["local", "remote"] {
        let hits = GLOBAL_METRICS.request_count(namespace, tier, "get", "hit");
        let misses = GLOBAL_METRICS.request_count(namespace, tier, "get", "miss");
        let errors = GLOBAL_METRICS.request_count(namespace, tier, "get", "error");
        let total = hits + misses + errors;

        println!("\n{} gets:", tier);
        println!("  Total:  {}", total);
        if total > 0 {
            let hit_rate = hits as f64 / total as f64 * 100.0;
            println!("  Hits:   {} ({:.1}%)", hits, hit_rate);
            println!("  Misses: {}", misses);
            if errors > 0 {
                println!("  Errors: {}", errors);
            }
        }
    }

    println!("\nSliding keys: {}", coordinator.sliding_registry().len());
    println!("Active locks: {}", coordinator.active_locks());
    Ok(())
}
