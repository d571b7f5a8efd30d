//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了单键读写删除命令的实现。

use crate::cli::{GetArgs, KeyArgs, SetArgs};
use crate::client::CacheCoordinator;
use crate::entry::Expiration;
use anyhow::{Context, Result};
use std::time::Duration;

pub async fn get(coordinator: &CacheCoordinator, args: &GetArgs) -> Result<()> {
    match coordinator
        .get_entry::<serde_json::Value>(&args.key)
        .await?
    {
        Some(entry) => {
            println!("{}", serde_json::to_string_pretty(&entry.value)?);
            if args.verbose {
                println!("tier: {}", entry.tier.as_str());
                match entry.ttl {
                    Some(ttl) => println!("ttl: {:.1}s", ttl.as_secs_f64()),
                    None => println!("ttl: unlimited"),
                }
                if let Some(window) = entry.sliding {
                    println!("sliding: {}s", window.as_secs());
                }
            }
        }
        None => println!("(nil)"),
    }
    Ok(())
}

pub async fn set(coordinator: &CacheCoordinator, args: &SetArgs) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(&args.value).context("Value must be valid JSON")?;

    let expiration = match (args.sliding, args.ttl) {
        (Some(secs), _) if secs > 0 => Expiration::Sliding(Duration::from_secs(secs)),
        (_, Some(secs)) => Expiration::from_secs(secs),
        _ => coordinator.default_ttl(),
    };

    let written = coordinator.set(&args.key, &value, expiration).await?;
    println!("{}", if written { "OK" } else { "NOT WRITTEN" });
    Ok(())
}

pub async fn delete(coordinator: &CacheCoordinator, args: &KeyArgs) -> Result<()> {
    let removed = coordinator.delete(&args.key).await?;
    println!("(integer) {}", removed as u8);
    Ok(())
}
