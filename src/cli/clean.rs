//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了清空缓存命令的实现。

use crate::cli::ClearArgs;
use crate::client::CacheCoordinator;
use anyhow::Result;
use std::io::Write;

pub async fn execute(coordinator: &CacheCoordinator, args: &ClearArgs) -> Result<()> {
    if !args.yes {
        println!("Preparing to clear namespace: {}", coordinator.namespace());
        println!("  - local tier ({})", coordinator.local().name());
        if !args.local_only {
            println!("  - remote tier (all keys under '{}:')", coordinator.namespace());
            println!("  - every instance listening on '{}'", coordinator.channel());
        }
        print!("\nDo you want to continue? [y/N]: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim().to_lowercase() != "y" {
            println!("Operation cancelled.");
            return Ok(());
        }
    }

    let removed = if args.local_only {
        coordinator.clear_local().await?
    } else {
        coordinator.delete_all().await?
    };

    println!(
        "\n✅ Cleared {} entries from namespace: {}",
        removed,
        coordinator.namespace()
    );
    Ok(())
}
