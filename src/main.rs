//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块是 tiercache 命令行的入口点。

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tiercache::cli::run().await
}
