//! Example of concurrent jobs sharing one sandbox.
//!
//! Run with: cargo run --example concurrent_execution
//!
//! Set `SANDBOX_STRATEGY=warm-pool` and `SANDBOX_WARM_IMAGE=python:3.10-slim`
//! to compare against the warm-pool strategy.
//!
//! Note: Requires a running Docker daemon.

use std::sync::Arc;
use std::time::Instant;
use container_code_sandbox_rs::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Concurrent Execution Example ===\n");

    let config = SandboxConfig::from_env()?;
    println!("Strategy: {}", config.strategy.as_str());

    let sandbox = Arc::new(CodeSandbox::new(config));
    sandbox.initialize().await?;

    let tasks = vec![
        ("Task 1", "print(sum(i * i for i in range(100)))", "Sum of squares"),
        ("Task 2", "print(len([x for x in range(1000) if x % 3 == 0]))", "Count divisible by 3"),
        ("Task 3", "print(''.join(chr(65 + i % 26) for i in range(50)))", "Generate letters"),
        ("Task 4", "print(max(i * (100 - i) for i in range(101)))", "Maximum product"),
    ];

    println!("Starting {} concurrent tasks...\n", tasks.len());
    let start = Instant::now();

    let mut handles = Vec::new();
    for (name, code, description) in tasks {
        let sandbox = Arc::clone(&sandbox);
        handles.push(tokio::spawn(async move {
            let result = sandbox.execute("python", code).await?;
            Ok::<_, SandboxError>((name, description, result))
        }));
    }

    println!("Results:");
    println!("{:-<60}", "");
    for handle in handles {
        match handle.await {
            Ok(Ok((name, description, result))) => {
                println!(
                    "{}: {} = {} ({:?}, took {:?})",
                    name,
                    description,
                    result.stdout.trim(),
                    result.status,
                    result.metadata.duration
                );
            }
            Ok(Err(e)) => println!("Task error: {}", e),
            Err(e) => println!("Join error: {}", e),
        }
    }
    println!("{:-<60}", "");

    println!("\nTotal wall-clock time: {:?}", start.elapsed());

    sandbox.shutdown().await?;
    Ok(())
}
