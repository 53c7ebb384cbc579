//! Basic example of running code in the sandbox.
//!
//! Run with: cargo run --example basic_execution
//!
//! Note: Requires a running Docker daemon.

use std::time::Duration;
use container_code_sandbox_rs::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Basic Execution Example ===\n");

    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(10))
        .memory_limit("128m")
        .build();

    let sandbox = CodeSandbox::new(config);
    sandbox.initialize().await?;
    println!("Sandbox ready: {}\n", sandbox.is_ready());

    let programs = [
        ("python", "print('Hello from Python')"),
        ("javascript", "console.log('Hello from Node')"),
        (
            "cpp",
            "#include <iostream>\nint main() { std::cout << \"Hello from C++\" << std::endl; }",
        ),
    ];

    for (language, source) in programs {
        println!("--- {} ---", language);
        let result = sandbox.execute(language, source).await?;
        println!("status: {:?}", result.status);
        println!("stdout: {}", result.stdout.trim_end());
        if !result.stderr.is_empty() {
            println!("stderr: {}", result.stderr.trim_end());
        }
        println!("took:   {:?}\n", result.metadata.duration);
    }

    Ok(())
}
