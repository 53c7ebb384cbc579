//! Example demonstrating how each outcome is reported.
//!
//! Run with: cargo run --example error_handling
//!
//! Note: Requires a running Docker daemon.

use std::time::Duration;
use container_code_sandbox_rs::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Error Handling Example ===\n");

    let config = SandboxConfig::builder().timeout(Duration::from_secs(3)).build();
    let sandbox = CodeSandbox::new(config);

    // Example 1: jobs before initialize() are rejected, not raced
    println!("--- Test 1: Not initialized ---");
    let result = sandbox.execute("python", "print(1)").await?;
    println!("status: {:?}, stderr: {}\n", result.status, result.stderr);

    if let Err(e) = sandbox.initialize().await {
        eprintln!("Failed to initialize sandbox: {}", e);
        eprintln!("\nMake sure Docker is installed and the daemon is running.");
        return Err(e);
    }

    // Example 2: runtime error
    println!("--- Test 2: Runtime error ---");
    let result = sandbox.execute("python", "int('not a number')").await?;
    println!("status: {:?}", result.status);
    println!("stderr:\n{}", result.stderr);

    // Example 3: compile error
    println!("--- Test 3: Compile error ---");
    let result = sandbox.execute("cpp", "int main( {").await?;
    println!("status: {:?}", result.status);
    println!("stderr:\n{}", result.stderr);

    // Example 4: timeout
    println!("--- Test 4: Infinite loop ---");
    let result = sandbox.execute("javascript", "while (true) {}").await?;
    println!("status: {:?}, stderr: {}\n", result.status, result.stderr);

    // Example 5: unsupported language
    println!("--- Test 5: Unsupported language ---");
    match sandbox.execute("ruby", "puts 1").await {
        Err(e @ SandboxError::UnsupportedLanguage(_)) => println!("Caught: {}\n", e),
        other => println!("Unexpected: {:?}\n", other),
    }

    // Example 6: what a room receives
    println!("--- Test 6: Room payload ---");
    let output = sandbox
        .handle_run_request(RunRequest {
            language: "node".to_string(),
            code: "throw new Error('boom')".to_string(),
            room_id: "demo-room".to_string(),
        })
        .await;
    println!("room {}: isError={}", output.room_id, output.payload.is_error);
    println!("{}", output.payload.output);

    Ok(())
}
