//! Example of configuring the sandbox from code and from the environment.
//!
//! Run with: cargo run --example configuration
//!
//! Note: Only reads configuration; no containers are started.

use std::time::Duration;
use container_code_sandbox_rs::prelude::*;
use container_code_sandbox_rs::Language;

fn main() -> Result<()> {
    println!("=== Configuration Example ===\n");

    // Builder
    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .strategy(Strategy::WarmPool)
        .memory_limit("256m")
        .cpus(1.0)
        .pids_limit(32)
        .max_output_bytes(16 * 1024)
        .warm_image("my-registry/polyglot:latest")
        .image(Language::Python, "python:3.12-slim")
        .try_build()?;
    println!("From builder: {:#?}\n", config);

    // Environment (SANDBOX_TIMEOUT_MS, SANDBOX_STRATEGY, SANDBOX_IMAGE_PYTHON, ...)
    let config = SandboxConfig::from_env()?;
    println!("From environment: {:#?}\n", config);

    let sandbox = CodeSandbox::new(config);
    println!("Registered languages:");
    for profile in sandbox.registry().profiles() {
        println!(
            "  {:<10} image={:<20} file={:<10} command={}",
            profile.language.id(),
            profile.image,
            profile.source_file_name,
            profile.command_line()
        );
    }

    Ok(())
}
