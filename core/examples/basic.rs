//! Basic circuit breaker usage example
//!
//! Run with `RUST_LOG=fusebox=debug` to see state transitions logged.

use fusebox::{
    CallContext, CallOptions, CircuitBuilder, FallbackCause, MemorySharedStore, Registry,
    StorageBackend,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Circuit Breaker Basic Example ===\n");

    let registry = Registry::new(
        CircuitBuilder::template()
            .failure_threshold(3)
            .request_volume(3)
            .cooldown(Duration::from_millis(500))
            .probe_limit(1)
            .on_open(|name| println!("🔴 Circuit '{}' opened!", name))
            .on_close(|name| println!("🟢 Circuit '{}' closed!", name))
            .on_half_open(|name| println!("🟡 Circuit '{}' half-open, testing...", name)),
    )
    .expect("valid breaker configuration");

    // Flip to simulate the dependency going down and coming back
    let healthy = AtomicBool::new(true);
    let payment = |i: u32| {
        let healthy = &healthy;
        move |ctx: &CallContext| {
            if ctx.is_done() {
                return Err("deadline exceeded".to_string());
            }
            if healthy.load(Ordering::SeqCst) {
                Ok(format!("Payment {}", i))
            } else {
                Err(format!("Payment failed {}", i))
            }
        }
    };
    let ctx = CallContext::with_timeout(Duration::from_secs(5));

    println!("--- Successful calls ---");
    for i in 1..=2 {
        match registry.execute(&ctx, "payment_api", payment(i), CallOptions::new()) {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ Error: {}", e),
        }
    }
    println!("State: {}\n", registry.get_or_create("payment_api").state_name());

    println!("--- Triggering failures ---");
    healthy.store(false, Ordering::SeqCst);
    for i in 3..=5 {
        match registry.execute(&ctx, "payment_api", payment(i), CallOptions::new()) {
            Ok(_) => println!("✓ Success"),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("State: {} (circuit opened)\n", registry.get_or_create("payment_api").state_name());

    println!("--- Attempting call while open, with fallback ---");
    let result = registry.execute(
        &ctx,
        "payment_api",
        payment(6),
        CallOptions::new().with_fallback(|fb| match fb.cause {
            FallbackCause::Rejected(reason) => Ok(format!("queued for later ({})", reason)),
            FallbackCause::Failed(err) => Err(err.clone()),
        }),
    );
    match result {
        Ok(result) => println!("↩ {}", result),
        Err(e) => println!("✗ {}", e),
    }
    println!();

    println!("--- Waiting out the cooldown ---");
    healthy.store(true, Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(600));
    match registry.execute(&ctx, "payment_api", payment(7), CallOptions::new()) {
        Ok(result) => println!("✓ {} (probe)", result),
        Err(e) => println!("✗ {}", e),
    }
    println!("State: {}\n", registry.get_or_create("payment_api").state_name());

    println!("--- Two processes sharing one failure view ---");
    let shared = Arc::new(MemorySharedStore::new());
    let template = CircuitBuilder::template()
        .failure_threshold(2)
        .request_volume(2)
        .storage(StorageBackend::distributed(shared));
    let process_a = Registry::new(template.clone()).expect("valid breaker configuration");
    let process_b = Registry::new(template).expect("valid breaker configuration");

    let _ = process_a.get_or_create("search").call(|| Err::<(), _>("timeout"));
    let _ = process_b.get_or_create("search").call(|| Err::<(), _>("timeout"));
    println!(
        "process A sees {}, process B sees {}",
        process_a.get_or_create("search").state_name(),
        process_b.get_or_create("search").state_name()
    );
}
