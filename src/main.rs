use stress_test::{stress_test_rooms, stress_test_scaling, stress_test_sessions};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("cannot start runtime: {err}");
            std::process::exit(1);
        }
    };
    rt.block_on(async_main());
}

async fn async_main() {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            SESSION STRESS TESTS                            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Small room, many edits
    let stats = stress_test_sessions(3, 200).await;
    stats.print();

    // Larger room
    let stats = stress_test_sessions(8, 300).await;
    stats.print();

    // Peers joining and leaving while editing
    let stats = stress_test_rooms(6, 40).await;
    stats.print();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS (peers per room)                 ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(12, 4).await;

    println!("\n✓ All stress tests completed successfully!");
}
