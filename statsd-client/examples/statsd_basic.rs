use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use statsd_client::{current_time_millis, StatsdClientBuilder};

fn main() {
    tracing_subscriber::fmt::init();

    let client = StatsdClientBuilder::default()
        .with_prefix("example")
        .with_remote_address("localhost", 9125)
        .with_error_handler(|e| tracing::warn!(error = %e, "Failed to send metric."))
        .install()
        .expect("failed to install StatsD client");

    client.gauge("startup_temperature", -4.5);
    client.set("hosts", "localhost");

    let server_loops = counter!("server_loops");
    let loop_delta_ms = histogram!("server_loop_delta_ms");

    // Loop for a while, pretending to do some work.
    let started_at = Instant::now();
    let started_at_ms = current_time_millis();
    while started_at.elapsed() < Duration::from_secs(30) {
        let loop_start = Instant::now();
        server_loops.increment(1);
        gauge!("lucky_iterations").increment(1.0);

        std::thread::sleep(Duration::from_millis(250));
        loop_delta_ms.record(loop_start.elapsed().as_secs_f64() * 1000.0);
    }

    client.time_since("run_duration", started_at_ms);
    client.close();
}
