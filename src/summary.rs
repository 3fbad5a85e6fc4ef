//! Human-readable end-of-run summary.

use crate::loader::RunOutcome;

/// Prints the final summary to stdout.
pub fn print(outcome: &RunOutcome) {
    let snapshot = &outcome.snapshot;
    let secs = outcome.elapsed.as_secs_f64().max(f64::EPSILON);

    println!();
    println!("Summary:");
    println!("  duration:      {:.1}s", outcome.elapsed.as_secs_f64());
    println!(
        "  requests:      {} ({:.1} rps)",
        snapshot.request_sum,
        snapshot.request_sum as f64 / secs
    );
    println!("  success:       {}", snapshot.request_success);
    println!(
        "  errors:        {} ({} timeouts, {} connect)",
        snapshot.request_errors, snapshot.request_timeouts, snapshot.conn_errors
    );
    println!(
        "  traffic:       {} written, {} read",
        bytes(snapshot.bytes_written),
        bytes(snapshot.bytes_read)
    );

    println!();
    println!("Latency:");
    for (quantile, latency) in &snapshot.latency {
        println!("  p{:<5} {:>10.3} ms", quantile, latency.as_secs_f64() * 1e3);
    }

    if !outcome.status_codes.is_empty() {
        println!();
        println!("Status codes:");
        for (code, count) in &outcome.status_codes {
            let percent = *count as f64 / snapshot.request_sum.max(1) as f64 * 100.0;
            println!("  [{code}] {count} ({percent:.1}%)");
        }
    }

    if !outcome.error_messages.is_empty() {
        println!();
        println!("Errors:");
        for (message, count) in &outcome.error_messages {
            println!("  {message}: {count}");
        }
    }
}

fn bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
