//! Example Publisher
//!
//! Publishes a status record to a node once per second. Pair it with the
//! subscriber example on the same path.

use pps_channel::{OpenMode, PpsChannel, Record};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/pps_demo_status".to_string());

    println!("[Publisher] Publishing to: {}", path);

    let mut channel = PpsChannel::new(path.as_str());
    if let Err(e) = channel.open(OpenMode::WRITE | OpenMode::CREATE) {
        eprintln!("[Publisher] Failed to open node: {}", e);
        std::process::exit(1);
    }

    let start = Instant::now();
    for tick in 0u32.. {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        let record = Record::named("status")
            .with("tick", tick as f64)
            .with("time", now)
            .with("uptime", start.elapsed().as_secs_f64())
            .with("pid", std::process::id() as f64)
            .with("healthy", true);

        match channel.write_record(&record) {
            Ok(()) => println!("[Publisher] tick {}", tick),
            Err(e) => eprintln!("[Publisher] Write failed: {} (errno {:?})", e, channel.last_error()),
        }

        std::thread::sleep(Duration::from_secs(1));
    }
}
