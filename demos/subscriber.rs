//! Example Subscriber
//!
//! Opens a node non-blocking and drives its own loop: wait for readiness,
//! read, decode, print.

use pps_channel::{OpenMode, PpsChannel};
use std::time::Duration;

fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/pps_demo_status".to_string());

    println!("[Subscriber] Watching: {}", path);

    let mut channel = PpsChannel::new(path.as_str());
    if let Err(e) = channel.open(OpenMode::READ) {
        eprintln!("[Subscriber] Failed to open node: {}", e);
        eprintln!("[Subscriber] Make sure the publisher is running first!");
        std::process::exit(1);
    }
    if let Err(e) = channel.set_blocking(false) {
        eprintln!("[Subscriber] {}", e);
        std::process::exit(1);
    }

    loop {
        match channel.wait_ready(Duration::from_secs(5)) {
            Ok(true) => {}
            Ok(false) => {
                println!("[Subscriber] No publish for 5s");
                continue;
            }
            Err(e) => {
                eprintln!("[Subscriber] {}", e);
                break;
            }
        }

        match channel.read_record() {
            Ok(record) => {
                let name = record.object_name().unwrap_or("-");
                let attrs: Vec<String> = record
                    .iter()
                    .map(|(k, v)| format!("{}={:?}", k, v))
                    .collect();
                println!("[Subscriber] @{} {}", name, attrs.join(" "));
            }
            Err(e) if e.is_would_block() => continue,
            Err(e) => eprintln!("[Subscriber] {}", e),
        }
    }
}
