use std::sync::Arc;

use bytes::Bytes;
use mesh_core::constants;
use mesh_core::{memory_link, Connection, HostConfig, MeshHost, NetworkMessage};

#[tokio::main]
async fn main() {
    env_logger::init();
    constants::print_banner();

    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match cmd {
        "demo"   => { run_line_demo().await; }
        "config" => { print_config(); }
        _        => {
            println!("Mesh Core — available commands:");
            println!("  demo     — three hosts in a line, request over two hops");
            println!("  config   — print the host config read from MESH_* env vars");
            println!();
            println!("  RUST_LOG=debug mesh-node demo   for the routing trace");
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

fn print_config() {
    match HostConfig::from_env() {
        Ok(config) => match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("can't serialize config: {}", e),
        },
        Err(e) => eprintln!("{}", e),
    }
}

/// kitchen, hall and garage in a line, linked in memory.
pub async fn run_line_demo() {
    println!("\n=== Line Demo: kitchen → hall → garage ===\n");

    let (kh_k, kh_h) = memory_link("kitchen-0", "hall-0");
    let (hg_h, hg_g) = memory_link("hall-1", "garage-0");

    let hosts = (
        MeshHost::spawn(
            HostConfig::new("kitchen")
                .with_static_peer("hall-0", "hall")
                .with_static_route(&["hall", "garage"]),
            vec![("mem".to_string(), Arc::new(kh_k.clone()) as Arc<dyn Connection>)],
        ),
        MeshHost::spawn(
            HostConfig::new("hall")
                .with_static_peer("kitchen-0", "kitchen")
                .with_static_peer("garage-0", "garage"),
            vec![
                ("to-kitchen".to_string(), Arc::new(kh_h) as Arc<dyn Connection>),
                ("to-garage".to_string(), Arc::new(hg_h.clone()) as Arc<dyn Connection>),
            ],
        ),
        MeshHost::spawn(
            HostConfig::new("garage").with_static_peer("hall-1", "hall"),
            vec![("mem".to_string(), Arc::new(hg_g) as Arc<dyn Connection>)],
        ),
    );
    let (kitchen, hall, garage) = match hosts {
        (Ok(k), Ok(h), Ok(g)) => (k, h, g),
        (k, h, g) => {
            for e in [k.err(), h.err(), g.err()].into_iter().flatten() {
                eprintln!("can't start host: {}", e);
            }
            return;
        }
    };

    kh_k.connect();
    hg_h.connect();

    let registered = garage
        .start_listen_uri("thermostat", |m: NetworkMessage| async move {
            let room = String::from_utf8_lossy(&m.payload).into_owned();
            Ok(Bytes::from(format!("{}: 21.5°C", room)))
        })
        .await;
    if let Err(e) = registered {
        eprintln!("can't register handler: {}", e);
        return;
    }

    match kitchen.request("garage", "thermostat", "garage", None).await {
        Ok(reply) => println!("kitchen ← garage: {}", String::from_utf8_lossy(&reply)),
        Err(e) => println!("request failed: {}", e),
    }
    match kitchen.request("garage", "door", Bytes::new(), None).await {
        Ok(reply) => println!("kitchen ← garage: {}", String::from_utf8_lossy(&reply)),
        Err(e) => println!("kitchen ← garage (error): {}", e),
    }

    for host in [&kitchen, &hall, &garage] {
        match host.status().await {
            Ok(status) => println!("\n{}", status),
            Err(e) => eprintln!("[{}] {}", host.host_id(), e),
        }
    }

    kitchen.shutdown().await;
    hall.shutdown().await;
    garage.shutdown().await;
}
