use hu_mesh::core::{DeviceType, EngineConfig, FirmwareVersion, PhysicalId};
use hu_mesh::network::{self, Coordinator, Inbound, Link, LinkTarget, NodeOutput, NodeSession, Outbound};
use hu_mesh::protocol::message::{HapticConfig, HapticMode, Message};
use hu_mesh::protocol::profile::{split_profile, Interpolation, NodeConfig, PhysicalNode, PhysicalSetpoint, Priority, ProfileNode};
use std::time::{Duration, Instant};
use tokio::time::sleep;

const HEAD_UNIT: PhysicalId = PhysicalId([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x00]);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Engine configuration, as it would be read from a settings file
    let config: EngineConfig = serde_json::from_str(
        r#"{ "ack_timeout": 150, "max_retries": 2, "discovery_interval": 5000 }"#,
    )
    .unwrap();
    println!("Engine configuration:");
    println!("- Ack timeout: {:?}", config.ack_timeout);
    println!("- Max retries: {}", config.max_retries);
    println!("- Discovery every {:?}", config.discovery_interval);

    let (link, mut air) = Link::channel(64);
    let coordinator = Coordinator::new(config).unwrap();
    let (handle, mut deliveries, task) = network::spawn(coordinator, link);

    // Three peripherals sharing one simulated radio channel
    let mut nodes = vec![
        NodeSession::new(PhysicalId([0x24, 0x0a, 0xc4, 0, 0, 1]), DeviceType::Boiler, 2, FirmwareVersion { major: 3, minor: 0 }),
        NodeSession::new(PhysicalId([0x24, 0x0a, 0xc4, 0, 0, 2]), DeviceType::HapticKnob, 1, FirmwareVersion { major: 3, minor: 1 }),
        NodeSession::new(PhysicalId([0x24, 0x0a, 0xc4, 0, 0, 3]), DeviceType::Scale, 1, FirmwareVersion { major: 2, minor: 9 }),
    ];
    let identities: Vec<PhysicalId> = nodes.iter().map(|n| n.identity()).collect();

    tokio::spawn(async move {
        while let Some(Outbound { target, frame }) = air.outbound.recv().await {
            for node in nodes.iter_mut() {
                let hit = match target {
                    LinkTarget::Broadcast => true,
                    LinkTarget::Device(id) => id == node.identity(),
                };
                if !hit {
                    continue;
                }
                for output in node.handle(HEAD_UNIT, &frame, Instant::now()) {
                    match output {
                        NodeOutput::Transmit(data) => {
                            let _ = air.inbound.send(Inbound { link: node.identity(), data }).await;
                        }
                        NodeOutput::Profile(profile) => {
                            println!("{} loaded profile {} ({} nodes)", node.identity(), profile.profile_id, profile.nodes.len());
                        }
                        NodeOutput::Deliver(message) => println!("{} got {:?}", node.identity(), message),
                        _ => {}
                    }
                }
            }
        }
    });

    println!("\nWaiting for enrollment...");
    sleep(Duration::from_millis(200)).await;
    for device in handle.devices().await.unwrap() {
        println!(
            "- {} {:?} fw {} -> {:?}",
            device.identity,
            device.device_type,
            device.firmware,
            device.address()
        );
    }

    // Tune the knob
    if let Some(knob) = handle.address_of(identities[1]).await.unwrap() {
        let config = Message::HapticConfig(HapticConfig {
            mode: HapticMode::Detents,
            strength: 60,
            param_1: 12,
            param_2: 40,
        });
        match handle.send(knob, config).await {
            Ok(report) => println!("\nHaptic config acked (seq {})", report.seq),
            Err(e) => eprintln!("Haptic config failed: {}", e),
        }
    }

    // Push a 24-node pressure profile to the boiler, two packets
    if let Some(boiler) = handle.address_of(identities[0]).await.unwrap() {
        let nodes: Vec<ProfileNode> = (0..24u16)
            .map(|i| {
                let mut physical = PhysicalNode {
                    time_offset_ms: i * 1000,
                    config: NodeConfig {
                        interpolation: Interpolation::Linear,
                        priority: Priority::Pressure,
                    },
                    ..PhysicalNode::default()
                };
                physical.temperature = PhysicalSetpoint::new(93.0, 1.0);
                physical.pressure = PhysicalSetpoint::new(2.0 + i as f32 * 0.25, 0.5);
                ProfileNode::from_physical(&physical).unwrap()
            })
            .collect();

        for load in split_profile(1, &nodes).unwrap() {
            if let Err(e) = handle.send(boiler, Message::ProfileLoad(load)).await {
                eprintln!("Profile packet failed: {}", e);
            }
        }
    }

    // Scale telemetry arriving unprompted would show up here
    while let Ok(delivery) = deliveries.try_recv() {
        println!("Delivery from {}: {:?}", delivery.src, delivery.message);
    }

    handle.shutdown();
    task.await.unwrap().unwrap();
    println!("\nDone");
}
