//! Full agent pipeline over loopback sockets

use codec::{marshal, unmarshal, Signer};
use metron::forwarder::{SENT_MESSAGES_COUNTER, UDP_SENT_MESSAGES};
use metron::Agent;
use network::ingest::unmarshaller::UNMARSHAL_ERROR_COUNTER;
use network::Counters;
use relay_config::MetronConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use types::{Envelope, LogMessage, MessageType, Payload};

const SECRET: &str = "agent-test-secret";

fn config(doppler: String) -> MetronConfig {
    MetronConfig {
        host: "127.0.0.1".to_string(),
        incoming_udp_port: 0,
        shared_secret: SECRET.to_string(),
        doppler_addresses: vec![doppler],
        tls_client: None,
        unmarshaller_count: 2,
        tls_write_timeout_seconds: 5,
        log_level: "debug".to_string(),
    }
}

fn envelope(text: &str) -> Envelope {
    Envelope::new(
        "emitter",
        42,
        Payload::LogMessage(
            LogMessage::new(text, MessageType::Err, 42, "app").with_source("APP", "3"),
        ),
    )
}

async fn wait_for(counters: &Counters, name: &str, value: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while counters.get(name) < value {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{name} never reached {value}"));
}

#[tokio::test]
async fn test_agent_signs_and_forwards_to_udp_doppler() {
    let doppler = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let doppler_addr = doppler.local_addr().unwrap();
    let agent = Agent::start(
        &config(format!("udp://{doppler_addr}")),
        Arc::new(Counters::new()),
    )
    .await
    .unwrap();

    let emitter = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sent = envelope("from the app");
    emitter
        .send_to(&marshal(&sent).unwrap(), agent.local_addr())
        .await
        .unwrap();

    let mut buf = vec![0u8; 65_535];
    let (n, _) = tokio::time::timeout(Duration::from_secs(5), doppler.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let payload = Signer::new(SECRET).verify(&buf[..n]).unwrap();
    assert_eq!(unmarshal(payload).unwrap(), sent);

    let counters = Arc::clone(agent.counters());
    wait_for(&counters, SENT_MESSAGES_COUNTER, 1).await;
    assert_eq!(counters.get(UDP_SENT_MESSAGES), 1);
    assert_eq!(counters.get("dropsondeAgentListener.receivedMessageCount"), 1);
    agent.stop().await;
}

#[tokio::test]
async fn test_agent_drops_garbage_and_keeps_running() {
    let doppler = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let agent = Agent::start(
        &config(format!("udp://{}", doppler.local_addr().unwrap())),
        Arc::new(Counters::new()),
    )
    .await
    .unwrap();
    let counters = Arc::clone(agent.counters());

    let emitter = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    emitter.send_to(b"\xff\xfenot an envelope", agent.local_addr()).await.unwrap();
    wait_for(&counters, UNMARSHAL_ERROR_COUNTER, 1).await;

    emitter
        .send_to(&marshal(&envelope("still alive")).unwrap(), agent.local_addr())
        .await
        .unwrap();
    wait_for(&counters, SENT_MESSAGES_COUNTER, 1).await;
    agent.stop().await;
}
