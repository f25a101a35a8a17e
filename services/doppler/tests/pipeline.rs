//! Aggregator pipeline over loopback sockets

use codec::{encode_frame, marshal, Signer};
use doppler::Doppler;
use message_sink::AppDestination;
use network::ingest::verifier::INVALID_SIGNATURE_COUNTER;
use network::test_utils::fixture_path;
use network::{Client, Counters, TlsClient};
use relay_config::{load_from_str, DopplerConfig, FileFormat, MetronConfig, TlsClientConfig, TlsListenerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use types::{Envelope, LogMessage, MessageType, Payload};

const SECRET: &str = "pipeline-secret";

fn config(drains: &str) -> DopplerConfig {
    load_from_str(
        &format!(
            r#"{{
                "host": "127.0.0.1",
                "incoming_udp_port": 0,
                "max_retained_log_messages": 10,
                "message_drain_buffer_size": 16,
                "shared_secret": "{SECRET}",
                "container_metric_ttl_seconds": 60,
                "sink_inactivity_timeout_seconds": 60,
                "sink_io_timeout_seconds": 2,
                "unmarshaller_count": 2,
                "drains": [{drains}]
            }}"#
        ),
        FileFormat::Json,
    )
    .unwrap()
}

fn log(app_id: &str, text: &str) -> Envelope {
    Envelope::new(
        "pipeline-test",
        7,
        Payload::LogMessage(LogMessage::new(text, MessageType::Out, 7, app_id).with_source("APP", "0")),
    )
}

async fn recv<T>(rx: &mut mpsc::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

/// Accept one syslog connection and forward its lines
async fn syslog_server() -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("syslog://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                return;
            }
        }
    });
    (url, rx)
}

#[tokio::test]
async fn test_signed_datagrams_reach_app_streams() {
    let doppler = Doppler::start(&config(""), Arc::new(Counters::new()))
        .await
        .unwrap();
    let mut stream = doppler.manager().register_stream("app1");
    let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let signer = Signer::new(SECRET);

    let forged = Signer::new("wrong secret").sign(&marshal(&log("app1", "forged")).unwrap());
    agent.send_to(&forged, doppler.udp_addr()).await.unwrap();
    let signed = signer.sign(&marshal(&log("app1", "genuine")).unwrap());
    agent.send_to(&signed, doppler.udp_addr()).await.unwrap();

    let received = recv(&mut stream).await;
    assert_eq!(received.log_message().unwrap().message, b"genuine");
    assert_eq!(doppler.counters().get(INVALID_SIGNATURE_COUNTER), 1);
    assert_eq!(doppler.manager().recent_logs("app1").len(), 1);

    doppler.stop().await;
}

#[tokio::test]
async fn test_tls_frames_reach_app_streams() {
    let mut config = config("");
    config.enable_tls_transport = true;
    config.tls_listener = TlsListenerConfig {
        port: 0,
        cert_file: fixture_path("server.crt"),
        key_file: fixture_path("server.key"),
        ca_file: String::new(),
    };
    let doppler = Doppler::start(&config, Arc::new(Counters::new()))
        .await
        .unwrap();
    let mut stream = doppler.manager().register_stream("app1");

    let tls_port = doppler.tls_addr().unwrap().port();
    let client_tls = network::tls::client_config(&TlsClientConfig {
        ca_file: fixture_path("ca.crt"),
        ..Default::default()
    })
    .unwrap();
    let client = TlsClient::new(format!("localhost:{tls_port}"), client_tls, Duration::from_secs(5)).unwrap();
    let frame = encode_frame(&marshal(&log("app1", "framed")).unwrap()).unwrap();
    client.write(&frame).await.unwrap();

    let received = recv(&mut stream).await;
    assert_eq!(received.log_message().unwrap().message, b"framed");

    client.close().await.unwrap();
    doppler.stop().await;
}

#[tokio::test]
async fn test_agent_to_static_drain_end_to_end() {
    let (drain_url, mut lines) = syslog_server().await;
    let doppler = Doppler::start(
        &config(&format!(r#"{{"app_id": "app1", "url": "{drain_url}"}}"#)),
        Arc::new(Counters::new()),
    )
    .await
    .unwrap();

    let agent = metron::Agent::start(
        &MetronConfig {
            host: "127.0.0.1".to_string(),
            incoming_udp_port: 0,
            shared_secret: SECRET.to_string(),
            doppler_addresses: vec![format!("udp://{}", doppler.udp_addr())],
            tls_client: None,
            unmarshaller_count: 1,
            tls_write_timeout_seconds: 5,
            log_level: "info".to_string(),
        },
        Arc::new(Counters::new()),
    )
    .await
    .unwrap();

    let emitter = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    emitter
        .send_to(&marshal(&log("app1", "all the way")).unwrap(), agent.local_addr())
        .await
        .unwrap();

    let line = recv(&mut lines).await;
    assert!(line.starts_with("<14>1 "));
    assert!(line.ends_with("loggregator app1 [APP/0] - - all the way"));

    agent.stop().await;
    doppler.stop().await;
}

#[tokio::test]
async fn test_registry_events_add_and_remove_drains() {
    let (drain_url, mut lines) = syslog_server().await;
    let doppler = Doppler::start(&config(""), Arc::new(Counters::new()))
        .await
        .unwrap();
    let binding = AppDestination::new("app2", drain_url);

    doppler.registry().adds.send(binding.clone()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while doppler.manager().sink_stats().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    doppler.manager().send_to(Arc::new(log("app2", "via registry")));
    assert!(recv(&mut lines).await.ends_with("- - via registry"));

    doppler.registry().removes.send(binding).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !doppler.manager().sink_stats().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    doppler.stop().await;
}
