//! Wire path of one envelope: agent marshals and signs, aggregator verifies,
//! decodes, and renders the syslog line

use codec::{
    format_syslog, marshal, read_frame, unmarshal, write_frame, CodecError, Signer,
    DEFAULT_MAX_FRAME_SIZE, PRIORITY_INFO, SIGNATURE_LENGTH,
};
use tokio_test::io::Builder;
use types::{Envelope, EventType, LogMessage, MessageType, Payload, ValueMetric};

const TIMESTAMP: i64 = 1_451_747_045_999_999_000;

fn log_envelope() -> Envelope {
    Envelope::new(
        "router_z1",
        TIMESTAMP,
        Payload::LogMessage(
            LogMessage::new("GET / 200\n", MessageType::Out, TIMESTAMP, "app1")
                .with_source("APP", "2"),
        ),
    )
}

#[test]
fn test_signed_datagram_to_syslog_line() {
    let agent = Signer::new("shared");
    let aggregator = Signer::new("shared");

    let datagram = agent.sign(&marshal(&log_envelope()).unwrap());
    let envelope = unmarshal(aggregator.verify(&datagram).unwrap()).unwrap();
    assert_eq!(envelope.event_type(), EventType::LogMessage);

    let log = envelope.log_message().unwrap();
    let line = format_syslog(
        PRIORITY_INFO,
        log.app_id.as_deref().unwrap_or_default(),
        log.source_type.as_deref().unwrap_or_default(),
        log.source_instance.as_deref().unwrap_or_default(),
        &log.message,
        log.timestamp,
    );
    assert_eq!(
        String::from_utf8(line).unwrap(),
        "<14>1 2016-01-02T15:04:05.999999+00:00 loggregator app1 [APP/2] - - GET / 200\n"
    );
}

#[test]
fn test_mismatched_secret_is_an_authentication_failure() {
    let datagram = Signer::new("agent").sign(&marshal(&log_envelope()).unwrap());
    let err = Signer::new("aggregator").verify(&datagram).unwrap_err();
    assert!(err.is_authentication_failure());

    let err = Signer::new("agent")
        .verify(&datagram[..SIGNATURE_LENGTH - 1])
        .unwrap_err();
    assert!(matches!(err, CodecError::SignatureTooShort { .. }));
}

#[test]
fn test_tampered_payload_fails_verification() {
    let signer = Signer::new("shared");
    let mut datagram = signer.sign(&marshal(&log_envelope()).unwrap());
    let last = datagram.len() - 1;
    datagram[last] ^= 0xff;
    assert!(matches!(
        signer.verify(&datagram),
        Err(CodecError::SignatureMismatch)
    ));
}

#[tokio::test]
async fn test_frames_survive_fragmented_reads() {
    let first = marshal(&log_envelope()).unwrap();
    let second = marshal(&Envelope::new(
        "metron",
        TIMESTAMP,
        Payload::ValueMetric(ValueMetric {
            name: "uptime".into(),
            value: 12.5,
            unit: "s".into(),
        }),
    ))
    .unwrap();

    let mut wire = Vec::new();
    write_frame(&mut wire, &first).await.unwrap();
    write_frame(&mut wire, &second).await.unwrap();

    let (a, rest) = wire.split_at(2);
    let (b, c) = rest.split_at(first.len() + 5);
    let mut reader = Builder::new().read(a).read(b).read(c).build();

    let one = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await.unwrap().unwrap();
    let two = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await.unwrap().unwrap();
    assert_eq!(unmarshal(&one).unwrap(), log_envelope());
    assert_eq!(unmarshal(&two).unwrap().event_type(), EventType::ValueMetric);
    assert!(read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await.unwrap().is_none());
}

#[tokio::test]
async fn test_oversized_frame_is_stream_fatal() {
    let mut reader = Builder::new().read(&1024u32.to_le_bytes()).build();
    let err = read_frame(&mut reader, 512).await.unwrap_err();
    assert!(err.is_stream_fatal());
}
