mod common;

use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::{basic, AMQPClass};
use common::FakeBroker;

/// A body much larger than one frame gets split into the expected number of
/// `ContentBody` frames on the wire, and reassembles byte-for-byte on the
/// consuming side.
#[test]
fn large_body_splits_into_eight_frames_and_reassembles() {
    let body: Vec<u8> = "Hello World!".repeat(80_960).into_bytes();
    let broker_body = body.clone();

    let broker = FakeBroker::spawn(move |conn| {
        conn.handshake();
        conn.expect_channel_open(1);

        assert!(matches!(
            conn.read_frame(),
            AMQPFrame::Method(1, AMQPClass::Basic(basic::AMQPMethod::Publish(_)))
        ));
        assert!(matches!(conn.read_frame(), AMQPFrame::Header(1, _)));

        let mut received = Vec::new();
        let mut frame_count = 0;
        while received.len() < broker_body.len() {
            match conn.read_frame() {
                AMQPFrame::Body(1, chunk) => {
                    frame_count += 1;
                    received.extend_from_slice(&chunk);
                }
                other => panic!("expected content body, got {other:?}"),
            }
        }
        assert_eq!(frame_count, 8);
        assert_eq!(received, broker_body);

        assert!(matches!(
            conn.read_frame(),
            AMQPFrame::Method(1, AMQPClass::Basic(basic::AMQPMethod::Consume(_)))
        ));
        conn.write_frame(&AMQPFrame::Method(
            1,
            AMQPClass::Basic(basic::AMQPMethod::ConsumeOk(basic::ConsumeOk {
                consumer_tag: "ctag1".into(),
            })),
        ));
        conn.send_content(
            1,
            AMQPClass::Basic(basic::AMQPMethod::Deliver(basic::Deliver {
                consumer_tag: "ctag1".into(),
                delivery_tag: 1,
                redelivered: false,
                exchange: "".into(),
                routing_key: "q".into(),
            })),
            basic::AMQPProperties::default(),
            &broker_body,
        );
    });

    let connection = blocking_amqp::Connection::open(common::connection_properties(broker.addr)).unwrap();
    let channel = connection.channel().unwrap();

    channel
        .basic_publish("", "q", &body, basic::AMQPProperties::default(), false, false)
        .unwrap();
    channel.basic_consume("q", "", false, true, false).unwrap();

    let message = channel
        .build_inbound_messages(false)
        .unwrap()
        .next()
        .expect("a message arrives")
        .unwrap();
    assert_eq!(message.body(), body.as_slice());

    drop(channel);
    drop(connection);
    broker.join();
}
