mod common;

use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::{basic, AMQPClass};
use amq_protocol::types::{AMQPValue, FieldTable};
use common::FakeBroker;

#[test]
fn published_headers_survive_the_round_trip() {
    let broker = FakeBroker::spawn(move |conn| {
        conn.handshake();
        conn.expect_channel_open(1);

        let (lead, properties, body) = match conn.read_frame() {
            AMQPFrame::Method(1, AMQPClass::Basic(basic::AMQPMethod::Publish(publish))) => {
                let header = match conn.read_frame() {
                    AMQPFrame::Header(1, header) => header,
                    other => panic!("expected content header, got {other:?}"),
                };
                let body = match conn.read_frame() {
                    AMQPFrame::Body(1, body) => body,
                    other => panic!("expected content body, got {other:?}"),
                };
                (publish, header.properties, body)
            }
            other => panic!("expected Basic.Publish, got {other:?}"),
        };

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
        conn.write_frame(&AMQPFrame::Method(
            1,
            AMQPClass::Basic(basic::AMQPMethod::Deliver(basic::Deliver {
                consumer_tag: "ctag1".into(),
                delivery_tag: 1,
                redelivered: false,
                exchange: lead.exchange,
                routing_key: lead.routing_key,
            })),
        ));
        conn.write_frame(&AMQPFrame::Header(
            1,
            amq_protocol::frame::AMQPContentHeader {
                class_id: 60,
                body_size: body.len() as u64,
                properties,
            },
        ));
        conn.write_frame(&AMQPFrame::Body(1, body));
    });

    let connection = blocking_amqp::Connection::open(common::connection_properties(broker.addr)).unwrap();
    let channel = connection.channel().unwrap();

    let mut headers = FieldTable::default();
    headers.insert("key".into(), AMQPValue::LongLongInt(1_234_567_890));
    headers.insert("alpha".into(), AMQPValue::LongString("omega".into()));
    let properties = basic::AMQPProperties::default().with_headers(headers.clone());

    channel
        .basic_publish("", "q", b"hello", properties, false, false)
        .unwrap();
    channel.basic_consume("q", "", false, true, false).unwrap();

    let message = channel
        .build_inbound_messages(false)
        .unwrap()
        .next()
        .expect("a message arrives")
        .unwrap();

    assert_eq!(message.body(), b"hello");
    assert_eq!(message.properties().headers(), &Some(headers));

    drop(channel);
    drop(connection);
    broker.join();
}
