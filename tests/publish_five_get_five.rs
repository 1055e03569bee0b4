mod common;

use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::{basic, queue, AMQPClass};
use amq_protocol::types::FieldTable;
use common::FakeBroker;

#[test]
fn publish_five_get_five_returns_fifo_order() {
    let bodies: Vec<&'static [u8]> = vec![b"b1", b"b2", b"b3", b"b4", b"b5"];
    let broker_bodies = bodies.clone();

    let broker = FakeBroker::spawn(move |conn| {
        conn.handshake();
        conn.expect_channel_open(1);

        assert!(matches!(
            conn.read_frame(),
            AMQPFrame::Method(1, AMQPClass::Queue(queue::AMQPMethod::Declare(_)))
        ));
        conn.write_frame(&AMQPFrame::Method(
            1,
            AMQPClass::Queue(queue::AMQPMethod::DeclareOk(queue::DeclareOk {
                queue: "q".into(),
                message_count: 0,
                consumer_count: 0,
            })),
        ));

        for _ in &broker_bodies {
            assert!(matches!(
                conn.read_frame(),
                AMQPFrame::Method(1, AMQPClass::Basic(basic::AMQPMethod::Publish(_)))
            ));
            assert!(matches!(conn.read_frame(), AMQPFrame::Header(1, _)));
            assert!(matches!(conn.read_frame(), AMQPFrame::Body(1, _)));
        }

        for (i, body) in broker_bodies.iter().enumerate() {
            assert!(matches!(
                conn.read_frame(),
                AMQPFrame::Method(1, AMQPClass::Basic(basic::AMQPMethod::Get(_)))
            ));
            conn.send_content(
                1,
                AMQPClass::Basic(basic::AMQPMethod::GetOk(basic::GetOk {
                    delivery_tag: i as u64 + 1,
                    redelivered: false,
                    exchange: "".into(),
                    routing_key: "q".into(),
                    message_count: (broker_bodies.len() - i - 1) as u32,
                })),
                basic::AMQPProperties::default(),
                body,
            );
        }
    });

    let connection = blocking_amqp::Connection::open(common::connection_properties(broker.addr)).unwrap();
    let channel = connection.channel().unwrap();
    channel
        .queue_declare("q", false, false, false, false, FieldTable::default())
        .unwrap();

    for body in &bodies {
        channel
            .basic_publish("", "q", body, basic::AMQPProperties::default(), false, false)
            .unwrap();
    }

    for expected in &bodies {
        let message = channel.basic_get("q", true).unwrap().expect("message present");
        assert_eq!(message.body(), *expected);
    }

    drop(channel);
    drop(connection);
    broker.join();
}
