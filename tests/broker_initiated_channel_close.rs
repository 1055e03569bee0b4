mod common;

use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::{channel as chan, queue, AMQPClass};
use amq_protocol::types::FieldTable;
use common::FakeBroker;

/// Declaring a missing queue passively gets the channel closed by the
/// broker; the error surfaces on the declare call, and the connection
/// stays usable for a fresh channel afterward.
#[test]
fn broker_closes_channel_but_connection_survives() {
    let broker = FakeBroker::spawn(move |conn| {
        conn.handshake();
        conn.expect_channel_open(1);

        assert!(matches!(
            conn.read_frame(),
            AMQPFrame::Method(1, AMQPClass::Queue(queue::AMQPMethod::Declare(_)))
        ));
        conn.write_frame(&AMQPFrame::Method(
            1,
            AMQPClass::Channel(chan::AMQPMethod::Close(chan::Close {
                reply_code: 404,
                reply_text: "NOT_FOUND - no queue 'q' in vhost '/'".into(),
                class_id: 50,
                method_id: 10,
            })),
        ));
        assert!(matches!(
            conn.read_frame(),
            AMQPFrame::Method(1, AMQPClass::Channel(chan::AMQPMethod::CloseOk(_)))
        ));

        conn.expect_channel_open(2);
    });

    let connection = blocking_amqp::Connection::open(common::connection_properties(broker.addr)).unwrap();
    let channel = connection.channel().unwrap();

    let err = channel
        .queue_declare("q", true, false, false, false, FieldTable::default())
        .unwrap_err();
    assert!(matches!(err, blocking_amqp::Error::ChannelError(_)));
    assert!(channel.is_closed());
    assert!(connection.is_open());

    let second = connection.channel().unwrap();
    assert!(second.is_open());

    drop(second);
    drop(channel);
    drop(connection);
    broker.join();
}
